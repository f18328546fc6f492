use crate::chunker::{self, Piece};
use crate::config::SessionConfig;
use crate::keys::{Key, KeyCursor};
use crate::packet::{Cid, Packet};
use crate::parity;
use crate::transport::PacketTransport;
use tracing::{debug, info, instrument, trace, warn};

pub const INITIAL_MESSAGE_PREFIX: &str = "Hello from ";

/// The server's messages as the client received them, in order. The last one ends with the
///  content of the server's EOM packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionOutcome {
    pub received: Vec<String>,
}

impl SessionOutcome {
    pub fn final_message(&self) -> Option<&str> {
        self.received.last().map(|s| s.as_str())
    }
}


/// One server message, put together from its packets
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reassembly {
    pub content: String,
    /// false if any piece failed the parity check - stays false for the rest of the message
    pub parity_ok: bool,
    pub eom: bool,
    num_packets: usize,
    complete: bool,
}

impl Default for Reassembly {
    fn default() -> Self {
        Reassembly {
            content: String::new(),
            parity_ok: true,
            eom: false,
            num_packets: 0,
            complete: false,
        }
    }
}

impl Reassembly {
    pub fn push_piece(&mut self, plaintext: &str, parity_ok: bool, remaining: u16) {
        self.content.push_str(plaintext);
        self.parity_ok &= parity_ok;
        self.num_packets += 1;
        self.complete = remaining == 0;
    }

    /// The EOM packet ends both the message and the session
    pub fn push_terminal(&mut self, content: &str) {
        self.content.push_str(content);
        self.num_packets += 1;
        self.eom = true;
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn num_packets(&self) -> usize {
        self.num_packets
    }
}


enum SessionState {
    Sending(String),
    Receiving,
    ReplyBuild(Reassembly),
    Done,
}


/// The UDP phase: send a message, receive the server's answer, reply with the answer's words in
///  reverse order (or ask for a repetition after a parity error), until the server sends EOM.
pub struct Session<T: PacketTransport> {
    cid: Cid,
    transport: T,
    config: SessionConfig,
    outgoing_keys: KeyCursor,
    incoming_keys: KeyCursor,
    /// parity status of the last received message, sent as ACK with every outgoing packet
    ack: bool,
}

impl<T: PacketTransport> Session<T> {
    pub fn new(cid: Cid, transport: T, config: SessionConfig, my_keys: Vec<Key>, their_keys: Vec<Key>) -> Session<T> {
        Session {
            cid,
            transport,
            config,
            outgoing_keys: KeyCursor::new(my_keys),
            incoming_keys: KeyCursor::new(their_keys),
            ack: true,
        }
    }

    pub fn initial_message(&self) -> String {
        format!("{}{}", INITIAL_MESSAGE_PREFIX, self.cid)
    }

    #[instrument(name = "session", skip_all, fields(cid = %self.cid))]
    pub async fn run(mut self) -> anyhow::Result<SessionOutcome> {
        let mut received = Vec::new();
        let mut state = SessionState::Sending(self.initial_message());

        loop {
            state = match state {
                SessionState::Sending(message) => {
                    self.send_message(&message).await?;
                    SessionState::Receiving
                }
                SessionState::Receiving => {
                    let reassembly = self.receive_message().await?;
                    info!("received message from server ({} packets): {:?}", reassembly.num_packets(), reassembly.content);
                    self.ack = reassembly.parity_ok;

                    if reassembly.eom {
                        received.push(reassembly.content);
                        SessionState::Done
                    }
                    else {
                        SessionState::ReplyBuild(reassembly)
                    }
                }
                SessionState::ReplyBuild(reassembly) => {
                    let reply = self.build_reply(&reassembly);
                    received.push(reassembly.content);
                    SessionState::Sending(reply)
                }
                SessionState::Done => break,
            };
        }

        info!("server signalled end of message after {} messages", received.len());
        Ok(SessionOutcome { received })
    }

    pub fn build_reply(&self, received: &Reassembly) -> String {
        if received.parity_ok {
            reverse_words(&received.content)
        }
        else {
            warn!("parity error in received message - asking the server to send it again");
            self.config.retry_message.clone()
        }
    }

    async fn send_message(&mut self, message: &str) -> anyhow::Result<()> {
        let mut pieces: Vec<Piece> = chunker::pieces(message, self.config.piece_size, self.config.parity)?.collect();
        if pieces.is_empty() {
            // the server waits for a reply, so an empty message still takes a packet
            pieces.push(Piece { content: "", remaining: 0 });
        }

        let num_pieces = pieces.len();
        for (i, piece) in pieces.iter().enumerate() {
            let packet = self.encode_piece(piece)?;
            trace!("sending {:?}", packet);
            self.transport.send_datagram(&packet.to_bytes()).await?;
            debug!("sent piece {} of {}", i + 1, num_pieces);
        }
        Ok(())
    }

    /// cipher, then parity, then packet - consumes one outgoing key
    pub fn encode_piece(&mut self, piece: &Piece) -> anyhow::Result<Packet> {
        let mut content = self.outgoing_keys.apply(piece.content);
        if self.config.parity {
            content = parity::add_parity_to_message(&content)?;
        }
        Packet::new(self.cid, &content, self.ack, false, piece.remaining)
    }

    async fn receive_message(&mut self) -> anyhow::Result<Reassembly> {
        let mut reassembly = Reassembly::default();
        let mut buf = vec![0u8; self.config.datagram_read_len];

        while !reassembly.is_complete() {
            let n = self.transport.recv_datagram(&mut buf).await?;
            let mut datagram = &buf[..n];
            let packet = Packet::deser(&mut datagram)?;
            if !datagram.is_empty() {
                debug!("ignoring {} bytes after the packet", datagram.len());
            }
            trace!("received {:?}", packet);

            self.accept_packet(&mut reassembly, &packet)?;
        }
        Ok(reassembly)
    }

    /// parity check and strip, then decryption - consumes one incoming key unless it is the EOM
    ///  packet, which is taken as it is
    pub fn accept_packet(&mut self, reassembly: &mut Reassembly, packet: &Packet) -> anyhow::Result<()> {
        let content = packet.text()?;

        if packet.eom {
            reassembly.push_terminal(&content);
            return Ok(());
        }

        let (content, parity_ok) = if self.config.parity {
            let parity_ok = parity::check_parity(&content);
            if !parity_ok {
                warn!("parity error in piece #{} of the current message", reassembly.num_packets() + 1);
            }
            (parity::remove_parity_from_message(&content)?, parity_ok)
        }
        else {
            (content, true)
        };

        let plaintext = self.incoming_keys.apply(&content);
        reassembly.push_piece(&plaintext, parity_ok, packet.remaining);
        Ok(())
    }
}

/// `"a b  c"` becomes `"c  b a"`: splitting is on single spaces, so runs of spaces survive
pub fn reverse_words(message: &str) -> String {
    message.split(' ').rev().collect::<Vec<_>>().join(" ")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Capabilities, ClientConfig};
    use crate::keys::generate_keys;
    use crate::test_util::{scripted_transport, server_piece, server_terminal, ServerScript};
    use crate::transport::MockPacketTransport;
    use rstest::rstest;

    fn cid() -> Cid {
        Cid::parse("CID12345").unwrap()
    }

    fn session_config(token: &str) -> SessionConfig {
        SessionConfig::new(&ClientConfig::new("localhost", 10000, Capabilities::parse(token).unwrap())).unwrap()
    }

    fn session(token: &str, transport: MockPacketTransport, my_keys: Vec<Key>, their_keys: Vec<Key>) -> Session<MockPacketTransport> {
        Session::new(cid(), transport, session_config(token), my_keys, their_keys)
    }

    #[rstest]
    #[case::simple("one two three", "three two one")]
    #[case::single_word("word", "word")]
    #[case::empty("", "")]
    #[case::double_space("a  b", "b  a")]
    #[case::trailing_space("a b ", " b a")]
    fn test_reverse_words(#[case] message: &str, #[case] expected: &str) {
        assert_eq!(reverse_words(message), expected);
    }

    #[test]
    fn test_reassembly() {
        let mut reassembly = Reassembly::default();
        assert!(!reassembly.is_complete());
        assert!(reassembly.parity_ok);

        reassembly.push_piece("abc", true, 3);
        assert!(!reassembly.is_complete());
        reassembly.push_piece("def", false, 0);
        assert!(reassembly.is_complete());
        assert!(!reassembly.eom);
        assert!(!reassembly.parity_ok);
        assert_eq!(reassembly.content, "abcdef");
        assert_eq!(reassembly.num_packets(), 2);
    }

    #[test]
    fn test_reassembly_parity_failure_is_sticky() {
        let mut reassembly = Reassembly::default();
        reassembly.push_piece("a", false, 2);
        reassembly.push_piece("b", true, 1);
        reassembly.push_piece("c", true, 0);
        assert!(!reassembly.parity_ok);
    }

    #[test]
    fn test_reassembly_terminal() {
        let mut reassembly = Reassembly::default();
        reassembly.push_piece("abc ", true, 3);
        reassembly.push_terminal("bye");
        assert!(reassembly.is_complete());
        assert!(reassembly.eom);
        assert_eq!(reassembly.content, "abc bye");
    }

    #[test]
    fn test_initial_message() {
        let session = session("HELLO", MockPacketTransport::new(), vec![], vec![]);
        assert_eq!(session.initial_message(), "Hello from CID12345");
    }

    #[test]
    fn test_encode_piece_plain() {
        let mut session = session("HELLO", MockPacketTransport::new(), vec![], vec![]);
        let message = session.initial_message();
        let pieces: Vec<Piece> = chunker::pieces(&message, 64, false).unwrap().collect();
        assert_eq!(pieces.len(), 1);

        let packet = session.encode_piece(&pieces[0]).unwrap();
        assert_eq!(packet.content_length, 19);
        assert_eq!(packet.remaining, 0);
        assert!(!packet.eom);
        assert!(packet.ack);
        assert_eq!(packet.cid, cid());
        assert_eq!(packet.text().unwrap(), "Hello from CID12345");
    }

    #[test]
    fn test_encode_piece_encrypted_with_parity() {
        let my_keys = generate_keys(2);
        let mut session = session("HELLO ENC PAR", MockPacketTransport::new(), my_keys.clone(), vec![]);

        let first = session.encode_piece(&Piece { content: "abc", remaining: 4 }).unwrap();
        let second = session.encode_piece(&Piece { content: "defg", remaining: 0 }).unwrap();

        let first_text = first.text().unwrap();
        assert_eq!(first.content_length, 3);
        assert_eq!(first.remaining, 4);
        assert!(parity::check_parity(&first_text));
        let stripped = parity::remove_parity_from_message(&first_text).unwrap();
        assert_eq!(crate::cipher::decrypt(&stripped, &my_keys, 0), "abc");

        let stripped = parity::remove_parity_from_message(&second.text().unwrap()).unwrap();
        assert_eq!(crate::cipher::decrypt(&stripped, &my_keys, 1), "defg");
    }

    #[test]
    fn test_accept_packet_parity_error() {
        let their_keys = generate_keys(1);
        let mut session = session("HELLO ENC PAR", MockPacketTransport::new(), vec![], their_keys.clone());

        let mut packet = server_piece(&ServerScript::new(true, their_keys), 0, "hello", 0);
        // changes exactly one bit of the first character, and the content stays valid UTF-8
        packet.content[0] ^= 1;

        let mut reassembly = Reassembly::default();
        session.accept_packet(&mut reassembly, &packet).unwrap();
        assert!(reassembly.is_complete());
        assert!(!reassembly.parity_ok);
        assert_eq!(session.build_reply(&reassembly), "Send again");
    }

    #[test]
    fn test_accept_packet_terminal_is_taken_verbatim() {
        let their_keys = generate_keys(1);
        let mut session = session("HELLO ENC PAR", MockPacketTransport::new(), vec![], their_keys);

        let mut reassembly = Reassembly::default();
        session.accept_packet(&mut reassembly, &server_terminal("bye")).unwrap();

        assert!(reassembly.is_complete());
        assert!(reassembly.eom);
        assert!(reassembly.parity_ok);
        assert_eq!(reassembly.content, "bye");
        assert_eq!(session.incoming_keys.position(), 0);
    }

    #[tokio::test]
    async fn test_run_plain() {
        let script = ServerScript::new(false, vec![]);
        let (transport, sent) = scripted_transport(vec![
            server_piece(&script, 0, "one two three", 0),
            server_terminal("bye"),
        ]);

        let outcome = session("HELLO", transport, vec![], vec![]).run().await.unwrap();
        assert_eq!(outcome.received, vec!["one two three".to_string(), "bye".to_string()]);
        assert_eq!(outcome.final_message(), Some("bye"));

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text().unwrap(), "Hello from CID12345");
        assert_eq!(sent[0].content_length, 19);
        assert_eq!(sent[0].remaining, 0);
        assert!(!sent[0].eom);
        assert_eq!(sent[1].text().unwrap(), "three two one");
        assert!(sent[1].ack);
    }

    #[tokio::test]
    async fn test_run_terminal_first() {
        let (transport, sent) = scripted_transport(vec![server_terminal("bye")]);

        let outcome = session("HELLO", transport, vec![], vec![]).run().await.unwrap();
        assert_eq!(outcome.received, vec!["bye".to_string()]);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_multipart_encrypted_with_parity() {
        let my_keys = generate_keys(20);
        let their_keys = generate_keys(20);
        let script = ServerScript::new(true, their_keys.clone());

        let first_message = "lorem ipsum ".repeat(10); // 120 characters
        let second_message = "x y z";
        let (transport, sent) = scripted_transport(vec![
            server_piece(&script, 0, &first_message[..64], 56),
            server_piece(&script, 1, &first_message[64..], 0),
            server_piece(&script, 2, second_message, 0),
            server_terminal("bye"),
        ]);

        let outcome = session("HELLO ENC MUL PAR", transport, my_keys.clone(), their_keys).run().await.unwrap();
        assert_eq!(outcome.received, vec![first_message.clone(), second_message.to_string(), "bye".to_string()]);

        // decode what the client sent, with the client's keys in order
        let sent = sent.lock().unwrap();
        let decoded: Vec<String> = sent.iter()
            .enumerate()
            .map(|(i, packet)| {
                let text = packet.text().unwrap();
                assert!(parity::check_parity(&text));
                crate::cipher::decrypt(&parity::remove_parity_from_message(&text).unwrap(), &my_keys, i)
            })
            .collect();

        let reversed = reverse_words(&first_message);
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0], "Hello from CID12345");
        assert_eq!(decoded[1], reversed[..64]);
        assert_eq!(sent[1].remaining, 56);
        assert_eq!(decoded[2], reversed[64..]);
        assert_eq!(sent[2].remaining, 0);
        assert_eq!(decoded[3], "z y x");
    }

    #[tokio::test]
    async fn test_run_parity_error_requests_repetition() {
        let their_keys = generate_keys(20);
        let script = ServerScript::new(true, their_keys.clone());

        let mut corrupted = server_piece(&script, 0, "first try", 0);
        corrupted.content[2] ^= 1;

        let (transport, sent) = scripted_transport(vec![
            corrupted,
            server_piece(&script, 1, "second try", 0),
            server_terminal("bye"),
        ]);

        let outcome = session("HELLO ENC PAR", transport, vec![], their_keys).run().await.unwrap();
        assert_eq!(outcome.received.len(), 3);
        assert_eq!(outcome.received[1], "second try");

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].ack);
        let retry = parity::remove_parity_from_message(&sent[1].text().unwrap()).unwrap();
        assert_eq!(retry, "Send again");
        assert!(!sent[1].ack);
        let reply = parity::remove_parity_from_message(&sent[2].text().unwrap()).unwrap();
        assert_eq!(reply, "try second");
        assert!(sent[2].ack);
    }

    #[tokio::test]
    async fn test_run_empty_reply_still_sends_a_packet() {
        let script = ServerScript::new(false, vec![]);
        let (transport, sent) = scripted_transport(vec![
            server_piece(&script, 0, "", 0),
            server_terminal("bye"),
        ]);

        session("HELLO", transport, vec![], vec![]).run().await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content_length, 0);
        assert_eq!(sent[1].remaining, 0);
    }

    #[tokio::test]
    async fn test_run_multipart_reply_beyond_latin1() {
        let script = ServerScript::new(false, vec![]);
        let first = "中".repeat(40);
        let second = "文".repeat(40);
        let (transport, sent) = scripted_transport(vec![
            server_piece(&script, 0, &first, 40),
            server_piece(&script, 1, &second, 0),
            server_terminal("bye"),
        ]);

        let outcome = session("HELLO MUL", transport, vec![], vec![]).run().await.unwrap();
        let message = format!("{}{}", first, second);
        assert_eq!(outcome.received, vec![message.clone(), "bye".to_string()]);

        // 3-byte characters: 42 of them fill 126 of the 128 bytes
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].content_length, 42);
        assert_eq!(sent[1].remaining, 38);
        assert_eq!(sent[2].content_length, 38);
        assert_eq!(sent[2].remaining, 0);
        assert_eq!(format!("{}{}", sent[1].text().unwrap(), sent[2].text().unwrap()), reverse_words(&message));
    }

    #[tokio::test]
    async fn test_run_zero_piece_size_is_an_error() {
        let mut transport = MockPacketTransport::new();
        transport.expect_send_datagram().times(0);
        transport.expect_recv_datagram().times(0);

        let config = SessionConfig {
            piece_size: 0,
            ..session_config("HELLO")
        };
        let session = Session::new(cid(), transport, config, vec![], vec![]);
        assert!(session.run().await.is_err());
    }

    #[tokio::test]
    async fn test_run_receive_error_is_fatal() {
        let mut transport = MockPacketTransport::new();
        transport.expect_send_datagram()
            .times(1)
            .returning(|_| Ok(()));
        transport.expect_recv_datagram()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection refused")));

        assert!(session("HELLO", transport, vec![], vec![]).run().await.is_err());
    }

    #[tokio::test]
    async fn test_run_short_datagram_is_fatal() {
        let mut transport = MockPacketTransport::new();
        transport.expect_send_datagram()
            .returning(|_| Ok(()));
        transport.expect_recv_datagram()
            .times(1)
            .returning(|buf| {
                buf[..3].copy_from_slice(b"abc");
                Ok(3)
            });

        assert!(session("HELLO", transport, vec![], vec![]).run().await.is_err());
    }
}
