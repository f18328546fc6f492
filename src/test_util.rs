use crate::cipher;
use crate::keys::Key;
use crate::packet::{Cid, Packet};
use crate::parity;
use crate::transport::MockPacketTransport;
use anyhow::anyhow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const SERVER_CID: &str = "SERVER00";

/// The server side of the cipher and parity settings, for producing what a server would send
pub struct ServerScript {
    pub parity: bool,
    pub keys: Vec<Key>,
}

impl ServerScript {
    pub fn new(parity: bool, keys: Vec<Key>) -> ServerScript {
        ServerScript {
            parity,
            keys,
        }
    }
}

/// a regular (non-EOM) server packet, encrypted with the server's key `key_index`
pub fn server_piece(script: &ServerScript, key_index: usize, plaintext: &str, remaining: usize) -> Packet {
    let mut content = cipher::encrypt(plaintext, &script.keys, key_index);
    if script.parity {
        content = parity::add_parity_to_message(&content).unwrap();
    }
    Packet::new(Cid::parse(SERVER_CID).unwrap(), &content, true, false, remaining).unwrap()
}

/// the server's final packet, which is neither encrypted nor parity-protected
pub fn server_terminal(content: &str) -> Packet {
    Packet::new(Cid::parse(SERVER_CID).unwrap(), content, true, true, 0).unwrap()
}

/// the plaintext of a packet the client sent with its key `key_index`
pub fn decode_client_piece(packet: &Packet, parity: bool, client_keys: &[Key], key_index: usize) -> String {
    let mut content = packet.text().unwrap();
    if parity {
        assert!(parity::check_parity(&content));
        content = parity::remove_parity_from_message(&content).unwrap();
    }
    cipher::decrypt(&content, client_keys, key_index)
}

/// A transport that answers every receive with the next of the given packets and records
///  everything the client sends
pub fn scripted_transport(replies: Vec<Packet>) -> (MockPacketTransport, Arc<Mutex<Vec<Packet>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

    let mut transport = MockPacketTransport::new();

    let sent_by_client = sent.clone();
    transport.expect_send_datagram()
        .returning(move |buf| {
            let mut b = buf;
            let packet = Packet::deser(&mut b)?;
            sent_by_client.lock().unwrap().push(packet);
            Ok(())
        });

    transport.expect_recv_datagram()
        .returning(move |buf| {
            let packet = replies.lock().unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("server script exhausted"))?;
            let bytes = packet.to_bytes();
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        });

    (transport, sent)
}
