use crate::chunker::MAX_PIECE_SIZE;
use crate::packet::PACKET_LEN;
use anyhow::bail;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_KEY_COUNT: usize = 20;
pub const DEFAULT_HANDSHAKE_READ_LEN: usize = 2048;
pub const DEFAULT_DATAGRAM_READ_LEN: usize = 1024;
pub const DEFAULT_RETRY_MESSAGE: &str = "Send again";

/// The optional protocol features a client asks for in its hello line. The server is
///  expected to go along with whatever the client requests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// `ENC`: XOR every piece with a one-time-pad key, keys are exchanged in the handshake
    pub encryption: bool,
    /// `MUL`: messages may span several packets
    pub multipart: bool,
    /// `PAR`: every character carries an even-parity bit
    pub parity: bool,
}

impl Capabilities {
    pub const HELLO: &'static str = "HELLO";
    pub const ENC: &'static str = "ENC";
    pub const MUL: &'static str = "MUL";
    pub const PAR: &'static str = "PAR";

    /// Parses the hello token as given on the command line, e.g. `"HELLO ENC PAR"`. The words
    ///  may come in any order, but `HELLO` is mandatory.
    pub fn parse(token: &str) -> anyhow::Result<Capabilities> {
        let mut has_hello = false;
        let mut result = Capabilities::default();

        for word in token.split_whitespace() {
            match word {
                Self::HELLO => has_hello = true,
                Self::ENC => result.encryption = true,
                Self::MUL => result.multipart = true,
                Self::PAR => result.parity = true,
                other => bail!("unsupported word {:?} in hello token - expected HELLO, ENC, MUL or PAR", other),
            }
        }

        if !has_hello {
            bail!("hello token must contain HELLO");
        }
        Ok(result)
    }

    /// the hello line in canonical order, without line terminator
    pub fn hello_line(&self) -> String {
        let mut line = Self::HELLO.to_string();
        for (enabled, word) in [(self.encryption, Self::ENC), (self.multipart, Self::MUL), (self.parity, Self::PAR)] {
            if enabled {
                line.push(' ');
                line.push_str(word);
            }
        }
        line
    }
}

impl FromStr for Capabilities {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capabilities::parse(s)
    }
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hello_line())
    }
}


#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_tcp_port: u16,

    pub capabilities: Capabilities,

    /// Number of one-time-pad keys the client generates and sends with an `ENC` hello. Every
    ///  outgoing piece consumes one key, and pieces are sent unencrypted once they are used up.
    pub key_count: usize,

    /// Maximum number of characters per packet. Must not exceed the key length (every character
    ///  needs its own key character), so 64 is the upper bound. Pieces end earlier if their
    ///  encrypted and parity-expanded characters would not fit the 128-byte content field.
    pub piece_size: usize,

    /// The server's hello reply is read with a single read of up to this many bytes
    pub handshake_read_len: usize,

    /// Receive buffer for a single datagram, must hold at least one full packet
    pub datagram_read_len: usize,

    /// `None` means that the client waits for the server indefinitely, which is the protocol's
    ///  traditional behavior. If set, a receive that takes longer terminates the run with an error.
    pub receive_timeout: Option<Duration>,

    /// The reply that asks the server to repeat its message after a parity failure
    pub retry_message: String,
}

impl ClientConfig {
    pub fn new(server_host: impl Into<String>, server_tcp_port: u16, capabilities: Capabilities) -> ClientConfig {
        ClientConfig {
            server_host: server_host.into(),
            server_tcp_port,
            capabilities,
            key_count: DEFAULT_KEY_COUNT,
            piece_size: MAX_PIECE_SIZE,
            handshake_read_len: DEFAULT_HANDSHAKE_READ_LEN,
            datagram_read_len: DEFAULT_DATAGRAM_READ_LEN,
            receive_timeout: None,
            retry_message: DEFAULT_RETRY_MESSAGE.to_string(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_host.is_empty() {
            bail!("server host must not be empty");
        }
        if self.piece_size == 0 || self.piece_size > MAX_PIECE_SIZE {
            bail!("piece size must be between 1 and {}, was {}", MAX_PIECE_SIZE, self.piece_size);
        }
        if self.datagram_read_len < PACKET_LEN {
            bail!("datagram read buffer must hold a full packet of {} bytes, was {}", PACKET_LEN, self.datagram_read_len);
        }
        if self.handshake_read_len == 0 {
            bail!("handshake read buffer must not be empty");
        }
        if self.receive_timeout == Some(Duration::ZERO) {
            bail!("receive timeout must be positive - use None to wait indefinitely");
        }
        Ok(())
    }
}


/// Settings of a UDP session. They are fixed when the session is created and never change
///  afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionConfig {
    pub parity: bool,
    pub piece_size: usize,
    pub datagram_read_len: usize,
    pub retry_message: String,
}

impl SessionConfig {
    pub fn new(config: &ClientConfig) -> anyhow::Result<SessionConfig> {
        config.validate()?;

        Ok(SessionConfig {
            parity: config.capabilities.parity,
            piece_size: config.piece_size,
            datagram_read_len: config.datagram_read_len,
            retry_message: config.retry_message.clone(),
        })
    }
}
