//! The TCP part of the protocol: a line-based hello exchange.
//!
//! ```ascii
//! client: HELLO[ ENC][ MUL][ PAR]\r\n
//!         <key 1>\r\n            (only with ENC)
//!         ...
//!         <key n>\r\n
//!         .\r\n
//! server: HELLO <CID> <UDP port>\r\n
//!         <key 1>\r\n            (only with ENC)
//!         ...
//! ```
//!
//! The server's keys are taken to be all reply lines except the first and the last two. This
//!  relies on the reply ending in a terminator line plus the empty string after the final CRLF,
//!  and it is kept exactly like that for compatibility with existing servers.

use crate::config::Capabilities;
use crate::keys::Key;
use crate::packet::Cid;
use anyhow::{bail, Context};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, trace};

pub const LINE_END: &str = "\r\n";
pub const KEY_LIST_END: &str = ".";

#[derive(Debug, Clone)]
pub struct HelloRequest {
    pub capabilities: Capabilities,
    /// sent only if encryption is requested
    pub keys: Vec<Key>,
}

impl HelloRequest {
    pub fn new(capabilities: Capabilities, keys: Vec<Key>) -> HelloRequest {
        HelloRequest {
            capabilities,
            keys,
        }
    }

    pub fn to_wire(&self) -> String {
        let mut result = self.capabilities.hello_line();
        result.push_str(LINE_END);

        if self.capabilities.encryption {
            for key in &self.keys {
                result.push_str(key.as_str());
                result.push_str(LINE_END);
            }
            result.push_str(KEY_LIST_END);
            result.push_str(LINE_END);
        }
        result
    }
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HelloReply {
    pub cid: Cid,
    pub udp_port: u16,
    pub keys: Vec<Key>,
}

impl HelloReply {
    pub fn parse(raw: &str, expect_keys: bool) -> anyhow::Result<HelloReply> {
        let lines: Vec<&str> = raw.split(LINE_END).collect();

        let tokens: Vec<&str> = lines[0].split(' ').collect();
        let [hello, cid, udp_port] = tokens.as_slice() else {
            bail!("malformed server hello {:?}: expected 3 space-separated fields, got {}", lines[0], tokens.len());
        };
        if *hello != Capabilities::HELLO {
            bail!("malformed server hello {:?}: does not start with {}", lines[0], Capabilities::HELLO);
        }

        let cid = Cid::parse(cid)?;
        let udp_port: u16 = udp_port.parse()
            .with_context(|| format!("malformed server hello {:?}: invalid UDP port", lines[0]))?;

        let keys = if expect_keys {
            lines.get(1..lines.len().saturating_sub(2))
                .unwrap_or_default()
                .iter()
                .map(|line| Key::parse(line))
                .collect::<anyhow::Result<Vec<_>>>()
                .context("malformed key in server hello")?
        }
        else {
            Vec::new()
        };

        Ok(HelloReply {
            cid,
            udp_port,
            keys,
        })
    }
}


/// Sends the hello and reads the reply with a single read of up to `read_len` bytes
#[instrument(name = "handshake", skip_all, fields(hello = %request.capabilities))]
pub async fn handshake<S>(stream: &mut S, request: &HelloRequest, read_len: usize) -> anyhow::Result<HelloReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let wire = request.to_wire();
    debug!("sending hello with {} keys", if request.capabilities.encryption { request.keys.len() } else { 0 });
    trace!("hello: {:?}", wire);
    stream.write_all(wire.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; read_len];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        bail!("server closed the connection without a hello reply");
    }
    let raw = std::str::from_utf8(&buf[..n])
        .context("server hello is not valid UTF-8")?;
    trace!("received hello: {:?}", raw);

    let reply = HelloReply::parse(raw, request.capabilities.encryption)?;
    info!("handshake complete: {:?}, UDP port {}, {} server keys", reply.cid, reply.udp_port, reply.keys.len());
    Ok(reply)
}
