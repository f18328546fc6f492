use crate::util::safe_converter::{PrecheckedCast, SafeCast};
use anyhow::{bail, Context};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt::{Debug, Display, Formatter};

pub const CID_LEN: usize = 8;
pub const CONTENT_FIELD_LEN: usize = 128;

/// All numbers in network byte order (BE):
/// ```ascii
///   0: CID (8 bytes ASCII)
///   8: ACK (bool, u8) - parity of the previously received message was correct
///   9: EOM (bool, u8) - set by the server on its very last packet
///  10: remaining (u16) - characters of the message still to come *after* this packet
///  12: content length (u16) - number of characters in the content field
///  14: content (128 bytes) - UTF-8, padded with NUL bytes
/// ```
pub const PACKET_LEN: usize =
    CID_LEN                    // cid
        + size_of::<u8>()      // ack
        + size_of::<u8>()      // eom
        + size_of::<u16>()     // remaining
        + size_of::<u16>()     // content length
        + CONTENT_FIELD_LEN;   // content

/// The client id assigned by the server in the handshake and repeated in every packet
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    pub fn parse(s: &str) -> anyhow::Result<Cid> {
        if !s.is_ascii() || s.len() != CID_LEN {
            bail!("CID must be exactly {} ASCII characters: {:?}", CID_LEN, s);
        }
        let mut raw = [0u8; CID_LEN];
        raw.copy_from_slice(s.as_bytes());
        Ok(Cid(raw))
    }

    /// no validation - servers may send anything in this field
    pub fn from_raw(raw: [u8; CID_LEN]) -> Cid {
        Cid(raw)
    }

    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }
}

impl Display for Cid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Debug for Cid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CID({})", self)
    }
}


/// A UDP packet. Its content field holds the UTF-8 encoded text (possibly encrypted and with
///  parity bits), padded with NUL bytes. `content_length` counts characters, not bytes.
#[derive(Clone, Eq, PartialEq)]
pub struct Packet {
    pub cid: Cid,
    pub ack: bool,
    pub eom: bool,
    pub remaining: u16,
    pub content_length: u16,
    pub content: [u8; CONTENT_FIELD_LEN],
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{{}{}{}:{}+{}}}",
               self.cid,
               if self.ack { "" } else { ":NAK" },
               if self.eom { ":EOM" } else { "" },
               self.content_length,
               self.remaining,
        )
    }
}

impl Packet {
    pub fn new(cid: Cid, content: &str, ack: bool, eom: bool, remaining: usize) -> anyhow::Result<Packet> {
        let encoded = content.as_bytes();
        if encoded.len() > CONTENT_FIELD_LEN {
            bail!("content does not fit into a packet: {} bytes, maximum is {}", encoded.len(), CONTENT_FIELD_LEN);
        }
        let max_remaining: usize = u16::MAX.safe_cast();
        if remaining > max_remaining {
            bail!("message too long: {} characters remaining", remaining);
        }

        let mut field = [0u8; CONTENT_FIELD_LEN];
        field[..encoded.len()].copy_from_slice(encoded);

        Ok(Packet {
            cid,
            ack,
            eom,
            remaining: remaining.prechecked_cast(),
            content_length: content.chars().count().prechecked_cast(),
            content: field,
        })
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.cid.as_bytes());
        buf.put_u8(self.ack.into());
        buf.put_u8(self.eom.into());
        buf.put_u16(self.remaining);
        buf.put_u16(self.content_length);
        buf.put_slice(&self.content);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PACKET_LEN);
        self.ser(&mut buf);
        buf
    }

    /// Reads exactly one packet. The content field is returned including padding, see
    ///  [Packet::text] for the actual message.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        if buf.remaining() < PACKET_LEN {
            bail!("packet too short: {} bytes, expected {}", buf.remaining(), PACKET_LEN);
        }

        // the length check above makes the slice copies safe
        let mut cid = [0u8; CID_LEN];
        buf.copy_to_slice(&mut cid);
        let ack = buf.try_get_u8()? != 0;
        let eom = buf.try_get_u8()? != 0;
        let remaining = buf.try_get_u16()?;
        let content_length = buf.try_get_u16()?;
        let mut content = [0u8; CONTENT_FIELD_LEN];
        buf.copy_to_slice(&mut content);

        let content_len: usize = content_length.safe_cast();
        if content_len > CONTENT_FIELD_LEN {
            bail!("invalid content length {}", content_length);
        }

        Ok(Packet {
            cid: Cid::from_raw(cid),
            ack,
            eom,
            remaining,
            content_length,
            content,
        })
    }

    /// The first `content_length` characters of the content field
    pub fn text(&self) -> anyhow::Result<String> {
        let decoded = std::str::from_utf8(&self.content)
            .context("packet content is not valid UTF-8")?;
        Ok(decoded.chars().take(self.content_length.safe_cast()).collect())
    }
}
