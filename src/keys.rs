use crate::cipher;
use anyhow::bail;
use rand::RngCore;
use std::fmt::{Debug, Formatter};

/// random bytes per key
pub const KEY_ENTROPY_LEN: usize = 32;
/// hex characters per key
pub const KEY_LEN: usize = 2 * KEY_ENTROPY_LEN;

/// A one-time-pad key as it travels in the handshake: a line of ASCII characters, 64 hex digits
///  for keys generated by this client.
///
/// Keys are XORed with message characters. Restricting them to ASCII guarantees that the result
///  is again a valid `char`.
#[derive(Clone, Eq, PartialEq)]
pub struct Key(String);

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "KEY{{{}..}}", prefix)
    }
}

impl Key {
    pub fn parse(s: &str) -> anyhow::Result<Key> {
        if !s.is_ascii() {
            bail!("key contains non-ASCII characters");
        }
        Ok(Key(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn generate_keys(count: usize) -> Vec<Key> {
    generate_keys_with(&mut rand::rng(), count)
}

/// `rng` must be cryptographically secure outside of tests
pub fn generate_keys_with(rng: &mut impl RngCore, count: usize) -> Vec<Key> {
    (0..count)
        .map(|_| {
            let mut raw = [0u8; KEY_ENTROPY_LEN];
            rng.fill_bytes(&mut raw);
            Key(hex::encode(raw))
        })
        .collect()
}


/// Position in one direction's key list. Each processed piece consumes exactly one key,
///  whatever its length, and keys are never revisited.
#[derive(Debug)]
pub struct KeyCursor {
    keys: Vec<Key>,
    next: usize,
}

impl KeyCursor {
    pub fn new(keys: Vec<Key>) -> KeyCursor {
        KeyCursor {
            keys,
            next: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.next
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Encrypts (or, which is the same, decrypts) a piece with the next key and advances
    pub fn apply(&mut self, piece: &str) -> String {
        let result = cipher::encrypt(piece, &self.keys, self.next);
        self.next += 1;
        result
    }
}
