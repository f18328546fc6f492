//! One-time-pad stream cipher: character `i` of a piece is XORed with byte `i` of the piece's key.

use crate::keys::Key;
use crate::util::safe_converter::SafeCast;
use tracing::{trace, warn};

/// Encrypts `piece` with `keys[key_index]`. If there is no such key, the piece is returned
///  unchanged: once the pad is used up, communication continues in plaintext.
///
/// Characters beyond the key's length are passed through as well. Piece sizes are limited to
///  the key length, so this does not happen for keys generated by this client.
pub fn encrypt(piece: &str, keys: &[Key], key_index: usize) -> String {
    let Some(key) = keys.get(key_index) else {
        if !keys.is_empty() {
            warn!("out of keys ({} available, #{} requested) - piece is not encrypted", keys.len(), key_index);
        }
        return piece.to_string();
    };

    trace!("XOR with key #{}", key_index);
    let key = key.as_bytes();
    piece.chars()
        .enumerate()
        .map(|(i, c)| match key.get(i) {
            Some(&k) => xor_char(c, k),
            None => c,
        })
        .collect()
}

/// XOR is its own inverse
pub fn decrypt(piece: &str, keys: &[Key], key_index: usize) -> String {
    encrypt(piece, keys, key_index)
}

fn xor_char(c: char, key_byte: u8) -> char {
    debug_assert!(key_byte.is_ascii());
    let key_value: u32 = key_byte.safe_cast();
    // flipping the lowest 7 bits of a scalar value can never reach the surrogate range
    char::from_u32(c as u32 ^ key_value)
        .expect("this is a bug: keys are ASCII, so XOR must yield a valid char")
}
