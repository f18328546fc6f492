//! Even parity per character: a character is shifted left by one bit, and the vacated lowest bit
//!  holds the parity of the original value's population count.
//!
//! Parity applies to the (encrypted) characters of regular pieces only. The server's final EOM
//!  packet carries neither parity nor encryption.

use anyhow::anyhow;

/// 1 if `value` has an odd number of set bits, 0 otherwise
pub fn parity_of(value: u32) -> u32 {
    value.count_ones() & 1
}

/// `None` if the shifted value is no valid `char` - that cannot happen for the characters the
///  protocol actually transports (which are well below 0x800)
pub fn add_parity(c: char) -> Option<char> {
    let value = c as u32;
    char::from_u32((value << 1) | parity_of(value))
}

pub fn remove_parity(c: char) -> Option<char> {
    char::from_u32(c as u32 >> 1)
}

/// Verifies that the stored parity bit (the lowest bit) of every character matches the parity
///  of the character's remaining bits. An empty text has nothing to verify and passes.
pub fn check_parity(text: &str) -> bool {
    text.chars()
        .map(|c| c as u32)
        .all(|value| value & 1 == parity_of(value >> 1))
}

pub fn add_parity_to_message(text: &str) -> anyhow::Result<String> {
    text.chars()
        .map(|c| add_parity(c).ok_or_else(|| anyhow!("character {:?} cannot carry a parity bit", c)))
        .collect()
}

pub fn remove_parity_from_message(text: &str) -> anyhow::Result<String> {
    text.chars()
        .map(|c| remove_parity(c).ok_or_else(|| anyhow!("stripping the parity bit from {:?} does not yield a valid character", c)))
        .collect()
}
