//! Splitting of outgoing messages into pieces that fit into a single packet. Sizes and counts are
//!  in characters: that is what the server counts, and what keys and parity operate on. Each
//!  piece is additionally bounded by the bytes its encrypted and parity-expanded form takes in
//!  the content field.

use crate::packet::CONTENT_FIELD_LEN;
use anyhow::bail;

/// Upper bound for the piece size: the length of a key. 64 characters always fit the content
///  field if they are ASCII or Latin-1, other text ends pieces earlier.
pub const MAX_PIECE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Piece<'a> {
    pub content: &'a str,
    /// characters of the message that come *after* this piece
    pub remaining: usize,
}

/// The most UTF-8 bytes `c` can take on the wire after XOR with any ASCII key byte and, if
///  `parity` is set, the parity shift.
///
/// XOR with an ASCII byte keeps a character within its aligned block of 128 scalar values, so
///  the block's largest value is the worst case.
pub fn wire_len(c: char, parity: bool) -> usize {
    let block_max = c as u32 | 0x7f;
    let value = if parity { (block_max << 1) | 1 } else { block_max };
    match value {
        0..=0x7f => 1,
        0x80..=0x7ff => 2,
        0x800..=0xffff => 3,
        _ => 4,
    }
}

/// Pieces of at most `piece_size` characters and at most [CONTENT_FIELD_LEN] bytes on the wire,
///  in their original order. An empty message has no pieces.
pub fn split(message: &str, piece_size: usize, parity: bool) -> anyhow::Result<Vec<&str>> {
    if piece_size == 0 {
        bail!("piece size must be positive");
    }

    let mut pieces = Vec::new();
    let mut rest = message;
    while !rest.is_empty() {
        let mut end = 0;
        let mut num_chars = 0;
        let mut num_bytes = 0;
        for (idx, c) in rest.char_indices() {
            let len = wire_len(c, parity);
            if num_chars == piece_size || num_bytes + len > CONTENT_FIELD_LEN {
                break;
            }
            num_chars += 1;
            num_bytes += len;
            end = idx + c.len_utf8();
        }

        // a single character never exceeds the content field, so `end` is past the first one
        let (piece, tail) = rest.split_at(end);
        pieces.push(piece);
        rest = tail;
    }
    Ok(pieces)
}

/// characters not yet sent, never negative
pub fn remaining(message_length: usize, sent_so_far: usize) -> usize {
    message_length.saturating_sub(sent_so_far)
}

/// [split], with each piece annotated with the number of characters following it
pub fn pieces(message: &str, piece_size: usize, parity: bool) -> anyhow::Result<impl Iterator<Item = Piece<'_>>> {
    let message_length = message.chars().count();
    let mut sent_so_far = 0;

    Ok(split(message, piece_size, parity)?
        .into_iter()
        .map(move |content| {
            sent_so_far += content.chars().count();
            Piece {
                content,
                remaining: remaining(message_length, sent_so_far),
            }
        }))
}
