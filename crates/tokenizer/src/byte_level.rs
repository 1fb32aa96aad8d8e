//! Reversible byte <-> printable character mapping used by GPT-2 style BPE.
//!
//! Every byte is assigned a visible unicode character so that merge rules never
//! have to deal with whitespace or control bytes. Printable latin-1 bytes map to
//! themselves, the remaining 68 bytes are shifted into the `U+0100..` range in
//! increasing byte order.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ByteLevel {
    encoder: [char; 256],
    decoder: HashMap<char, u8>,
}

impl ByteLevel {
    pub fn new() -> Self {
        let mut encoder = [char::REPLACEMENT_CHARACTER; 256];
        let mut shifted = 0u32;
        for byte in 0..=255u8 {
            let printable = matches!(byte, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
            encoder[byte as usize] = if printable {
                char::from(byte)
            } else {
                let c = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
                shifted += 1;
                c
            };
        }

        let decoder = encoder
            .iter()
            .enumerate()
            .map(|(byte, c)| (*c, byte as u8))
            .collect();

        Self { encoder, decoder }
    }

    /// Maps raw text bytes to their printable stand-ins.
    pub fn encode(&self, text: &str) -> String {
        text.bytes().map(|b| self.encoder[b as usize]).collect()
    }

    /// Inverse of [`ByteLevel::encode`]. Characters outside the table are dropped.
    pub fn decode(&self, mapped: &str) -> String {
        let bytes: Vec<u8> = mapped
            .chars()
            .filter_map(|c| self.decoder.get(&c).copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Default for ByteLevel {
    fn default() -> Self {
        Self::new()
    }
}
