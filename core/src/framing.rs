//! Bit framing: payload bytes to a transmit-ready bit sequence and back.
//!
//! Packing concatenates the payload bits, pads with a fixed filler byte
//! until the sequence fills the block grid, and appends CRC parity bits.
//! Unpacking strips the parity, removes every filler occurrence and
//! regroups the rest into bytes.

use log::warn;

use crate::crc::CyclicRedundancyCode;
use crate::error::{Result, SonalinkError};
use crate::profile::Profile;
use crate::FILLER_PATTERN;

/// Expands one byte into its 8 bits, most significant first.
pub fn byte_to_bits(byte: u8) -> [u8; 8] {
    let mut bits = [0u8; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> (7 - i)) & 1;
    }
    bits
}

/// Regroups a bit sequence into bytes, most significant bit first.
///
/// A trailing group shorter than 8 bits is a tolerated soft failure: it is
/// logged and dropped, never an error. This only occurs on corrupted or
/// foreign bit streams.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    if bits.len() % 8 != 0 {
        warn!(
            "bit stream length {} is not a multiple of eight; truncating the remainder",
            bits.len()
        );
    }
    bits.chunks_exact(8)
        .map(|group| group.iter().fold(0u8, |acc, &b| (acc << 1) | b))
        .collect()
}

/// Flips every bit of a block.
pub fn invert(block: &[u8]) -> Vec<u8> {
    block.iter().map(|&b| b ^ 1).collect()
}

/// Splits a bit sequence into blocks of `num_frequencies` bits each.
///
/// Under correct padding the length is always an exact multiple of the
/// block width; a trailing partial block is zero-filled rather than
/// rejected so a corrupted stream cannot panic the decode path.
pub fn split_into_blocks(bits: &[u8], num_frequencies: usize) -> Vec<Vec<u8>> {
    debug_assert!(
        bits.len() % num_frequencies == 0,
        "padded bit sequence must fill whole blocks"
    );
    bits.chunks(num_frequencies)
        .map(|chunk| {
            let mut block = chunk.to_vec();
            block.resize(num_frequencies, 0);
            block
        })
        .collect()
}

pub struct BitFramer {
    crc: CyclicRedundancyCode,
}

impl BitFramer {
    pub fn new() -> Self {
        Self {
            crc: CyclicRedundancyCode::new(),
        }
    }

    pub fn with_crc(crc: CyclicRedundancyCode) -> Self {
        Self { crc }
    }

    pub fn crc(&self) -> &CyclicRedundancyCode {
        &self.crc
    }

    /// Packs a payload into the padded, CRC-protected bit sequence.
    ///
    /// The capacity check runs before any padding: payloads longer than
    /// `num_message_blocks * (num_frequencies / 8) - 2` bytes fail with
    /// `PayloadTooLarge`. Filler bytes are appended while the sequence
    /// (including the future parity bits) does not fill whole blocks or the
    /// payload area is not yet at its minimum size; the parity bits are
    /// computed over the padded sequence and appended last.
    pub fn pack(&self, payload: &[u8], profile: &Profile) -> Result<Vec<u8>> {
        let capacity = profile.byte_capacity();
        if payload.len() > capacity {
            return Err(SonalinkError::PayloadTooLarge {
                size: payload.len(),
                capacity,
            });
        }

        let num_frequencies = profile.num_frequencies();
        let parity_len = self.crc.parity_len();

        let mut bits = Vec::with_capacity(profile.num_message_blocks() * num_frequencies);
        for &byte in payload {
            bits.extend_from_slice(&byte_to_bits(byte));
        }

        while (bits.len() + parity_len) % num_frequencies != 0 || bits.len() / 8 < capacity {
            bits.extend_from_slice(&FILLER_PATTERN);
        }

        let parity = self.crc.parity_bits(&bits);
        bits.extend(parity);

        debug_assert_eq!(
            bits.len(),
            profile.num_message_blocks() * num_frequencies,
            "packed sequence must fill the payload block grid exactly"
        );
        Ok(bits)
    }

    /// Reverses `pack`: strips the trailing parity bits, removes every
    /// filler occurrence from the 8-bit groups and regroups the remainder
    /// into payload bytes. Operates best-effort on malformed input.
    pub fn unpack(&self, bits: &[u8]) -> Vec<u8> {
        let parity_len = self.crc.parity_len();
        if bits.len() < parity_len {
            warn!(
                "bit stream of {} bits is shorter than the {} parity bits",
                bits.len(),
                parity_len
            );
            return Vec::new();
        }

        let body = &bits[..bits.len() - parity_len];
        let mut kept = Vec::with_capacity(body.len());
        for group in body.chunks(8) {
            if group != FILLER_PATTERN {
                kept.extend_from_slice(group);
            }
        }
        bits_to_bytes(&kept)
    }
}

impl Default for BitFramer {
    fn default() -> Self {
        Self::new()
    }
}
