//! The data types crossing the core's external boundary: the raw
//! sample source contract and the decoded-message sink contract.

use crate::{Error, Result};

/// Raw, device-native sample format delivered by the sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RawFormat {
    /// Unsigned 8-bit I/Q, centered at 128.
    Cu8,
    /// Signed 8-bit I/Q.
    Cs8,
    /// Signed 16-bit I/Q, little-endian.
    Cs16,
    /// 32-bit float I/Q, already normalized.
    Cf32,
    /// 32-bit float, real samples pre-shifted to sit at f_s/4.
    F32Fs4,
}

impl std::str::FromStr for RawFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cu8" => Ok(RawFormat::Cu8),
            "cs8" => Ok(RawFormat::Cs8),
            "cs16" => Ok(RawFormat::Cs16),
            "cf32" => Ok(RawFormat::Cf32),
            "f32fs4" => Ok(RawFormat::F32Fs4),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// AIS channel letter, per ITU-R M.1371.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Channel {
    /// 161.975 MHz.
    A,
    /// 162.025 MHz.
    B,
    /// Channel C, used by some regional/simplex assignments.
    C,
    /// Channel D, used by some regional/simplex assignments.
    D,
}

impl Channel {
    /// The single-letter NMEA channel designator.
    #[must_use]
    pub fn letter(&self) -> char {
        match self {
            Channel::A => 'A',
            Channel::B => 'B',
            Channel::C => 'C',
            Channel::D => 'D',
        }
    }
}

/// A fully decoded, validated AIS message: the record handed to the
/// message sink, per the external interface contract.
#[derive(Debug, Clone, PartialEq)]
pub struct AisMessage {
    /// The NMEA AIVDM sentence(s) this message was packaged into.
    pub nmea: Vec<String>,

    /// Raw payload bits, packed MSB-first, CRC stripped.
    pub payload_bits: Vec<u8>,

    /// Number of valid payload bits (payload_bits may be padded to a
    /// byte boundary).
    pub bit_length: usize,

    /// Channel the message was received on.
    pub channel: Channel,

    /// Cached MMSI (bits 8..37).
    pub mmsi: u32,

    /// Cached message type (bits 0..5).
    pub message_type: u8,

    /// Cached repeat indicator (bits 6..7).
    pub repeat_indicator: u8,

    /// Estimated signal level in dB, if the tag was enabled upstream.
    pub signal_level_db: Option<f32>,

    /// Estimated carrier offset in ppm, if the tag was enabled upstream.
    pub ppm: Option<f32>,
}

impl AisMessage {
    /// Extract `message_type`, `repeat_indicator`, and `mmsi` from
    /// already-validated payload bits (one bit per byte, MSB-first
    /// packing order, matching [`crate::ais_decoder`]'s frame buffer).
    #[must_use]
    pub fn from_bits(
        bits: &[u8],
        channel: Channel,
        signal_level_db: Option<f32>,
        ppm: Option<f32>,
    ) -> Self {
        let bit_length = bits.len();
        let message_type = bits_to_u32(bits, 0, 6) as u8;
        let repeat_indicator = bits_to_u32(bits, 6, 2) as u8;
        let mmsi = bits_to_u32(bits, 8, 30);
        let payload_bits = pack_bits(bits);
        Self {
            nmea: Vec::new(),
            payload_bits,
            bit_length,
            channel,
            mmsi,
            message_type,
            repeat_indicator,
            signal_level_db,
            ppm,
        }
    }
}

/// Read `len` bits (MSB-first within the field) starting at `start`,
/// as an unsigned integer. Matches the AIS bit-field convention used
/// throughout ITU-R M.1371 (bit 0 is the first bit received).
#[must_use]
pub(crate) fn bits_to_u32(bits: &[u8], start: usize, len: usize) -> u32 {
    let mut v: u32 = 0;
    for i in 0..len {
        v <<= 1;
        if let Some(&b) = bits.get(start + i) {
            v |= b as u32;
        }
    }
    v
}

fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u8, |acc, &b| (acc << 1) | (b & 1))
                << (8 - chunk.len())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_field_extraction_matches_type1() {
        // Type 1, repeat 0, MMSI 227006760, as an explicit bit vector.
        let mut bits = Vec::new();
        bits.extend(u32_to_bits(1, 6));
        bits.extend(u32_to_bits(0, 2));
        bits.extend(u32_to_bits(227006760, 30));
        bits.extend(vec![0u8; 168 - bits.len()]);
        let msg = AisMessage::from_bits(&bits, Channel::A, None, None);
        assert_eq!(msg.message_type, 1);
        assert_eq!(msg.repeat_indicator, 0);
        assert_eq!(msg.mmsi, 227006760);
        assert_eq!(msg.bit_length, 168);
    }

    fn u32_to_bits(v: u32, len: usize) -> Vec<u8> {
        (0..len).map(|i| ((v >> (len - 1 - i)) & 1) as u8).collect()
    }
}
