//! AIS HDLC decoder (C8): NRZI decode, bit-destuffing, flag framing,
//! CRC-16 validation, and AIS message extraction.
//!
//! Grounded heavily on the teacher's `HdlcDeframer`: the `Unsynced`/
//! `Synced`/`FinalCheck` state shape, the bit-destuffing logic in the
//! `Synced` arm, and the `FCSTAB`/CRC computation all carry over
//! almost verbatim, since AIS's FCS is the same CRC-16-CCITT variant
//! AX.25 uses. What changes: NRZI decoding is folded in per bit ahead
//! of the state machine (grounded on `nrzi.rs`'s single-bit formula),
//! the frame-size ceiling is widened to 1024 bits, the CRC-bitfix
//! search is dropped entirely, a quick-stop table aborts obviously
//! invalid frames early, and the residue is checked the AIS way
//! (against the fixed magic constant) rather than by recomputing and
//! comparing to the received FCS.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, trace};

use crate::message::{bits_to_u32, AisMessage, Channel};
use crate::stream::{NCReadStream, NCWriteStream, ReadStream};
use crate::{Float, Result};
use crate::block::{Block, BlockRet};

/// Maximum frame size, in bits, before giving up and resynchronizing.
/// Widened from the teacher's 512-byte (4096-bit) ceiling down to a
/// bit-oriented 1024, since AIS frames are far shorter than AX.25's
/// and a tighter bound resynchronizes faster after noise.
const MAX_BITS: usize = 1024;

/// Floor below which a "frame" can't even hold its own FCS.
const MIN_BITS: usize = 16;

enum State {
    /// Looking for the flag pattern; the byte holds the last 8 raw
    /// (post-NRZI) bits seen, shifted in one at a time.
    Training(u8),
    /// Flag seen, accumulating frame bits. `u8` counts the current
    /// run of consecutive 1 bits (for destuffing and flag detection).
    Synced((u8, Vec<u8>)),
    /// Six consecutive 1s seen; the next bit decides whether this is
    /// the closing flag (0) or an abort (7 ones, always invalid).
    FinalCheck(Vec<u8>),
}

impl Default for State {
    fn default() -> Self {
        State::Training(0xff)
    }
}

/// One-way, data-free signals the decoder raises for the symbol
/// sampler driving it. The sampler side polls and clears these each
/// `work()` call; wiring the poll into a specific sampler instance is
/// the caller's job, since the generic block graph has no built-in
/// side channel between unconnected blocks.
#[derive(Debug, Default)]
pub struct DecoderSignals {
    stop_training: AtomicBool,
    reset: AtomicBool,
}

impl DecoderSignals {
    /// True, and cleared, if the decoder wants training stopped.
    pub fn take_stop_training(&self) -> bool {
        self.stop_training.swap(false, Ordering::AcqRel)
    }

    /// True, and cleared, if the decoder wants the sampler reset.
    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::AcqRel)
    }

    fn raise_stop_training(&self) {
        self.stop_training.store(true, Ordering::Release);
    }

    fn raise_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }
}

/// One condition a quick-stop rule checks against a frame's type or
/// MMSI field. Kept as data rather than a match arm so the table can
/// be overridden wholesale at construction time.
#[derive(Debug, Clone)]
pub enum QuickStopCondition {
    TypeGreaterThan(u8),
    TypeEquals(u8),
    TypeIn(&'static [u8]),
    TypeNotIn(&'static [u8]),
    MmsiGreaterThan(u32),
}

impl QuickStopCondition {
    fn violated(&self, bits: &[u8]) -> bool {
        match self {
            QuickStopCondition::TypeGreaterThan(n) => bits_to_u32(bits, 0, 6) as u8 > *n,
            QuickStopCondition::TypeEquals(n) => bits_to_u32(bits, 0, 6) as u8 == *n,
            QuickStopCondition::TypeIn(set) => set.contains(&(bits_to_u32(bits, 0, 6) as u8)),
            QuickStopCondition::TypeNotIn(set) => !set.contains(&(bits_to_u32(bits, 0, 6) as u8)),
            QuickStopCondition::MmsiGreaterThan(n) => bits_to_u32(bits, 8, 30) > *n,
        }
    }
}

/// Illegal (bit-length, message-type/MMSI) combination, checked as
/// soon as a frame reaches `length` bits, before the closing flag even
/// arrives. A frame is rejected if *any* condition holds.
#[derive(Debug, Clone)]
pub struct QuickStopRule {
    pub length: usize,
    pub conditions: Vec<QuickStopCondition>,
}

/// The default quick-stop table, consulted from the reference
/// decoder's canonical-length/impossible-type pairs.
#[must_use]
pub fn default_quick_stop_table() -> Vec<QuickStopRule> {
    use QuickStopCondition::*;
    vec![
        QuickStopRule { length: 8, conditions: vec![TypeGreaterThan(27), TypeEquals(0)] },
        QuickStopRule { length: 38, conditions: vec![MmsiGreaterThan(999_999_999)] },
        QuickStopRule { length: 96, conditions: vec![TypeEquals(10)] },
        QuickStopRule { length: 168, conditions: vec![TypeEquals(16)] },
        QuickStopRule { length: 184, conditions: vec![TypeIn(&[15, 20, 23])] },
        QuickStopRule { length: 192, conditions: vec![TypeNotIn(&[1, 2, 3, 4, 7, 9, 11, 18, 22, 24, 25, 27])] },
        QuickStopRule { length: 336, conditions: vec![TypeEquals(19)] },
        QuickStopRule { length: 385, conditions: vec![TypeEquals(21)] },
        QuickStopRule { length: 448, conditions: vec![TypeEquals(5)] },
    ]
}

fn quick_stop_violation(table: &[QuickStopRule], bits: &[u8]) -> bool {
    table
        .iter()
        .filter(|rule| rule.length == bits.len())
        .any(|rule| rule.conditions.iter().any(|c| c.violated(bits)))
}

const FCSTAB: &[u16] = &[
    0x0000, 0x1189, 0x2312, 0x329b, 0x4624, 0x57ad, 0x6536, 0x74bf, 0x8c48, //.
    0x9dc1, 0xaf5a, 0xbed3, 0xca6c, 0xdbe5, 0xe97e, 0xf8f7, 0x1081, 0x0108, //.
    0x3393, 0x221a, 0x56a5, 0x472c, 0x75b7, 0x643e, 0x9cc9, 0x8d40, 0xbfdb, //.
    0xae52, 0xdaed, 0xcb64, 0xf9ff, 0xe876, 0x2102, 0x308b, 0x0210, 0x1399, //.
    0x6726, 0x76af, 0x4434, 0x55bd, 0xad4a, 0xbcc3, 0x8e58, 0x9fd1, 0xeb6e, //.
    0xfae7, 0xc87c, 0xd9f5, 0x3183, 0x200a, 0x1291, 0x0318, 0x77a7, 0x662e, //.
    0x54b5, 0x453c, 0xbdcb, 0xac42, 0x9ed9, 0x8f50, 0xfbef, 0xea66, 0xd8fd, //.
    0xc974, 0x4204, 0x538d, 0x6116, 0x709f, 0x0420, 0x15a9, 0x2732, 0x36bb, //.
    0xce4c, 0xdfc5, 0xed5e, 0xfcd7, 0x8868, 0x99e1, 0xab7a, 0xbaf3, 0x5285, //.
    0x430c, 0x7197, 0x601e, 0x14a1, 0x0528, 0x37b3, 0x263a, 0xdecd, 0xcf44, //.
    0xfddf, 0xec56, 0x98e9, 0x8960, 0xbbfb, 0xaa72, 0x6306, 0x728f, 0x4014, //.
    0x519d, 0x2522, 0x34ab, 0x0630, 0x17b9, 0xef4e, 0xfec7, 0xcc5c, 0xddd5, //.
    0xa96a, 0xb8e3, 0x8a78, 0x9bf1, 0x7387, 0x620e, 0x5095, 0x411c, 0x35a3, //.
    0x242a, 0x16b1, 0x0738, 0xffcf, 0xee46, 0xdcdd, 0xcd54, 0xb9eb, 0xa862, //.
    0x9af9, 0x8b70, 0x8408, 0x9581, 0xa71a, 0xb693, 0xc22c, 0xd3a5, 0xe13e, //.
    0xf0b7, 0x0840, 0x19c9, 0x2b52, 0x3adb, 0x4e64, 0x5fed, 0x6d76, 0x7cff, //.
    0x9489, 0x8500, 0xb79b, 0xa612, 0xd2ad, 0xc324, 0xf1bf, 0xe036, 0x18c1, //.
    0x0948, 0x3bd3, 0x2a5a, 0x5ee5, 0x4f6c, 0x7df7, 0x6c7e, 0xa50a, 0xb483, //.
    0x8618, 0x9791, 0xe32e, 0xf2a7, 0xc03c, 0xd1b5, 0x2942, 0x38cb, 0x0a50, //.
    0x1bd9, 0x6f66, 0x7eef, 0x4c74, 0x5dfd, 0xb58b, 0xa402, 0x9699, 0x8710, //.
    0xf3af, 0xe226, 0xd0bd, 0xc134, 0x39c3, 0x284a, 0x1ad1, 0x0b58, 0x7fe7, //.
    0x6e6e, 0x5cf5, 0x4d7c, 0xc60c, 0xd785, 0xe51e, 0xf497, 0x8028, 0x91a1, //.
    0xa33a, 0xb2b3, 0x4a44, 0x5bcd, 0x6956, 0x78df, 0x0c60, 0x1de9, 0x2f72, //.
    0x3efb, 0xd68d, 0xc704, 0xf59f, 0xe416, 0x90a9, 0x8120, 0xb3bb, 0xa232, //.
    0x5ac5, 0x4b4c, 0x79d7, 0x685e, 0x1ce1, 0x0d68, 0x3ff3, 0x2e7a, 0xe70e, //.
    0xf687, 0xc41c, 0xd595, 0xa12a, 0xb0a3, 0x8238, 0x93b1, 0x6b46, 0x7acf, //.
    0x4854, 0x59dd, 0x2d62, 0x3ceb, 0x0e70, 0x1ff9, 0xf78f, 0xe606, 0xd49d, //.
    0xc514, 0xb1ab, 0xa022, 0x92b9, 0x8330, 0x7bc7, 0x6a4e, 0x58d5, 0x495c, //.
    0x3de3, 0x2c6a, 0x1ef1, 0x0f78,
];

/// The fixed residue a valid AIS/HDLC frame (including its trailing
/// FCS) reduces to under this CRC, per the AIS spec's `~0x0F47`.
const CRC_VALID_RESIDUE: u16 = !0x0F47u16;

/// Fold `data` (including its trailing FCS bytes) through the
/// CRC-16-CCITT table; a valid frame's residue equals
/// [`CRC_VALID_RESIDUE`].
fn crc_residue(data: &[u8]) -> u16 {
    data.iter().fold(0xffffu16, |fcs, byte| {
        let byte = *byte as u16;
        let ofs = ((fcs ^ byte) & 0xff) as usize;
        (fcs >> 8) ^ FCSTAB[ofs]
    })
}

/// 8 destuffed bits, in HDLC's LSB-first-per-octet transmission order.
fn bits2byte(data: &[u8]) -> u8 {
    debug_assert_eq!(data.len(), 8);
    (0..8).fold(0u8, |acc, i| acc | (data[i] << i))
}

/// Decodes NRZI HDLC-framed bits into validated [`AisMessage`]s.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct AisDecoder {
    #[dsp(in)]
    src: ReadStream<u8>,
    #[dsp(out)]
    dst: NCWriteStream<AisMessage>,
    channel: Channel,
    signal_level_db: Option<Float>,
    ppm: Option<Float>,
    signals: Arc<DecoderSignals>,
    quick_stop_table: Vec<QuickStopRule>,
    state: State,
    prev_d: u8,
    training: bool,
    decoded: u64,
    crc_error: u64,
    quick_stopped: u64,
}

impl Drop for AisDecoder {
    fn drop(&mut self) {
        info!(
            "AisDecoder({:?}): decoded {}, CRC errors {}, quick-stopped {}",
            self.channel, self.decoded, self.crc_error, self.quick_stopped
        );
    }
}

impl AisDecoder {
    /// Build a decoder for one channel. `signal_level_db`/`ppm` carry
    /// through to every emitted message, if upstream tags are
    /// enabled. Returns the read side of the message stream, plus the
    /// signal handle the caller should have the driving sampler poll
    /// each iteration.
    #[must_use]
    pub fn new(
        src: ReadStream<u8>,
        channel: Channel,
        signal_level_db: Option<Float>,
        ppm: Option<Float>,
    ) -> (Self, NCReadStream<AisMessage>, Arc<DecoderSignals>) {
        let (dst, dst_read) = crate::stream::new_nocopy_stream();
        let signals = Arc::new(DecoderSignals::default());
        (
            Self {
                src,
                dst,
                channel,
                signal_level_db,
                ppm,
                signals: signals.clone(),
                quick_stop_table: default_quick_stop_table(),
                state: State::default(),
                prev_d: 0,
                training: true,
                decoded: 0,
                crc_error: 0,
                quick_stopped: 0,
            },
            dst_read,
            signals,
        )
    }

    /// Count of frames successfully decoded so far.
    #[must_use]
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Count of frames whose CRC failed to validate so far.
    #[must_use]
    pub fn crc_error_count(&self) -> u64 {
        self.crc_error
    }

    /// As [`Self::new`], but with a caller-supplied quick-stop table
    /// instead of [`default_quick_stop_table`].
    #[must_use]
    pub fn with_quick_stop_table(
        src: ReadStream<u8>,
        channel: Channel,
        signal_level_db: Option<Float>,
        ppm: Option<Float>,
        quick_stop_table: Vec<QuickStopRule>,
    ) -> (Self, NCReadStream<AisMessage>, Arc<DecoderSignals>) {
        let (mut dec, dst_read, signals) = Self::new(src, channel, signal_level_db, ppm);
        dec.quick_stop_table = quick_stop_table;
        (dec, dst_read, signals)
    }

    fn emit(&mut self, frame_bits: Vec<u8>) {
        if frame_bits.len() % 8 != 0 {
            trace!("AisDecoder: frame not a multiple of 8 bits ({})", frame_bits.len());
            return;
        }
        if frame_bits.len() < MIN_BITS {
            trace!("AisDecoder: frame too short ({} bits)", frame_bits.len());
            return;
        }
        let bytes: Vec<u8> = (0..frame_bits.len())
            .step_by(8)
            .map(|i| bits2byte(&frame_bits[i..i + 8]))
            .collect();
        if crc_residue(&bytes) != CRC_VALID_RESIDUE {
            self.crc_error += 1;
            debug!("AisDecoder: CRC mismatch, discarding frame");
            return;
        }
        let payload_bits = &frame_bits[..frame_bits.len() - 16];
        // NMEA sentences are filled in downstream by `NmeaPackager`, which
        // keeps the group-id cycling state this decoder has no reason to own.
        let msg = AisMessage::from_bits(payload_bits, self.channel, self.signal_level_db, self.ppm);
        self.decoded += 1;
        if self.training {
            self.training = false;
            self.signals.raise_stop_training();
        }
        self.signals.raise_reset();
        self.dst.push(msg, &[]);
    }

    fn step(&mut self, bit: u8) -> State {
        match &mut self.state {
            State::Training(v) => {
                let n = (*v >> 1) | (bit << 7);
                if n == 0x7e {
                    trace!("AisDecoder: flag found");
                    State::Synced((0, Vec::new()))
                } else {
                    State::Training(n)
                }
            }
            State::Synced((ones, inbits)) => {
                let mut bits = Vec::new();
                std::mem::swap(&mut bits, inbits);
                if bits.len() >= MAX_BITS {
                    self.training = true;
                    self.signals.raise_reset();
                    return State::Training(0xff);
                }
                if bit > 0 {
                    bits.push(1);
                    if *ones == 5 {
                        State::FinalCheck(bits)
                    } else {
                        if quick_stop_violation(&self.quick_stop_table, &bits) {
                            self.quick_stopped += 1;
                            self.training = true;
                            self.signals.raise_reset();
                            return State::Training(0xff);
                        }
                        State::Synced((*ones + 1, bits))
                    }
                } else if *ones == 5 {
                    // Stuffed zero: discard it, don't append.
                    State::Synced((0, bits))
                } else {
                    bits.push(0);
                    if quick_stop_violation(&self.quick_stop_table, &bits) {
                        self.quick_stopped += 1;
                        self.training = true;
                        self.signals.raise_reset();
                        return State::Training(0xff);
                    }
                    State::Synced((0, bits))
                }
            }
            State::FinalCheck(inbits) => {
                let mut bits = Vec::new();
                std::mem::swap(&mut bits, inbits);
                if bit == 1 {
                    // Seven 1s in a row: always invalid.
                    self.training = true;
                    self.signals.raise_reset();
                    return State::Training(0xff);
                }
                if bits.len() >= 7 {
                    bits.truncate(bits.len() - 7);
                    self.emit(bits);
                } else {
                    trace!("AisDecoder: closing flag too short to hold a frame");
                }
                State::Synced((0, Vec::new()))
            }
        }
    }
}

impl Block for AisDecoder {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.is_empty() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }
        for &d in input.slice() {
            let b = 1 ^ d ^ self.prev_d;
            self.prev_d = d;
            self.state = self.step(b);
        }
        let n = input.len();
        input.consume(n);
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str2bits(s: &str) -> Vec<u8> {
        s.chars()
            .map(|ch| match ch {
                '1' => 1,
                '0' => 0,
                _ => panic!("invalid bitstring: {s}"),
            })
            .collect()
    }

    /// NRZI-encode a plain (pre-NRZI) HDLC bitstream, so tests can
    /// write frames the way the §4.8 examples do (flag/payload as
    /// literal line-code-free bits) and feed the post-NRZI decoder.
    fn nrzi_encode(bits: &[u8]) -> Vec<u8> {
        let mut prev = 0u8;
        bits.iter()
            .map(|&b| {
                // Inverse of B = NOT(d XOR prev_d): d = NOT(B) XOR prev_d.
                let d = (1 ^ b) ^ prev;
                prev = d;
                d
            })
            .collect()
    }

    #[test]
    fn quick_stop_table_flags_impossible_type_at_8_bits() {
        let table = default_quick_stop_table();
        assert!(quick_stop_violation(&table, &str2bits("000000000")[..8]));
        assert!(!quick_stop_violation(&table, &str2bits("00000100")));
    }

    #[test]
    fn crc_residue_matches_valid_constant_for_known_good_frame() {
        // A single 0x00 byte with its correct CRC-16-CCITT FCS.
        let crc = {
            let c = crc_residue(&[0x00]) ^ 0xffff;
            c.to_le_bytes()
        };
        let bytes = [0x00, crc[0], crc[1]];
        assert_eq!(crc_residue(&bytes), CRC_VALID_RESIDUE);
    }

    #[test]
    fn nrzi_round_trip_identity() {
        let bits = str2bits("0111111001010101");
        let encoded = nrzi_encode(&bits);
        let mut prev = 0u8;
        let decoded: Vec<u8> = encoded
            .iter()
            .map(|&d| {
                let b = 1 ^ d ^ prev;
                prev = d;
                b
            })
            .collect();
        assert_eq!(decoded, bits);
    }

    #[test]
    fn end_to_end_flag_only_stream_produces_no_message() -> Result<()> {
        // Flag, flag: no payload between them, so no message should
        // be emitted, but the decoder shouldn't panic or desync badly.
        let bits = str2bits("0111111001111110");
        let encoded = nrzi_encode(&bits);
        let s = ReadStream::from_slice(&encoded);
        let (mut dec, out, _sig) = AisDecoder::new(s, Channel::A, None, None);
        dec.work()?;
        assert!(out.pop().is_none());
        Ok(())
    }
}
