//! Sample source adapter (C1): raw device-native bytes to normalized
//! complex float32 samples.
//!
//! This is the narrow boundary between whatever produced the raw byte
//! block (a device driver, a file reader — out of scope for this
//! crate) and the DSP pipeline proper. The format is fixed for the
//! lifetime of the source, matching the external contract that a
//! source "declares its sample rate and must not change it."
use log::info;

use crate::block::{Block, BlockRet};
use crate::message::RawFormat;
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Float, Result};

/// Converts a stream of raw bytes in one [`RawFormat`] into a stream of
/// normalized [`Complex`] samples in [-1, 1).
#[derive(aiscore_macros::Block)]
#[dsp(crate, new)]
pub struct SampleSource {
    #[dsp(in)]
    src: ReadStream<u8>,
    #[dsp(out)]
    dst: WriteStream<Complex>,
    format: RawFormat,
    #[dsp(default)]
    leftover: Vec<u8>,
    #[dsp(default)]
    produced: u64,
}

impl SampleSource {
    /// Raw bytes consumed per group of output samples.
    fn group_bytes(&self) -> usize {
        match self.format {
            RawFormat::Cu8 | RawFormat::Cs8 => 2,
            RawFormat::Cs16 => 4,
            RawFormat::Cf32 => 8,
            RawFormat::F32Fs4 => 16,
        }
    }

    /// Output samples produced per group of raw bytes.
    fn group_samples(&self) -> usize {
        match self.format {
            RawFormat::F32Fs4 => 4,
            _ => 1,
        }
    }

    fn decode_group(&self, g: &[u8]) -> Vec<Complex> {
        match self.format {
            RawFormat::Cu8 => vec![Complex::new(
                (g[0] as Float - 128.0) / 128.0,
                (g[1] as Float - 128.0) / 128.0,
            )],
            RawFormat::Cs8 => vec![Complex::new(
                (g[0] as i8) as Float / 128.0,
                (g[1] as i8) as Float / 128.0,
            )],
            RawFormat::Cs16 => {
                let i = i16::from_le_bytes([g[0], g[1]]) as Float / 32768.0;
                let q = i16::from_le_bytes([g[2], g[3]]) as Float / 32768.0;
                vec![Complex::new(i, q)]
            }
            RawFormat::Cf32 => {
                let i = Float::from_le_bytes([g[0], g[1], g[2], g[3]]);
                let q = Float::from_le_bytes([g[4], g[5], g[6], g[7]]);
                vec![Complex::new(i, q)]
            }
            RawFormat::F32Fs4 => {
                let f: Vec<Float> = g
                    .chunks_exact(4)
                    .map(|b| Float::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                vec![
                    Complex::new(f[0], 0.0),
                    Complex::new(0.0, f[1]),
                    Complex::new(-f[2], 0.0),
                    Complex::new(0.0, -f[3]),
                ]
            }
        }
    }

    /// Total samples produced over the lifetime of this source.
    #[must_use]
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl Drop for SampleSource {
    fn drop(&mut self) {
        info!("SampleSource: produced {} samples", self.produced);
    }
}

impl Block for SampleSource {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if !input.is_empty() {
            self.leftover.extend_from_slice(input.slice());
            let n = input.len();
            input.consume(n);
        } else if self.leftover.len() < self.group_bytes() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }

        let group_bytes = self.group_bytes();
        let groups = self.leftover.len() / group_bytes;
        if groups == 0 {
            return Ok(BlockRet::Noop);
        }

        let group_samples = self.group_samples();
        let mut o = self.dst.write_buf()?;
        let want_groups = (o.len() / group_samples).min(groups);
        if want_groups == 0 {
            return Ok(BlockRet::WaitForStream(self.dst.id(), group_samples));
        }

        let mut produced = 0usize;
        for g in 0..want_groups {
            let chunk = &self.leftover[g * group_bytes..(g + 1) * group_bytes];
            for s in self.decode_group(chunk) {
                o.slice()[produced] = s;
                produced += 1;
            }
        }
        self.leftover.drain(0..want_groups * group_bytes);
        o.produce(produced, &[]);
        self.produced += produced as u64;
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn cu8_midscale_is_zero() -> Result<()> {
        let s = ReadStream::from_slice(&[128u8, 128u8]);
        let (mut src, dst) = SampleSource::new(s, RawFormat::Cu8);
        src.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.slice(), &[Complex::new(0.0, 0.0)]);
        Ok(())
    }

    #[test]
    fn cs16_full_scale() -> Result<()> {
        let mut bytes = Vec::new();
        bytes.extend(16384i16.to_le_bytes());
        bytes.extend((-16384i16).to_le_bytes());
        let s = ReadStream::from_slice(&bytes);
        let (mut src, dst) = SampleSource::new(s, RawFormat::Cs16);
        src.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.slice(), &[Complex::new(0.5, -0.5)]);
        Ok(())
    }

    #[test]
    fn f32fs4_expands_one_group_to_four_samples() -> Result<()> {
        let mut bytes = Vec::new();
        for f in [1.0f32, 2.0, 3.0, 4.0] {
            bytes.extend(f.to_le_bytes());
        }
        let s = ReadStream::from_slice(&bytes);
        let (mut src, dst) = SampleSource::new(s, RawFormat::F32Fs4);
        src.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(
            r.slice(),
            &[
                Complex::new(1.0, 0.0),
                Complex::new(0.0, 2.0),
                Complex::new(-3.0, 0.0),
                Complex::new(0.0, -4.0),
            ]
        );
        Ok(())
    }

    #[test]
    fn partial_group_is_buffered_until_more_bytes_arrive() -> Result<()> {
        let s = ReadStream::from_slice(&[128u8]);
        let (mut src, dst) = SampleSource::new(s, RawFormat::Cu8);
        assert!(matches!(
            src.work()?,
            BlockRet::WaitForStream(_, _) | BlockRet::Noop
        ));
        let (r, _) = dst.read_buf()?;
        assert!(r.is_empty());
        Ok(())
    }
}
