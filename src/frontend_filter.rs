//! Per-channel front-end filter (C4): decimates a baseband-shifted
//! channel from 96 kHz to 48 kHz with a CIC-5 stage, then applies a
//! matched receiver FIR.
//!
//! Reuses the CIC stage from [`crate::downsampler`] and the tap
//! designer from [`crate::fir`], grounded the same way as those
//! modules (no direct teacher file; standard decimate-then-match
//! idiom).
use crate::block::{Block, BlockRet};
use crate::downsampler::Cic5Stage;
use crate::fir::{low_pass, FIR};
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Float, Result};

/// Output rate of this stage, in Hz.
pub const OUTPUT_RATE: Float = 48_000.0;

/// Decimates a 96 kHz per-channel stream to 48 kHz and applies a
/// matched receiver filter.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct FrontEndFilter {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst: WriteStream<Complex>,
    cic: Cic5Stage,
    fir: FIR<Complex>,
    fir_len: usize,
    history: Vec<Complex>,
    pending: std::collections::VecDeque<Complex>,
}

impl FrontEndFilter {
    /// Build a front-end filter. `taps` channel bandwidth (Hz) and
    /// transition width (Hz) are fixed at design time, matching the
    /// receiver-matched filter the specification calls for.
    #[must_use]
    pub fn new(src: ReadStream<Complex>) -> (Self, ReadStream<Complex>) {
        let taps = low_pass(96_000.0, 9_600.0, 2_400.0);
        let n = taps.len();
        let (dst, dst_read) = WriteStream::new();
        (
            Self {
                src,
                dst,
                cic: Cic5Stage::default(),
                fir: FIR::new(&taps),
                fir_len: n,
                history: vec![Complex::new(0.0, 0.0); n],
                pending: std::collections::VecDeque::new(),
            },
            dst_read,
        )
    }
}

impl Block for FrontEndFilter {
    fn work(&mut self) -> Result<BlockRet> {
        if self.pending.is_empty() {
            let (input, _tags) = self.src.read_buf()?;
            if input.is_empty() {
                return Ok(BlockRet::WaitForStream(self.src.id(), 1));
            }
            let n = input.len();
            let decimated = self.cic.run(input.slice());
            input.consume(n);
            for x in decimated {
                self.history.insert(0, x);
                self.history.truncate(self.fir_len);
                self.pending.push_back(self.fir.filter(&self.history));
            }
            if self.pending.is_empty() {
                return Ok(BlockRet::Again);
            }
        }
        let mut o = self.dst.write_buf()?;
        let m = self.pending.len().min(o.len());
        if m == 0 {
            return Ok(BlockRet::WaitForStream(self.dst.id(), 1));
        }
        for (slot, val) in o.slice()[..m].iter_mut().zip(self.pending.drain(..m)) {
            *slot = val;
        }
        o.produce(m, &[]);
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimates_by_two() -> Result<()> {
        let input: Vec<_> = (0..200).map(|i| Complex::new(i as Float, 0.0)).collect();
        let s = ReadStream::from_slice(&input);
        let (mut f, dst) = FrontEndFilter::new(s);
        f.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.len(), 100);
        Ok(())
    }
}
