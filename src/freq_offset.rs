//! FFT-based frequency-offset estimator (C7): used ahead of the
//! coherent demodulator to correct a residual carrier offset before
//! the 16-phase search.
//!
//! Grounded on the teacher's `FftStream` for the `rustfft` planning
//! and block-buffered `work()` shape; the peak-pair search and
//! derotation are this crate's own, built from the algorithm
//! description (no teacher block does frequency-offset estimation).
use std::sync::Arc;

use rustfft::FftPlanner;

use crate::block::{Block, BlockRet};
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Float, Result};

fn bit_reverse(mut i: usize, bits: u32) -> usize {
    let mut r = 0;
    for _ in 0..bits {
        r = (r << 1) | (i & 1);
        i >>= 1;
    }
    r
}

/// Estimates and removes a residual carrier offset from blocks of
/// `n` samples (n is a power of two, typically 4096 or 2048).
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct FreqOffsetEstimator {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst: WriteStream<Complex>,
    n: usize,
    bits: u32,
    delta: usize,
    window: usize,
    fft: Arc<dyn rustfft::Fft<Float>>,
}

impl FreqOffsetEstimator {
    /// Build an estimator for block size `n` (must be a power of two).
    #[must_use]
    pub fn new(src: ReadStream<Complex>, n: usize) -> (Self, ReadStream<Complex>) {
        assert!(n.is_power_of_two(), "n must be a power of two");
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let delta = ((9_600.0 * n as Float) / 48_000.0).round() as usize;
        let (dst, dst_read) = WriteStream::new();
        (
            Self {
                src,
                dst,
                n,
                bits: n.trailing_zeros(),
                delta,
                window: n / 16,
                fft,
            },
            dst_read,
        )
    }
}

impl Block for FreqOffsetEstimator {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.len() < self.n {
            return Ok(BlockRet::WaitForStream(self.src.id(), self.n - input.len()));
        }
        let mut o = self.dst.write_buf()?;
        if o.len() < self.n {
            return Ok(BlockRet::WaitForStream(self.dst.id(), self.n));
        }

        let block: Vec<Complex> = input.slice()[..self.n].to_vec();
        let mut fft_in = vec![Complex::new(0.0, 0.0); self.n];
        for (i, s) in block.iter().enumerate() {
            fft_in[bit_reverse(i, self.bits)] = *s * *s;
        }
        self.fft.process(&mut fft_in);

        let hi = self.n.saturating_sub(self.window + self.delta);
        let mut best_i = self.window.min(hi.saturating_sub(1));
        let mut best_score = Float::MIN;
        for i in self.window..hi.max(self.window + 1) {
            let a = fft_in[(i + self.n / 2) % self.n].norm();
            let b = fft_in[(i + self.delta + self.n / 2) % self.n].norm();
            let score = a + b;
            if score > best_score {
                best_score = score;
                best_i = i;
            }
        }

        let f_z = self.n as Float / 2.0 - (best_i as Float + self.delta as Float / 2.0);
        let cycles_per_sample = f_z / (2.0 * self.n as Float);
        let pi = std::f64::consts::PI as Float;
        let theta_step = 2.0 * pi * cycles_per_sample;
        let rot = Complex::new(theta_step.cos(), theta_step.sin());

        let mut acc = Complex::new(1.0, 0.0);
        let out = o.slice();
        for (i, s) in block.iter().enumerate() {
            acc *= rot;
            out[i] = *s * acc.conj();
        }
        let norm = acc.norm();
        if norm > 0.0 {
            acc /= norm;
        }

        input.consume(self.n);
        o.produce(self.n, &[]);
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reverse_is_involution() {
        for i in 0..16 {
            assert_eq!(bit_reverse(bit_reverse(i, 4), 4), i);
        }
    }

    #[test]
    fn estimator_passes_through_block_size_samples() -> Result<()> {
        let n = 64;
        let input: Vec<_> = (0..n)
            .map(|i| Complex::new((i as Float).sin(), (i as Float).cos()))
            .collect();
        let s = ReadStream::from_slice(&input);
        let (mut est, dst) = FreqOffsetEstimator::new(s, n);
        est.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.len(), n);
        Ok(())
    }

    #[test]
    fn waits_for_a_full_block() -> Result<()> {
        let n = 64;
        let input = vec![Complex::new(1.0, 0.0); n - 1];
        let s = ReadStream::from_slice(&input);
        let (mut est, dst) = FreqOffsetEstimator::new(s, n);
        assert!(matches!(est.work()?, BlockRet::WaitForStream(_, _)));
        let (r, _) = dst.read_buf()?;
        assert!(r.is_empty());
        Ok(())
    }
}
