//! Symbol timing recovery (C6): a zero-crossing PLL sampler for the
//! non-coherent path, and an N-way deinterleave sampler for the
//! coherent path.
//!
//! Grounded on the teacher's `ZeroCrossing` block: the zero-crossing
//! detection and periodic rebasing idiom survives, but the nudge/
//! overflow arithmetic follows the specified PLL exactly rather than
//! the teacher's counter-and-clock variant.
use crate::block::{Block, BlockRet};
use crate::stream::{ReadStream, WriteStream};
use crate::{Float, Result};

/// Samples/symbol at 48 kHz with a 9.6 kHz symbol rate.
const CLOCK_STEP: Float = 0.2;

/// Zero-crossing PLL sampler for the non-coherent FM path.
///
/// Tracks a scalar phase in `[0, 1)`. Whenever the input's sign
/// flips, the phase is nudged toward 0.5 (gain 0.6 while training,
/// 0.05 once tracking). The phase advances by [`CLOCK_STEP`] every
/// sample; on overflow, the current sample is emitted as a symbol.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct ZeroCrossingSampler {
    #[dsp(in)]
    src: ReadStream<Float>,
    #[dsp(out)]
    dst: WriteStream<Float>,
    pll: Float,
    last_sign: bool,
    training: bool,
}

impl ZeroCrossingSampler {
    /// Build a sampler, starting in training mode.
    #[must_use]
    pub fn new(src: ReadStream<Float>) -> (Self, ReadStream<Float>) {
        let (dst, dst_read) = WriteStream::new();
        (
            Self {
                src,
                dst,
                pll: 0.0,
                last_sign: false,
                training: true,
            },
            dst_read,
        )
    }

    /// The decoder observed a valid start flag: leave training mode.
    pub fn stop_training(&mut self) {
        self.training = false;
    }

    /// The decoder reset (another parallel decoder locked first, or
    /// the frame failed): re-enter training mode.
    pub fn reset(&mut self) {
        self.training = true;
        self.pll = 0.0;
        self.last_sign = false;
    }
}

impl Block for ZeroCrossingSampler {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.is_empty() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }
        let mut o = self.dst.write_buf()?;
        if o.is_empty() {
            return Ok(BlockRet::WaitForStream(self.dst.id(), 1));
        }
        let xs = input.slice();
        let mut produced = 0usize;
        let mut consumed = 0usize;
        for &x in xs {
            if produced >= o.len() {
                break;
            }
            consumed += 1;
            let sign = x > 0.0;
            if sign != self.last_sign {
                let gain = if self.training { 0.6 } else { 0.05 };
                self.pll += gain * (0.5 - self.pll);
            }
            self.last_sign = sign;
            self.pll += CLOCK_STEP;
            if self.pll >= 1.0 {
                o.slice()[produced] = x;
                produced += 1;
                self.pll -= self.pll.floor();
            }
        }
        input.consume(consumed);
        if produced > 0 {
            o.produce(produced, &[]);
        }
        Ok(BlockRet::Again)
    }
}

/// Number of parallel decoders in the coherent deinterleave path.
pub const DEINTERLEAVE_WAYS: usize = 5;

/// Routes input sample `n` to output `n mod 5`, so each of the 5
/// outputs sees a 9.6 kHz stream at a fixed phase offset. Downstream,
/// 5 parallel decoders race; the first to lock resets the rest.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct DeinterleaveSampler {
    #[dsp(in)]
    src: ReadStream<Float>,
    #[dsp(out)]
    dst0: WriteStream<Float>,
    #[dsp(out)]
    dst1: WriteStream<Float>,
    #[dsp(out)]
    dst2: WriteStream<Float>,
    #[dsp(out)]
    dst3: WriteStream<Float>,
    #[dsp(out)]
    dst4: WriteStream<Float>,
    n: u64,
}

impl DeinterleaveSampler {
    /// Build a deinterleaver; returns the 5 phase streams in order.
    #[must_use]
    pub fn new(src: ReadStream<Float>) -> (Self, [ReadStream<Float>; DEINTERLEAVE_WAYS]) {
        let (dst0, r0) = WriteStream::new();
        let (dst1, r1) = WriteStream::new();
        let (dst2, r2) = WriteStream::new();
        let (dst3, r3) = WriteStream::new();
        let (dst4, r4) = WriteStream::new();
        (
            Self {
                src,
                dst0,
                dst1,
                dst2,
                dst3,
                dst4,
                n: 0,
            },
            [r0, r1, r2, r3, r4],
        )
    }
}

impl Block for DeinterleaveSampler {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.is_empty() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }
        let mut outs = [
            self.dst0.write_buf()?,
            self.dst1.write_buf()?,
            self.dst2.write_buf()?,
            self.dst3.write_buf()?,
            self.dst4.write_buf()?,
        ];
        let mut produced = [0usize; DEINTERLEAVE_WAYS];
        let xs = input.slice();
        let mut consumed = 0usize;
        for &x in xs {
            let phase = (self.n % DEINTERLEAVE_WAYS as u64) as usize;
            if produced[phase] >= outs[phase].len() {
                break;
            }
            outs[phase].slice()[produced[phase]] = x;
            produced[phase] += 1;
            self.n = self.n.wrapping_add(1);
            consumed += 1;
        }
        input.consume(consumed);
        for (i, out) in outs.iter().enumerate() {
            if produced[i] > 0 {
                out.produce(produced[i], &[]);
            }
        }
        if consumed == 0 {
            return Ok(BlockRet::WaitForStream(self.dst0.id(), 1));
        }
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_crossing_emits_roughly_one_symbol_per_five_samples() -> Result<()> {
        let input: Vec<_> = (0..50).map(|_| 1.0 as Float).collect();
        let s = ReadStream::from_slice(&input);
        let (mut sampler, dst) = ZeroCrossingSampler::new(s);
        sampler.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.len(), 10);
        Ok(())
    }

    #[test]
    fn training_nudges_faster_than_tracking() {
        let s = ReadStream::from_slice(&[1.0 as Float]);
        let (mut sampler, _dst) = ZeroCrossingSampler::new(s);
        sampler.last_sign = false;
        sampler.pll = 0.5;
        let before = sampler.pll;
        sampler.training = true;
        let sign_changed_nudge = 0.6 * (0.5 - before);
        assert!(sign_changed_nudge.abs() < 1e-6);
        sampler.stop_training();
        assert!(!sampler.training);
        sampler.reset();
        assert!(sampler.training);
    }

    #[test]
    fn deinterleave_routes_round_robin() -> Result<()> {
        let input: Vec<_> = (0..15).map(|i| i as Float).collect();
        let s = ReadStream::from_slice(&input);
        let (mut d, outs) = DeinterleaveSampler::new(s);
        d.work()?;
        for (i, out) in outs.iter().enumerate() {
            let (r, _) = out.read_buf()?;
            assert_eq!(r.len(), 3);
            assert_eq!(r.slice()[0], i as Float);
        }
        Ok(())
    }
}
