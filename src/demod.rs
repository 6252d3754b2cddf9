//! Demodulators (C5): non-coherent FM discriminator and coherent
//! 16-phase differential BPSK search, both operating on the 48 kHz
//! per-channel stream.
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Float};

/// Non-coherent FM (quadrature) discriminator.
///
/// Grounded on the teacher's quadrature demodulator: multiply each
/// sample by the conjugate of the previous one, take the angle. Gated
/// the same way on the `fast-math` feature.
#[derive(aiscore_macros::Block)]
#[dsp(crate, new, sync)]
pub struct FmDemod {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst: WriteStream<Float>,
    #[dsp(default)]
    last: Complex,
}

impl FmDemod {
    fn process_sync(&mut self, s: Complex) -> Float {
        let t = s * self.last.conj();
        self.last = s;
        let pi = std::f64::consts::PI as Float;
        #[cfg(feature = "fast-math")]
        let angle = fast_math::atan2(t.im, t.re);
        #[cfg(not(feature = "fast-math"))]
        let angle = t.im.atan2(t.re);
        angle / pi
    }
}

const NUM_PHASES: usize = 16;

/// One candidate reference phase in the coherent search.
#[derive(Debug, Clone, Copy, Default)]
struct PhaseCandidate {
    /// Rolling magnitude history (or EMA, collapsed to a single slot
    /// when `ema` is set).
    history: [Float; 8],
    history_len: usize,
    ema: Float,
    last_bit: bool,
}

impl PhaseCandidate {
    fn record(&mut self, magnitude: Float, use_ema: bool, depth: usize) {
        if use_ema {
            self.ema = 0.85 * self.ema + 0.15 * magnitude;
        } else {
            let cap = depth.clamp(1, self.history.len());
            self.history[self.history_len % cap] = magnitude;
            self.history_len += 1;
        }
    }

    fn margin(&self, use_ema: bool, depth: usize) -> Float {
        if use_ema {
            self.ema
        } else {
            let cap = depth.clamp(1, self.history.len());
            let n = self.history_len.min(cap);
            if n == 0 {
                return 0.0;
            }
            self.history[..n].iter().cloned().fold(Float::MAX, Float::min)
        }
    }
}

/// Coherent 16-phase differential BPSK search demodulator.
///
/// At 48 kHz with a 9.6 kHz symbol rate there are 5 samples/symbol.
/// `n` counts input samples for the `j^n` derotation; candidates track
/// either a history of magnitudes or an EMA, per `history.is_none()`.
#[derive(aiscore_macros::Block)]
#[dsp(crate, new)]
pub struct CoherentPhaseSearch {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst: WriteStream<Float>,
    use_ema: bool,
    history_depth: usize,
    #[dsp(default)]
    n: u64,
    #[dsp(default)]
    candidates: [PhaseCandidate; NUM_PHASES],
    #[dsp(default)]
    best: usize,
}

impl CoherentPhaseSearch {
    fn rotate_by_jn(&self, s: Complex) -> Complex {
        match self.n % 4 {
            0 => s,
            1 => Complex::new(-s.im, s.re),
            2 => Complex::new(-s.re, -s.im),
            _ => Complex::new(s.im, -s.re),
        }
    }

    fn phase_unit(j: usize) -> Complex {
        let pi = std::f64::consts::PI as Float;
        let theta = pi * (j as Float) / (NUM_PHASES as Float);
        Complex::new(theta.cos(), theta.sin())
    }

    fn process_one(&mut self, s: Complex) -> Float {
        let rotated = self.rotate_by_jn(s);
        self.n = self.n.wrapping_add(1);

        let mut bits = [false; NUM_PHASES];
        for j in 0..NUM_PHASES {
            let u = Self::phase_unit(j);
            let a = rotated.re * u.re + rotated.im * u.im;
            let b = rotated.re * u.im - rotated.im * u.re;
            let corr = a - b;
            bits[j] = corr >= 0.0;
            self.candidates[j].record(corr.abs(), self.use_ema, self.history_depth);
        }

        let lo = self.best.saturating_sub(2);
        let hi = (self.best + 2).min(NUM_PHASES - 1);
        let mut best = self.best;
        let mut best_margin = self.candidates[self.best].margin(self.use_ema, self.history_depth);
        for j in lo..=hi {
            let m = self.candidates[j].margin(self.use_ema, self.history_depth);
            if m > best_margin {
                best_margin = m;
                best = j;
            }
        }
        self.best = best;

        let bit = bits[best];
        let delayed = self.candidates[best].last_bit;
        self.candidates[best].last_bit = bit;
        if bit ^ delayed {
            1.0
        } else {
            -1.0
        }
    }
}

impl crate::block::Block for CoherentPhaseSearch {
    fn work(&mut self) -> crate::Result<crate::block::BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.is_empty() {
            return Ok(crate::block::BlockRet::WaitForStream(self.src.id(), 1));
        }
        let mut o = self.dst.write_buf()?;
        let n = input.len().min(o.len());
        if n == 0 {
            return Ok(crate::block::BlockRet::WaitForStream(self.dst.id(), 1));
        }
        let xs = input.slice();
        for i in 0..n {
            o.slice()[i] = self.process_one(xs[i]);
        }
        input.consume(n);
        o.produce(n, &[]);
        Ok(crate::block::BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::Result;

    #[test]
    fn fm_demod_of_constant_phasor_is_zero() -> Result<()> {
        let input = vec![Complex::new(1.0, 0.0); 4];
        let s = ReadStream::from_slice(&input);
        let (mut demod, dst) = FmDemod::new(s, 1.0);
        demod.work()?;
        let (r, _) = dst.read_buf()?;
        for &v in &r.slice()[1..] {
            assert!(v.abs() < 1e-4, "{v}");
        }
        Ok(())
    }

    #[test]
    fn fm_demod_of_rotating_phasor_is_nonzero() -> Result<()> {
        let pi = std::f64::consts::PI as Float;
        let input: Vec<_> = (0..8)
            .map(|n| {
                let theta = pi / 4.0 * n as Float;
                Complex::new(theta.cos(), theta.sin())
            })
            .collect();
        let s = ReadStream::from_slice(&input);
        let (mut demod, dst) = FmDemod::new(s, 1.0);
        demod.work()?;
        let (r, _) = dst.read_buf()?;
        assert!(r.slice()[1] > 0.0);
        Ok(())
    }

    #[test]
    fn coherent_phase_search_runs_and_produces_bits() -> Result<()> {
        let input: Vec<_> = (0..40)
            .map(|i| Complex::new(if i % 10 < 5 { 1.0 } else { -1.0 }, 0.0))
            .collect();
        let s = ReadStream::from_slice(&input);
        let (mut demod, dst) = CoherentPhaseSearch::new(s, false, 8);
        demod.work()?;
        let (r, _) = dst.read_buf()?;
        assert_eq!(r.len(), 40);
        for &v in r.slice() {
            assert!(v == 1.0 || v == -1.0);
        }
        Ok(())
    }
}
