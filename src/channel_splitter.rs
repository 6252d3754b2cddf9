//! Channel splitter (C3): down-shifts the 96 kHz canonical stream to
//! baseband for each of the two 25 kHz-separated AIS channels.
//!
//! No teacher file implements an NCO-style complex mixer directly;
//! this is the standard SDR idiom (a rotating unit-modulus phasor,
//! multiplied into each sample, periodically renormalized against
//! floating-point drift) built from the algorithm description.
use crate::block::{Block, BlockRet};
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Float, Result};

/// Input rate this stage expects: the downsampler's canonical output.
pub const INPUT_RATE: Float = 96_000.0;

/// Channel separation, in Hz, between the two AIS channels.
pub const CHANNEL_OFFSET_HZ: Float = 25_000.0;

/// Splits a 96 kHz complex stream into two baseband-shifted streams,
/// one per AIS channel.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct ChannelSplitter {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst_a: WriteStream<Complex>,
    #[dsp(out)]
    dst_b: WriteStream<Complex>,
    step: Complex,
    acc: Complex,
}

impl ChannelSplitter {
    /// Build a splitter. `dst_a` carries channel A (161.975 MHz,
    /// rotated by `e^{+j2pi*25000*n/96000}`); `dst_b` carries channel B
    /// (162.025 MHz, rotated by the conjugate phasor). This matches
    /// `Rotate::Receive`'s `up`/`down` outputs in the original AIS
    /// receiver (`up = data * rot` feeds the branch the model wires to
    /// `setChannel('A')`; `down = data * conj(rot)` feeds `'B'`) rather
    /// than the non-conjugate-to-B assignment a first reading of the
    /// splitting algorithm suggests.
    #[must_use]
    pub fn new(src: ReadStream<Complex>) -> (Self, ReadStream<Complex>, ReadStream<Complex>) {
        let theta = 2.0 * std::f64::consts::PI as Float * CHANNEL_OFFSET_HZ / INPUT_RATE;
        let step = Complex::new(theta.cos(), theta.sin());
        let (dst_a, dst_a_read) = WriteStream::new();
        let (dst_b, dst_b_read) = WriteStream::new();
        (
            Self {
                src,
                dst_a,
                dst_b,
                step,
                acc: Complex::new(1.0, 0.0),
            },
            dst_a_read,
            dst_b_read,
        )
    }
}

impl Block for ChannelSplitter {
    fn work(&mut self) -> Result<BlockRet> {
        let (input, _tags) = self.src.read_buf()?;
        if input.is_empty() {
            return Ok(BlockRet::WaitForStream(self.src.id(), 1));
        }
        let mut oa = self.dst_a.write_buf()?;
        let mut ob = self.dst_b.write_buf()?;
        let n = input.len().min(oa.len()).min(ob.len());
        if n == 0 {
            let starved = if oa.len() < ob.len() {
                self.dst_a.id()
            } else {
                self.dst_b.id()
            };
            return Ok(BlockRet::WaitForStream(starved, 1));
        }
        let xs = input.slice();
        for i in 0..n {
            self.acc *= self.step;
            oa.slice()[i] = xs[i] * self.acc;
            ob.slice()[i] = xs[i] * self.acc.conj();
        }
        let norm = self.acc.norm();
        if norm > 0.0 {
            self.acc /= norm;
        }
        input.consume(n);
        oa.produce(n, &[]);
        ob.produce(n, &[]);
        Ok(BlockRet::Again)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_two_equal_length_streams() -> Result<()> {
        let input: Vec<_> = (0..10).map(|i| Complex::new(i as Float, 0.0)).collect();
        let s = ReadStream::from_slice(&input);
        let (mut splitter, a, b) = ChannelSplitter::new(s);
        splitter.work()?;
        let (ra, _) = a.read_buf()?;
        let (rb, _) = b.read_buf()?;
        assert_eq!(ra.len(), input.len());
        assert_eq!(rb.len(), input.len());
        Ok(())
    }

    #[test]
    fn channel_b_and_a_are_complex_conjugate_rotations() -> Result<()> {
        let input = vec![Complex::new(1.0, 0.0); 4];
        let s = ReadStream::from_slice(&input);
        let (mut splitter, a, b) = ChannelSplitter::new(s);
        splitter.work()?;
        let (ra, _) = a.read_buf()?;
        let (rb, _) = b.read_buf()?;
        for i in 0..4 {
            let dist = (ra.slice()[i] - rb.slice()[i].conj()).norm();
            assert!(dist < 1e-4, "{:?} vs {:?}", ra.slice()[i], rb.slice()[i]);
        }
        Ok(())
    }

    #[test]
    fn phasor_stays_unit_modulus_after_renormalization() -> Result<()> {
        let input = vec![Complex::new(1.0, 0.0); 1000];
        let s = ReadStream::from_slice(&input);
        let (mut splitter, _a, _b) = ChannelSplitter::new(s);
        splitter.work()?;
        assert!((splitter.acc.norm() - 1.0).abs() < 1e-3);
        Ok(())
    }

    /// Channel orthogonality: a tone at -25 kHz (channel A's nominal
    /// offset below the 96 kHz center) should land near DC on channel
    /// A after splitting and front-end filtering, and be rejected by
    /// channel B's filter. This is the test that would have caught the
    /// A/B rotation swap fixed above.
    #[test]
    fn channel_orthogonality_tone_lands_on_documented_channel() -> Result<()> {
        use crate::frontend_filter::FrontEndFilter;

        let theta = 2.0 * std::f64::consts::PI as Float * CHANNEL_OFFSET_HZ / INPUT_RATE;
        let n = 4000;
        let input: Vec<Complex> = (0..n)
            .map(|i| {
                let t = -theta * i as Float;
                Complex::new(t.cos(), t.sin())
            })
            .collect();
        let s = ReadStream::from_slice(&input);
        let (mut splitter, a, b) = ChannelSplitter::new(s);
        splitter.work()?;

        let (mut fa, fa_out) = FrontEndFilter::new(a);
        let (mut fb, fb_out) = FrontEndFilter::new(b);
        fa.work()?;
        fb.work()?;

        let (ra, _) = fa_out.read_buf()?;
        let (rb, _) = fb_out.read_buf()?;
        assert!(!ra.is_empty());
        assert!(!rb.is_empty());

        // Skip the filters' transient settling region before measuring
        // steady-state energy.
        let skip = ra.len() / 2;
        let energy = |buf: &[Complex]| -> Float {
            buf[skip..].iter().map(|c| c.norm_sqr()).sum::<Float>() / (buf.len() - skip) as Float
        };
        let energy_a = energy(ra.slice());
        let energy_b = energy(rb.slice());

        assert!(
            energy_a > 0.01,
            "expected strong DC energy on channel A, got {energy_a}"
        );
        assert!(
            energy_b < energy_a * 0.1,
            "expected channel B to reject the tone: A={energy_a} B={energy_b}"
        );
        Ok(())
    }
}
