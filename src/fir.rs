//! Finite impulse response filter core.
//!
//! This module holds the pure tap-convolution math shared by the
//! front-end and coherent-demod filters; the blocks that wrap it
//! ([`crate::frontend_filter`]) own their own history buffer and tags.

/// A fixed set of FIR taps, ready to filter.
pub struct FIR<T> {
    taps: Vec<T>,
}

impl<T> FIR<T>
where
    T: Copy + Default + std::ops::Mul<T, Output = T> + std::ops::Add<T, Output = T>,
{
    /// Build a filter from taps, in natural (not time-reversed) order.
    #[must_use]
    pub fn new(taps: &[T]) -> Self {
        Self {
            taps: taps.iter().copied().rev().collect(),
        }
    }

    /// Number of taps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    /// True if there are no taps (degenerate, always produces the zero value).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Filter one output sample, given at least `len()` of history ending
    /// at the newest sample at `input[0]`.
    #[must_use]
    pub fn filter(&self, input: &[T]) -> T {
        input
            .iter()
            .take(self.taps.len())
            .enumerate()
            .fold(T::default(), |acc, (i, x)| acc + *x * self.taps[i])
    }

    /// Filter every valid output position in `input`.
    #[must_use]
    pub fn filter_n(&self, input: &[T]) -> Vec<T> {
        if input.len() < self.taps.len() {
            return Vec::new();
        }
        let n = input.len() - self.taps.len() + 1;
        (0..n).map(|i| self.filter(&input[i..])).collect()
    }
}

use crate::{Complex, Float};

/// Design a windowed-sinc low-pass FIR (Hamming window).
///
/// Grounded on the standard GNU-Radio-style `firdes::low_pass` formula:
/// number of taps from the transition-width estimate, then a sinc
/// times a Hamming window, normalized for unity DC gain.
#[must_use]
pub fn low_pass(samp_rate: Float, cutoff: Float, twidth: Float) -> Vec<Complex> {
    let pi = std::f64::consts::PI as Float;
    let ntaps = {
        let a: Float = 53.0; // Hamming.
        let t = (a * samp_rate / (22.0 * twidth)) as usize;
        if (t & 1) == 0 { t + 1 } else { t }
    };
    let mut taps = vec![Float::default(); ntaps];
    let window: Vec<Float> = {
        let m = (ntaps - 1) as Float;
        (0..ntaps)
            .map(|n| 0.54 - 0.46 * (2.0 * pi * (n as Float) / m).cos())
            .collect()
    };
    let m = (ntaps - 1) / 2;
    let fwt0 = 2.0 * pi * cutoff / samp_rate;
    for nm in 0..ntaps {
        let n = nm as i64 - m as i64;
        let nf = n as Float;
        taps[nm] = if n == 0 {
            fwt0 / pi * window[nm]
        } else {
            ((nf * fwt0).sin() / (nf * pi)) * window[nm]
        };
    }
    let gain = {
        let gain: Float = 1.0;
        let mut fmax = taps[m];
        for n in 1..=m {
            fmax += 2.0 * taps[n + m];
        }
        gain / fmax
    };
    taps.into_iter().map(|t| Complex::new(t * gain, 0.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Complex;

    fn assert_almost_equal(left: &[Complex], right: &[Complex]) {
        assert_eq!(left.len(), right.len(), "\nleft: {left:?}\nright: {right:?}");
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).norm_sqr();
            if dist > 0.001 {
                assert_eq!(left[i], right[i], "\nleft: {left:?}\nright: {right:?}");
            }
        }
    }

    #[test]
    fn test_complex() {
        let input = vec![
            Complex::new(1.0, 0.0),
            Complex::new(2.0, 0.0),
            Complex::new(3.0, 0.2),
            Complex::new(4.1, 0.0),
            Complex::new(5.0, 0.0),
            Complex::new(6.0, 0.2),
        ];
        let taps = vec![
            Complex::new(0.1, 0.0),
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 0.2),
        ];
        let filter = FIR::new(&taps);
        assert_almost_equal(
            &filter.filter_n(&input),
            &[
                Complex::new(2.3, 0.22),
                Complex::new(3.41, 0.6),
                Complex::new(4.56, 0.6),
                Complex::new(5.6, 0.84),
            ],
        );
    }

    #[test]
    fn test_filter_generator_length() {
        let taps = low_pass(10000.0, 1000.0, 1000.0);
        assert_eq!(taps.len(), 25);
        // Symmetric (linear phase).
        for i in 0..taps.len() {
            assert!((taps[i].re - taps[taps.len() - 1 - i].re).abs() < 1e-6);
        }
    }
}
