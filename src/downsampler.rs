//! Multi-rate downsampler (C2): reduces an arbitrary supported input
//! rate to the canonical 96 kHz complex stream.
//!
//! The cascade selection mirrors a classic multi-rate decimator: power-
//! of-two factors get a chain of `Downsample2CIC5` stages, a leftover
//! factor of 3 gets a 21-tap polyphase FIR, and rates that don't
//! factor cleanly as `96000 * 2^k * 3^j` fall back to the rational
//! resampler. There is no teacher file for the CIC recurrence itself;
//! it's the textbook Hogenauer form (`N` integrators run at the input
//! rate, decimate, then `N` combs run at the output rate).
use log::debug;

use crate::block::{Block, BlockRet};
use crate::fir::FIR;
use crate::stream::{ReadStream, WriteStream};
use crate::{Complex, Error, Float, Result};

const CIC_ORDER: usize = 5;

/// Canonical output rate of this stage, in Hz.
pub const OUTPUT_RATE: u32 = 96_000;

/// Every input sample rate this crate knows how to downsample.
pub const SUPPORTED_RATES: &[u32] = &[
    // Pure power-of-two multiples of 96 kHz.
    96_000,
    192_000,
    384_000,
    768_000,
    1_536_000,
    3_072_000,
    6_144_000,
    12_288_000,
    // 96000 * 3 * 2^k: CIC stages down to 3*96k, then a /3 FIR.
    288_000,
    2_304_000,
    // Rates with no clean 2^k * 3^j factorization of 96 kHz: rational
    // resampler, interpolate/decimate reduced by GCD.
    240_000,
    250_000,
    900_000,
    912_000,
    1_000_000,
    1_100_000,
    1_152_000,
    1_920_000,
    2_000_000,
    2_500_000,
    3_000_000,
    6_000_000,
    10_000_000,
];

/// The decimation strategy selected for a given input rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    /// `cic_stages` chained `Downsample2CIC5` stages, nothing else.
    PowerOfTwo { cic_stages: u32 },
    /// `cic_stages` CIC stages down to `96000*3`, then a /3 polyphase FIR.
    PowerOfTwoThenDiv3 { cic_stages: u32 },
    /// Rational resampler, reduced by GCD, straight to 96 kHz.
    Rational { interp: u32, decim: u32 },
}

fn log2_exact(mut q: u32) -> Option<u32> {
    if q == 0 {
        return None;
    }
    let mut k = 0;
    while q > 1 {
        if q % 2 != 0 {
            return None;
        }
        q /= 2;
        k += 1;
    }
    Some(k)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Select the decimation cascade for `rate`, or `None` if unsupported.
#[must_use]
pub fn cascade_for_rate(rate: u32) -> Option<Cascade> {
    if !SUPPORTED_RATES.contains(&rate) {
        return None;
    }
    if rate % OUTPUT_RATE == 0 {
        if let Some(k) = log2_exact(rate / OUTPUT_RATE) {
            return Some(Cascade::PowerOfTwo { cic_stages: k });
        }
    }
    if rate % (OUTPUT_RATE * 3) == 0 {
        if let Some(k) = log2_exact(rate / (OUTPUT_RATE * 3)) {
            return Some(Cascade::PowerOfTwoThenDiv3 { cic_stages: k });
        }
    }
    let g = gcd(OUTPUT_RATE, rate);
    Some(Cascade::Rational {
        interp: OUTPUT_RATE / g,
        decim: rate / g,
    })
}

/// One decimate-by-2 CIC-5 stage: 5 integrators at the input rate, 5
/// combs at the (decimated) output rate, scaled down by `2^5`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cic5Stage {
    integrators: [Complex; CIC_ORDER],
    combs: [Complex; CIC_ORDER],
    half: bool,
}

impl Cic5Stage {
    fn push(&mut self, x: Complex, out: &mut Vec<Complex>) {
        let mut v = x;
        for acc in &mut self.integrators {
            *acc += v;
            v = *acc;
        }
        self.half = !self.half;
        if !self.half {
            return;
        }
        let mut c = v / 32.0;
        for comb in &mut self.combs {
            let prev = *comb;
            *comb = c;
            c -= prev;
        }
        out.push(c);
    }

    pub(crate) fn run(&mut self, input: &[Complex]) -> Vec<Complex> {
        let mut out = Vec::with_capacity(input.len() / 2 + 1);
        for &x in input {
            self.push(x, &mut out);
        }
        out
    }
}

/// Fixed-point fast path for one CIC-5 stage, used when the caller
/// prefers quantized arithmetic over float. I and Q are packed as two
/// 16-bit lanes in one `i32`; each integrator stage shifts to keep the
/// lanes from bleeding into each other. Shift schedule: `{3,4,5,5,0}`.
const LANE_SHIFTS: [u32; CIC_ORDER] = [3, 4, 5, 5, 0];

fn pack_lanes(c: Complex) -> i32 {
    let i = (c.re * i16::MAX as Float) as i16;
    let q = (c.im * i16::MAX as Float) as i16;
    ((i as i32) << 16) | (q as u16 as i32)
}

fn unpack_lanes(v: i32) -> Complex {
    let i = (v >> 16) as i16;
    let q = v as i16;
    Complex::new(i as Float / i16::MAX as Float, q as Float / i16::MAX as Float)
}

/// Masks out any carry a lane gained from its neighbor after a shift.
/// Documented here because the shift schedule depends on it: with lane
/// width 16 and shift `s`, the surviving bits in each lane are
/// `(0xFFFF >> s) | ((0xFFFF >> s) << 16)`.
fn contamination_mask(shift: u32) -> u32 {
    let half = 0xFFFFu32 >> shift;
    half | (half << 16)
}

#[derive(Debug, Clone, Default)]
struct Cic5StageFixed {
    integrators: [i32; CIC_ORDER],
    combs: [i32; CIC_ORDER],
    half: bool,
}

impl Cic5StageFixed {
    fn push(&mut self, x: Complex, out: &mut Vec<Complex>) {
        let mut v = pack_lanes(x);
        for (stage, acc) in self.integrators.iter_mut().enumerate() {
            *acc = acc.wrapping_add(v) & (contamination_mask(LANE_SHIFTS[stage]) as i32);
            v = *acc;
        }
        self.half = !self.half;
        if !self.half {
            return;
        }
        let mut c = v;
        for comb in &mut self.combs {
            let prev = *comb;
            *comb = c;
            c = c.wrapping_sub(prev);
        }
        out.push(unpack_lanes(c));
    }

    fn run(&mut self, input: &[Complex]) -> Vec<Complex> {
        let mut out = Vec::with_capacity(input.len() / 2 + 1);
        for &x in input {
            self.push(x, &mut out);
        }
        out
    }
}

/// 21-tap Hamming-windowed-sinc low-pass, cutoff at a third of Nyquist
/// (matched to decimation by 3).
fn div3_taps() -> Vec<Complex> {
    const NTAPS: usize = 21;
    let pi = std::f64::consts::PI as Float;
    let cutoff = 1.0 / 3.0;
    let m = (NTAPS - 1) as Float / 2.0;
    let mut taps = vec![0.0 as Float; NTAPS];
    for (n, tap) in taps.iter_mut().enumerate() {
        let k = n as Float - m;
        let sinc = if k == 0.0 {
            cutoff
        } else {
            (pi * cutoff * k).sin() / (pi * k)
        };
        let w = 0.54 - 0.46 * (2.0 * pi * n as Float / (NTAPS as Float - 1.0)).cos();
        *tap = sinc * w;
    }
    let sum: Float = taps.iter().sum();
    taps.iter().map(|&t| Complex::new(t / sum, 0.0)).collect()
}

/// Decimate-by-3 polyphase FIR, 21 taps, symmetric low-pass.
#[derive(Debug, Clone)]
struct Div3Fir {
    fir: FIR<Complex>,
    taps: usize,
    /// Most recent sample at index 0.
    history: Vec<Complex>,
    phase: usize,
}

impl Div3Fir {
    fn new() -> Self {
        let taps = div3_taps();
        let n = taps.len();
        Self {
            fir: FIR::new(&taps),
            taps: n,
            history: vec![Complex::new(0.0, 0.0); n],
            phase: 0,
        }
    }

    fn run(&mut self, input: &[Complex]) -> Vec<Complex> {
        let mut out = Vec::with_capacity(input.len() / 3 + 1);
        for &x in input {
            self.history.insert(0, x);
            self.history.truncate(self.taps);
            self.phase += 1;
            if self.phase == 3 {
                self.phase = 0;
                out.push(self.fir.filter(&self.history));
            }
        }
        out
    }
}

/// Rational resampler, GCD-reduced, no filtering (matches the
/// reference counter-based interpolate/decimate loop).
#[derive(Debug, Clone, Default)]
struct Rational {
    interp: i64,
    decim: i64,
    counter: i64,
}

impl Rational {
    fn new(interp: u32, decim: u32) -> Self {
        Self {
            interp: interp as i64,
            decim: decim as i64,
            counter: 0,
        }
    }

    fn run(&mut self, input: &[Complex]) -> Vec<Complex> {
        let mut out = Vec::new();
        self.counter -= self.decim;
        for &s in input {
            self.counter += self.interp;
            while self.counter >= 0 {
                out.push(s);
                self.counter -= self.decim;
            }
        }
        out
    }
}

/// Decimates an input complex stream at a supported rate down to the
/// canonical 96 kHz.
#[derive(aiscore_macros::Block)]
#[dsp(crate)]
pub struct Downsampler {
    #[dsp(in)]
    src: ReadStream<Complex>,
    #[dsp(out)]
    dst: WriteStream<Complex>,
    cascade: Cascade,
    cic: Vec<Cic5Stage>,
    cic_fixed: Vec<Cic5StageFixed>,
    div3: Option<Div3Fir>,
    rational: Option<Rational>,
    fixed_point: bool,
    pending: std::collections::VecDeque<Complex>,
}

impl Downsampler {
    /// Build a downsampler for `rate` Hz, failing with
    /// [`Error::UnsupportedRate`] if no cascade covers it.
    pub fn new(
        src: ReadStream<Complex>,
        rate: u32,
        fixed_point: bool,
    ) -> Result<(Self, ReadStream<Complex>)> {
        let cascade = cascade_for_rate(rate).ok_or(Error::UnsupportedRate(rate))?;
        let (dst, dst_read) = WriteStream::new();
        let (cic_stages, div3, rational) = match cascade {
            Cascade::PowerOfTwo { cic_stages } => (cic_stages, false, None),
            Cascade::PowerOfTwoThenDiv3 { cic_stages } => (cic_stages, true, None),
            Cascade::Rational { interp, decim } => (0, false, Some(Rational::new(interp, decim))),
        };
        debug!("Downsampler: rate={rate} cascade={cascade:?}");
        Ok((
            Self {
                src,
                dst,
                cascade,
                cic: vec![Cic5Stage::default(); cic_stages as usize],
                cic_fixed: vec![Cic5StageFixed::default(); cic_stages as usize],
                div3: div3.then(Div3Fir::new),
                rational,
                fixed_point,
                pending: std::collections::VecDeque::new(),
            },
            dst_read,
        ))
    }

    fn run_cascade(&mut self, input: &[Complex]) -> Vec<Complex> {
        let mut v = input.to_vec();
        if self.fixed_point {
            for stage in &mut self.cic_fixed {
                v = stage.run(&v);
            }
        } else {
            for stage in &mut self.cic {
                v = stage.run(&v);
            }
        }
        if let Some(div3) = &mut self.div3 {
            v = div3.run(&v);
        }
        if let Some(rational) = &mut self.rational {
            v = rational.run(&v);
        }
        v
    }
}

impl Block for Downsampler {
    fn work(&mut self) -> Result<BlockRet> {
        if self.pending.is_empty() {
            let (input, _tags) = self.src.read_buf()?;
            if input.is_empty() {
                return Ok(BlockRet::WaitForStream(self.src.id(), 1));
            }
            let n = input.len();
            let produced = self.run_cascade(input.slice());
            input.consume(n);
            self.pending.extend(produced);
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
