#![warn(missing_docs)]
/*! AIS receiver core: DSP pipeline, HDLC/AIS frame decoder, and NMEA packager.

This crate provides the signal-processing and protocol core of a
software-defined AIS (Automatic Identification System) receiver: it
turns a stream of complex baseband IQ samples into decoded AIS
messages, formatted as NMEA 0183 AIVDM sentences.

It's built as a graph of blocks connected by unidirectional streams,
heavily inspired by [GNURadio][gnuradio]. Each block has zero or more
input streams and zero or more output streams; data flows from
"sources" (no inputs) to "sinks" (no outputs).

# Architecture overview

```text
[ Raw IQ source ]
       v
[ Multi-rate downsampler ] -> 96 kHz complex
       v
[ Channel splitter ] -> channel A / channel B
       v
[ Front-end filter ] -> 48 kHz complex, per channel
       v
[ Demodulator ] (FM discriminator, or coherent phase search)
       v
[ Symbol timing recovery ]
       v
[ HDLC / AIS frame decoder ] -> validated payload bits
       v
[ NMEA packager ] -> !AIVDM sentences
```

Device drivers, file readers, and output transports are not part of
this crate; it consumes raw sample blocks through [`sample_source`] and
produces [`message::AisMessage`] records through a message sink.

# Example

```
use aiscore::graph::{Graph, GraphRunner};
use aiscore::blocks::{NullSink, VectorSource};
use aiscore::Complex;
let (src, out) = VectorSource::new(vec![Complex::new(1.0, 0.0); 16]);
let (sink, _) = NullSink::new(out);
let mut g = Graph::new();
g.add(Box::new(src));
g.add(Box::new(sink));
g.run()?;
# Ok::<(), anyhow::Error>(())
```

[gnuradio]: https://www.gnuradio.org/
 */

// Core framework.
pub mod block;
pub mod blocks;
pub mod circular_buffer;
pub mod graph;
pub mod stream;

// Small general-purpose blocks, reused from the host framework and
// used in tests and example wiring.
pub mod binary_slicer;
pub mod debug_sink;
pub mod null_sink;
pub mod vector_source;

// AIS-specific pipeline stages (C1-C9).
pub mod ais_decoder;
pub mod channel_splitter;
pub mod config;
pub mod demod;
pub mod downsampler;
pub mod fir;
pub mod freq_offset;
pub mod frontend_filter;
pub mod message;
pub mod nmea;
pub mod queue;
pub mod sample_source;
pub mod symbol_timing;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// Crate error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Sample rate not supported by the downsampler's cascade table.
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),

    /// Unknown raw sample format.
    #[error("unsupported raw sample format: {0}")]
    UnsupportedFormat(String),

    /// Invalid or contradictory configuration.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// Anything else: I/O, poisoned locks, ad hoc wiring failures.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Construct an [`Error::Other`] from a displayable message.
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Error {
        Error::msg(e)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Error {
        Error::msg(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::msg(format!("IO error: {e}"))
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(e: std::array::TryFromSliceError) -> Self {
        Error::msg(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A trait all sample types must implement, to be converted from raw
/// device bytes (see [`sample_source`]).
pub trait Sample {
    /// The type of the sample.
    type Type;

    /// The serialized size of one sample.
    fn size() -> usize;

    /// Parse one sample.
    fn parse(data: &[u8]) -> Result<Self::Type>;

    /// Serialize one sample.
    fn serialize(&self) -> Vec<u8>;
}

impl Sample for Complex {
    type Type = Complex;
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
    fn parse(data: &[u8]) -> Result<Self::Type> {
        if data.len() != Self::size() {
            return Err(Error::msg("Complex sample has wrong size"));
        }
        let i = Float::from_le_bytes(data[0..Self::size() / 2].try_into()?);
        let q = Float::from_le_bytes(data[Self::size() / 2..].try_into()?);
        Ok(Complex::new(i, q))
    }
    fn serialize(&self) -> Vec<u8> {
        let mut ret = Vec::new();
        ret.extend(Float::to_le_bytes(self.re));
        ret.extend(Float::to_le_bytes(self.im));
        ret
    }
}

impl Sample for Float {
    type Type = Float;
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
    fn parse(data: &[u8]) -> Result<Self::Type> {
        if data.len() != Self::size() {
            return Err(Error::msg("Float sample has wrong size"));
        }
        Ok(Float::from_le_bytes(data[0..Self::size()].try_into()?))
    }
    fn serialize(&self) -> Vec<u8> {
        Float::to_le_bytes(*self).to_vec()
    }
}

impl Sample for u8 {
    type Type = u8;
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
    fn parse(data: &[u8]) -> Result<Self::Type> {
        if data.len() != Self::size() {
            return Err(Error::msg("u8 sample has wrong size"));
        }
        Ok(data[0])
    }
    fn serialize(&self) -> Vec<u8> {
        vec![*self]
    }
}

/// Trivial trait for types that have `.len()`.
#[allow(clippy::len_without_is_empty)]
pub trait Len {
    /// Get the length.
    fn len(&self) -> usize;
}
impl<T> Len for Vec<T> {
    fn len(&self) -> usize {
        self.len()
    }
}

// Global id counter shared by copy-streams and no-copy-streams, so
// every stream in a graph has a distinct id regardless of kind.
pub(crate) static NEXT_STREAM_ID: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(1);

#[cfg(test)]
pub mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_complex(left: &[Complex], right: &[Complex]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {:?}\nright: {:?}",
            left,
            right
        );
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).norm_sqr().sqrt();
            if dist > 0.001 {
                assert_eq!(
                    left[i], right[i],
                    "\nElement {i}:\nleft: {:?}\nright: {:?}",
                    left, right
                );
            }
        }
    }

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_float(left: &[Float], right: &[Float]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {:?}\nright: {:?}",
            left,
            right
        );
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).abs();
            if dist > 0.001 {
                assert_eq!(left[i], right[i], "\nleft: {:?}\nright: {:?}", left, right);
            }
        }
    }
}
