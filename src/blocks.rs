//! Convenient mod collecting library blocks for import.
pub use crate::ais_decoder::AisDecoder;
pub use crate::binary_slicer::BinarySlicer;
pub use crate::channel_splitter::ChannelSplitter;
pub use crate::debug_sink::DebugSink;
pub use crate::demod::{CoherentPhaseSearch, FmDemod};
pub use crate::downsampler::Downsampler;
pub use crate::freq_offset::FreqOffsetEstimator;
pub use crate::frontend_filter::FrontEndFilter;
pub use crate::nmea::NmeaPackager;
pub use crate::null_sink::NullSink;
pub use crate::sample_source::SampleSource;
pub use crate::symbol_timing::{DeinterleaveSampler, ZeroCrossingSampler};
pub use crate::vector_source::VectorSource;
