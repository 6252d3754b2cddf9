//! The core's configuration surface: [`ReceiverConfig`].
//!
//! This is the stable boundary callers (CLI parsing, config files —
//! both out of this crate's scope) target; parsing flags into this
//! struct is the caller's job, validating it is this crate's.

use crate::{Error, Result};

/// Which AIS channel(s) to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChannelMode {
    /// Only channel A (161.975 MHz).
    AOnly,
    /// Only channel B (162.025 MHz).
    BOnly,
    /// Both A and B.
    AB,
    /// Both channels, using the regional C/D letters instead of A/B.
    CD,
}

/// How to demodulate the 48 kHz per-channel signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DemodulatorMode {
    /// Non-coherent FM (quadrature) discriminator, PLL symbol timing.
    NonCoherentFm,
    /// Coherent 16-phase search, history-based margin.
    CoherentPhaseSearch,
    /// Coherent 16-phase search, exponential-moving-average margin.
    CoherentPhaseSearchEma,
    /// Emit the raw discriminator output instead of bits, for testing.
    DiscriminatorInput48k,
}

/// Sample rate and tag choices, the decoding mode, and all other
/// construction-time knobs for a receiver pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReceiverConfig {
    /// Input sample rate, in Hz. Must be one of [`crate::downsampler::SUPPORTED_RATES`].
    pub sample_rate: u32,

    /// Which channel(s) to decode.
    pub channel_mode: ChannelMode,

    /// The two channel letters to report, in (first, second) order.
    pub channel_letters: (char, char),

    /// Demodulator mode.
    pub demodulator_mode: DemodulatorMode,

    /// Whether to run the FFT-based frequency-offset estimator ahead
    /// of the coherent demodulator.
    pub frequency_offset_correction: bool,

    /// Number of past magnitudes kept per phase candidate in the
    /// history-based phase search.
    pub phase_search_history: usize,

    /// Differential delay (in symbols) used by the phase search, before
    /// taking `bit[best] XOR bit_delayed[best]`.
    pub phase_search_delay: usize,

    /// Use the fixed-point fast path for the downsampler's CIC stages.
    pub fixed_point_downsampler: bool,

    /// Which tag fields to populate as samples move through the graph.
    pub tags_enabled: TagsEnabled,
}

/// Which metadata tags a pipeline actually computes and attaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TagsEnabled {
    /// Attach a wall-clock receive timestamp tag.
    pub timestamp: bool,
    /// Attach an estimated signal level (dB) tag.
    pub signal_level: bool,
    /// Attach an estimated carrier offset (ppm) tag.
    pub ppm: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1_536_000,
            channel_mode: ChannelMode::AB,
            channel_letters: ('A', 'B'),
            demodulator_mode: DemodulatorMode::NonCoherentFm,
            frequency_offset_correction: false,
            phase_search_history: 8,
            phase_search_delay: 3,
            fixed_point_downsampler: false,
            tags_enabled: TagsEnabled::default(),
        }
    }
}

impl ReceiverConfig {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input sample rate.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the channel mode.
    #[must_use]
    pub fn with_channel_mode(mut self, mode: ChannelMode) -> Self {
        self.channel_mode = mode;
        self
    }

    /// Set the channel letters.
    #[must_use]
    pub fn with_channel_letters(mut self, letters: (char, char)) -> Self {
        self.channel_letters = letters;
        self
    }

    /// Set the demodulator mode.
    #[must_use]
    pub fn with_demodulator_mode(mut self, mode: DemodulatorMode) -> Self {
        self.demodulator_mode = mode;
        self
    }

    /// Enable/disable frequency-offset correction.
    #[must_use]
    pub fn with_frequency_offset_correction(mut self, v: bool) -> Self {
        self.frequency_offset_correction = v;
        self
    }

    /// Validate the configuration, performing every construction-time
    /// check named in the error-handling design: rate support and
    /// channel-mode/letter consistency.
    pub fn build(self) -> Result<Self> {
        if crate::downsampler::cascade_for_rate(self.sample_rate).is_none() {
            return Err(Error::UnsupportedRate(self.sample_rate));
        }
        if self.channel_letters.0 == self.channel_letters.1 {
            return Err(Error::BadConfig(
                "channel_letters must be two distinct characters".to_string(),
            ));
        }
        if matches!(
            self.demodulator_mode,
            DemodulatorMode::CoherentPhaseSearch | DemodulatorMode::CoherentPhaseSearchEma
        ) && self.phase_search_history == 0
        {
            return Err(Error::BadConfig(
                "phase_search_history must be nonzero for coherent demodulation".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ReceiverConfig::new().build().is_ok());
    }

    #[test]
    fn unsupported_rate_rejected() {
        let cfg = ReceiverConfig::new().with_sample_rate(12345);
        assert!(matches!(cfg.build(), Err(Error::UnsupportedRate(12345))));
    }

    #[test]
    fn duplicate_channel_letters_rejected() {
        let cfg = ReceiverConfig::new().with_channel_letters(('A', 'A'));
        assert!(matches!(cfg.build(), Err(Error::BadConfig(_))));
    }
}
