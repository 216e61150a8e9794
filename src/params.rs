//! Configuration types for the separation stages.
//!
//! Every numeric knob of the separation lives here. The stage functions take
//! these structs by reference and call `validate` before doing any work, so an
//! invalid configuration is rejected before a single sample is touched.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::{SeparationError, SeparationResult};

/// Number of atom groups learned per instrument.
///
/// Over-provisioning lets the learner settle on two tone variants for each
/// instrument; the synthesizer merges each pair back into one instrument.
pub const VARIANTS_PER_INSTRUMENT: usize = 2;

/// Parameters of the Gaussian kernel bank shared by the forward and inverse
/// spectral transforms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectParams {
    /// Number of linear frequency bins (rows) of the spectrogram.
    pub spectheight: usize,
    /// Number of standard deviations after which the window is cut.
    pub sigmas: f64,
    /// Distance in samples between two spectrogram columns.
    pub sampdist: usize,
}

impl SpectParams {
    /// Create a new set of transform parameters.
    pub const fn new(spectheight: usize, sigmas: f64, sampdist: usize) -> Self {
        Self {
            spectheight,
            sigmas,
            sampdist,
        }
    }

    /// Length of the analysis frame, twice the number of linear bins.
    pub const fn fft_len(&self) -> usize {
        2 * self.spectheight
    }

    /// Standard deviation of the Gaussian window in samples.
    pub fn window_stdev(&self) -> f64 {
        self.fft_len() as f64 / (2.0 * self.sigmas)
    }

    /// Standard deviation of a spectral peak in linear bins, `sigmas / π`.
    pub fn fsigma(&self) -> f64 {
        self.sigmas / PI
    }

    /// Number of spectrogram columns for a signal of the given length.
    pub const fn num_frames(&self, signal_len: usize) -> usize {
        signal_len.div_ceil(self.sampdist)
    }

    /// Validate the transform parameters.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.spectheight == 0 {
            return Err(SeparationError::invalid_parameter(
                "spectheight",
                "must be greater than 0",
            ));
        }
        if self.sampdist == 0 {
            return Err(SeparationError::invalid_parameter(
                "sampdist",
                "must be greater than 0",
            ));
        }
        if !(self.sigmas.is_finite() && self.sigmas > 0.0) {
            return Err(SeparationError::invalid_parameter(
                "sigmas",
                format!("must be a positive number, got {}", self.sigmas),
            ));
        }
        Ok(())
    }
}

/// Frequency range covered by the log-frequency spectrogram.
///
/// Frequencies are stored relative to the sample rate, so `0.5` is Nyquist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    /// Lowest represented frequency (included), as a fraction of the sample rate.
    pub minfreq: f64,
    /// Highest represented frequency (excluded), as a fraction of the sample rate.
    pub maxfreq: f64,
    /// Number of logarithmically spaced bins between the two bounds.
    pub logspectheight: usize,
}

impl FrequencyRange {
    /// Create a range from normalized frequencies.
    pub const fn new(minfreq: f64, maxfreq: f64, logspectheight: usize) -> Self {
        Self {
            minfreq,
            maxfreq,
            logspectheight,
        }
    }

    /// Create a range from frequencies in Hz.
    pub fn from_hz(minfreq: f64, maxfreq: f64, sample_rate: u32, logspectheight: usize) -> Self {
        let sample_rate = f64::from(sample_rate);
        Self::new(minfreq / sample_rate, maxfreq / sample_rate, logspectheight)
    }

    /// Number of log bins per natural-log unit of frequency ratio.
    pub fn log_scale(&self) -> f64 {
        self.logspectheight as f64 / (self.maxfreq / self.minfreq).ln()
    }

    /// Validate the range.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.logspectheight == 0 {
            return Err(SeparationError::invalid_parameter(
                "logspectheight",
                "must be greater than 0",
            ));
        }
        if !(self.minfreq > 0.0 && self.minfreq < 0.5) {
            return Err(SeparationError::invalid_parameter(
                "minfreq",
                format!("{} is outside (0, sample_rate/2)", self.minfreq),
            ));
        }
        if !(self.maxfreq > 0.0 && self.maxfreq < 0.5) {
            return Err(SeparationError::invalid_parameter(
                "maxfreq",
                format!("{} is outside (0, sample_rate/2)", self.maxfreq),
            ));
        }
        if self.minfreq >= self.maxfreq {
            return Err(SeparationError::invalid_parameter(
                "minfreq",
                format!(
                    "must be below maxfreq ({} >= {})",
                    self.minfreq, self.maxfreq
                ),
            ));
        }
        Ok(())
    }
}

/// Stopping rule of the log-frequency pursuit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PursuitParams {
    /// Maximum number of peaks extracted from one column.
    pub max_peaks: usize,
    /// Extraction stops once the residual maximum of a column falls below
    /// this fraction of the spectrogram maximum.
    pub threshold: f64,
}

impl PursuitParams {
    /// Create a new pursuit configuration.
    pub const fn new(max_peaks: usize, threshold: f64) -> Self {
        Self {
            max_peaks,
            threshold,
        }
    }

    /// Validate the pursuit configuration.
    pub fn validate(&self) -> SeparationResult<()> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(SeparationError::invalid_parameter(
                "pursuit_threshold",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

impl Default for PursuitParams {
    fn default() -> Self {
        Self::new(64, 1e-3)
    }
}

/// Parameters of dictionary learning and of the sparse coder shared with the
/// spectrum synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearnParams {
    /// Number of instruments in the mixture.
    pub inst_num: usize,
    /// Maximum number of simultaneous tones per instrument.
    pub tone_num: usize,
    /// Exponent for the addition of sinusoids.
    pub pexp: f64,
    /// Exponent applied to the spectrum before coding.
    pub qexp: f64,
    /// Number of harmonics per atom.
    pub har: usize,
    /// Number of training iterations.
    pub runs: usize,
    /// Number of iterations between two renewal checkpoints. `0` disables renewal.
    pub lifetime: usize,
    /// Step size of the atom updates, in `(0, 1]`.
    pub learn_rate: f64,
    /// Groups whose explained energy since the last checkpoint does not
    /// exceed this value are renewed.
    pub renew_threshold: f64,
}

impl LearnParams {
    /// Number of atom groups in the dictionary.
    pub const fn group_count(&self) -> usize {
        self.inst_num * VARIANTS_PER_INSTRUMENT
    }

    /// Exponent of the domain in which tones add linearly.
    ///
    /// The coder works on `spectrum^(qexp * pexp)`; decoded tones are mapped
    /// back with the reciprocal and combined under the same exponent.
    pub fn power(&self) -> f64 {
        self.pexp * self.qexp
    }

    /// Validate the learning parameters.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.inst_num == 0 {
            return Err(SeparationError::invalid_parameter(
                "inst_num",
                "must be greater than 0",
            ));
        }
        if self.tone_num == 0 {
            return Err(SeparationError::invalid_parameter(
                "tone_num",
                "must be greater than 0",
            ));
        }
        if self.har == 0 {
            return Err(SeparationError::invalid_parameter(
                "har",
                "must be greater than 0",
            ));
        }
        if !(self.pexp.is_finite() && self.pexp > 0.0) {
            return Err(SeparationError::invalid_parameter(
                "pexp",
                "must be a positive number",
            ));
        }
        if !(self.qexp.is_finite() && self.qexp > 0.0) {
            return Err(SeparationError::invalid_parameter(
                "qexp",
                "must be a positive number",
            ));
        }
        if !(self.learn_rate > 0.0 && self.learn_rate <= 1.0) {
            return Err(SeparationError::invalid_parameter(
                "learn_rate",
                format!("{} is outside (0, 1]", self.learn_rate),
            ));
        }
        if !(self.renew_threshold.is_finite() && self.renew_threshold >= 0.0) {
            return Err(SeparationError::invalid_parameter(
                "renew_threshold",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Complete configuration of a separation.
///
/// Mirrors the knobs of the command-line wrapper the algorithm was first
/// published with; [`SeparationConfig::new`] gives the two-instrument preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationConfig {
    /// Number of instruments.
    pub inst_num: usize,
    /// Maximum number of simultaneous tones for each instrument.
    pub tone_num: usize,
    /// Exponent for the addition of sinusoids.
    pub pexp: f64,
    /// Exponent to be applied on the spectrum.
    pub qexp: f64,
    /// Number of harmonics.
    pub har: usize,
    /// Number of standard deviations after which to cut the window/kernel.
    pub sigmas: f64,
    /// Time intervals to sample the spectrogram.
    pub sampdist: usize,
    /// Height of the linear-frequency spectrogram.
    pub spectheight: usize,
    /// Height of the log-frequency spectrogram.
    pub logspectheight: usize,
    /// Minimum frequency in Hz to be represented (included).
    pub minfreq: f64,
    /// Maximum frequency in Hz to be represented (excluded).
    pub maxfreq: f64,
    /// Number of training iterations to perform.
    pub runs: usize,
    /// Number of steps after which to renew the dictionary.
    pub lifetime: usize,
    /// Number of different dictionaries to generate and train.
    pub num_dicts: usize,
    /// Whether to apply spectral masking.
    pub mask: bool,
    /// Maximum number of peaks the pursuit extracts per column.
    pub pursuit_max_peaks: usize,
    /// Relative residual level at which the pursuit stops.
    pub pursuit_threshold: f64,
    /// Step size of the atom updates.
    pub learn_rate: f64,
    /// Usage level at or below which an atom group is renewed.
    pub renew_threshold: f64,
}

impl SeparationConfig {
    /// Two-instrument preset.
    pub fn new() -> Self {
        let pursuit = PursuitParams::default();
        Self {
            inst_num: 2,
            tone_num: 1,
            pexp: 1.0,
            qexp: 0.5,
            har: 25,
            sigmas: 6.0,
            sampdist: 256,
            spectheight: 6 * 1024,
            logspectheight: 1024,
            minfreq: 20.0,
            maxfreq: 20480.0,
            runs: 10000,
            lifetime: 500,
            num_dicts: 10,
            mask: true,
            pursuit_max_peaks: pursuit.max_peaks,
            pursuit_threshold: pursuit.threshold,
            learn_rate: 0.05,
            renew_threshold: 0.0,
        }
    }

    /// Kernel bank parameters.
    pub const fn spect_params(&self) -> SpectParams {
        SpectParams::new(self.spectheight, self.sigmas, self.sampdist)
    }

    /// Log-frequency range for the given sample rate.
    pub fn frequency_range(&self, sample_rate: u32) -> FrequencyRange {
        FrequencyRange::from_hz(self.minfreq, self.maxfreq, sample_rate, self.logspectheight)
    }

    /// Pursuit stopping rule.
    pub const fn pursuit_params(&self) -> PursuitParams {
        PursuitParams::new(self.pursuit_max_peaks, self.pursuit_threshold)
    }

    /// Learning parameters.
    pub const fn learn_params(&self) -> LearnParams {
        LearnParams {
            inst_num: self.inst_num,
            tone_num: self.tone_num,
            pexp: self.pexp,
            qexp: self.qexp,
            har: self.har,
            runs: self.runs,
            lifetime: self.lifetime,
            learn_rate: self.learn_rate,
            renew_threshold: self.renew_threshold,
        }
    }

    /// Spectral peak width in linear bins.
    pub fn fsigma(&self) -> f64 {
        self.sigmas / PI
    }

    /// Validate the whole configuration against a sample rate.
    pub fn validate(&self, sample_rate: u32) -> SeparationResult<()> {
        if sample_rate == 0 {
            return Err(SeparationError::invalid_parameter(
                "sample_rate",
                "must be greater than 0",
            ));
        }
        let nyquist = f64::from(sample_rate) / 2.0;
        if self.maxfreq >= nyquist {
            return Err(SeparationError::invalid_parameter(
                "maxfreq",
                format!("{} Hz is not below Nyquist ({} Hz)", self.maxfreq, nyquist),
            ));
        }
        if self.num_dicts == 0 {
            return Err(SeparationError::invalid_parameter(
                "num_dicts",
                "must be greater than 0",
            ));
        }
        self.spect_params().validate()?;
        self.frequency_range(sample_rate).validate()?;
        self.pursuit_params().validate()?;
        self.learn_params().validate()
    }
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SeparationConfig::new();
        assert!(config.validate(44100).is_ok());
        assert_eq!(config.learn_params().group_count(), 4);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SeparationConfig::new();
        config.sampdist = 0;
        assert!(matches!(
            config.validate(44100),
            Err(SeparationError::InvalidParameter(_))
        ));

        config = SeparationConfig::new();
        config.minfreq = config.maxfreq;
        assert!(config.validate(44100).is_err());

        // 20480 Hz is above Nyquist at 32 kHz
        config = SeparationConfig::new();
        assert!(config.validate(32000).is_err());

        config = SeparationConfig::new();
        config.maxfreq = 22050.0;
        assert!(matches!(
            config.validate(44100),
            Err(SeparationError::InvalidParameter(_))
        ));
        assert!(FrequencyRange::new(0.01, 0.5, 64).validate().is_err());
        assert!(FrequencyRange::new(0.01, 0.49, 64).validate().is_ok());

        config = SeparationConfig::new();
        config.tone_num = 0;
        assert!(config.validate(44100).is_err());

        config = SeparationConfig::new();
        config.har = 0;
        assert!(config.validate(44100).is_err());

        config = SeparationConfig::new();
        config.logspectheight = 0;
        assert!(config.validate(44100).is_err());
    }

    #[test]
    fn test_kernel_widths() {
        let params = SpectParams::new(512, 6.0, 128);
        assert_eq!(params.fft_len(), 1024);
        assert!((params.window_stdev() - 1024.0 / 12.0).abs() < 1e-12);
        assert!((params.fsigma() - 6.0 / PI).abs() < 1e-12);
    }

    #[test]
    fn test_frame_count_rounds_up() {
        let params = SpectParams::new(64, 6.0, 100);
        assert_eq!(params.num_frames(0), 0);
        assert_eq!(params.num_frames(100), 1);
        assert_eq!(params.num_frames(101), 2);
        assert_eq!(params.num_frames(1000), 10);
    }

    #[test]
    fn test_frequency_range_from_hz() {
        let range = FrequencyRange::from_hz(100.0, 3200.0, 8000, 256);
        assert!(range.validate().is_ok());
        assert!((range.minfreq - 0.0125).abs() < 1e-12);
        assert!((range.log_scale() - 256.0 / 32f64.ln()).abs() < 1e-9);
    }
}
