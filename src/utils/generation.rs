//! Signal generation utilities.
//!
//! Deterministic test signals used to exercise the transforms and the
//! separation pipeline: pure tones, compound tones, silence and mixtures.

use std::f64::consts::PI;
use std::time::Duration;

/// Number of samples covered by `duration` at `sample_rate`.
pub fn num_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize
}

/// Generates a sine wave with the specified parameters.
///
/// # Arguments
/// * `frequency` - Frequency of the sine wave in Hz
/// * `duration` - Duration of the signal
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude` - Amplitude of the sine wave
pub fn sine_wave(frequency: f64, duration: Duration, sample_rate: u32, amplitude: f64) -> Vec<f64> {
    let len = num_samples(duration, sample_rate);
    let sample_rate = f64::from(sample_rate);
    let two_pi_freq = 2.0 * PI * frequency;
    (0..len)
        .map(|i| amplitude * (two_pi_freq * i as f64 / sample_rate).sin())
        .collect()
}

/// A single frequency component for compound tone generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneComponent {
    /// Frequency in Hz
    pub frequency: f64,
    /// Amplitude of the component
    pub amplitude: f64,
}

impl ToneComponent {
    /// Creates a new tone component.
    pub const fn new(frequency: f64, amplitude: f64) -> Self {
        Self {
            frequency,
            amplitude,
        }
    }
}

/// Generates a compound tone from multiple frequency components.
///
/// # Examples
/// ```rust
/// use dictsep::{compound_tone, ToneComponent};
/// use std::time::Duration;
///
/// // 440 Hz with two harmonics
/// let components = [
///     ToneComponent::new(440.0, 1.0),
///     ToneComponent::new(880.0, 0.5),
///     ToneComponent::new(1320.0, 0.25),
/// ];
/// let audio = compound_tone(&components, Duration::from_millis(100), 44100);
/// assert_eq!(audio.len(), 4410);
/// ```
pub fn compound_tone(components: &[ToneComponent], duration: Duration, sample_rate: u32) -> Vec<f64> {
    let len = num_samples(duration, sample_rate);
    let mut samples = vec![0.0; len];
    for component in components {
        let tone = sine_wave(component.frequency, duration, sample_rate, component.amplitude);
        for (sample, value) in samples.iter_mut().zip(tone) {
            *sample += value;
        }
    }
    samples
}

/// Generates silence.
pub fn silence(duration: Duration, sample_rate: u32) -> Vec<f64> {
    vec![0.0; num_samples(duration, sample_rate)]
}

/// Sums signals sample by sample. The result is as long as the longest input.
pub fn mix(signals: &[Vec<f64>]) -> Vec<f64> {
    let len = signals.iter().map(Vec::len).max().unwrap_or(0);
    let mut mixture = vec![0.0; len];
    for signal in signals {
        for (sample, value) in mixture.iter_mut().zip(signal) {
            *sample += value;
        }
    }
    mixture
}
