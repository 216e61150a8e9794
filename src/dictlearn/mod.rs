//! Harmonic dictionary learning and dictionary-based spectrum synthesis.
//!
//! This module groups the stages that work on the log-frequency spectrogram:
//!
//! - [`atoms`] - harmonic atom groups, the [`Dictionary`] and [`renew`]
//! - [`coder`] - greedy sparse coding of spectrogram columns
//! - [`learn`] - [`learn_spect_dict`], dictionary learning with lifetime renewal
//! - [`synth`] - [`synth_spect`], per-instrument log and linear spectra
//! - [`mask`] - [`mask_spectrums`], soft masks applied to the mixture spectrum
//!
//! Each instrument owns [`VARIANTS_PER_INSTRUMENT`](crate::params::VARIANTS_PER_INSTRUMENT)
//! consecutive atom groups; the synthesizer merges them back per instrument.

pub mod atoms;
pub mod coder;
pub mod learn;
pub mod mask;
pub mod synth;

pub use atoms::{AtomGroup, Dictionary, renew};
pub use coder::{Encoding, SparseCoder, Tone, coding_domain};
pub use learn::learn_spect_dict;
pub use mask::{MASK_FLOOR, MaskedSpectra, mask_spectrums};
pub use synth::{SynthesizedSpectra, synth_spect};

/// Floor for energies and norms used as denominators in the coder and the
/// update rules.
pub const ENERGY_FLOOR: f64 = 1e-12;
