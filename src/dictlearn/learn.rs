//! Sparse-coding dictionary learning with atom lifetime renewal.

use ndarray::Array2;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::params::{FrequencyRange, LearnParams};
use crate::{SeparationError, SeparationResult};

use super::ENERGY_FLOOR;
use super::atoms::{AtomGroup, Dictionary, normalized, renew};
use super::coder::{Encoding, SparseCoder, coding_domain};

/// Learns a harmonic dictionary from a log-frequency spectrogram.
///
/// Starting from [`Dictionary::random`], every step draws one frame at
/// random, codes it and nudges each used group towards the residual left at
/// its harmonics. Groups that explained no more than `renew_threshold` energy
/// since the previous checkpoint are replaced by fresh random groups every
/// `lifetime` steps.
///
/// All randomness comes from `rng`, so a fixed seed gives a fixed dictionary.
/// With `runs == 0`, or a spectrogram without frames, the initial random
/// dictionary is returned as drawn.
///
/// # Errors
/// Returns `InvalidParameter` for invalid learning parameters, range or
/// `fsigma`, and `DimensionMismatch` if `logspect` does not have
/// `logspectheight` rows.
pub fn learn_spect_dict<R: Rng + ?Sized>(
    logspect: &Array2<f64>,
    fsigma: f64,
    params: &LearnParams,
    range: &FrequencyRange,
    rng: &mut R,
) -> SeparationResult<Dictionary> {
    params.validate()?;
    range.validate()?;
    if !(fsigma.is_finite() && fsigma > 0.0) {
        return Err(SeparationError::invalid_parameter(
            "fsigma",
            "must be a positive number",
        ));
    }
    if logspect.nrows() != range.logspectheight {
        return Err(SeparationError::DimensionMismatch(format!(
            "Log spectrogram has {} rows, expected {}",
            logspect.nrows(),
            range.logspectheight
        )));
    }

    let mut dict = Dictionary::random(params, range, fsigma, rng);
    let frames = logspect.ncols();
    if frames == 0 {
        warn!("log spectrogram has no frames, returning the initial dictionary");
        return Ok(dict);
    }

    let power = params.power();
    let mut usage = vec![0.0; dict.len()];

    for step in 0..params.runs {
        let frame = rng.random_range(0..frames);
        let target = coding_domain(logspect.column(frame), power);
        let encoding = SparseCoder::new(&dict, params.tone_num, power).encode(&target);

        for tone in &encoding.tones {
            usage[tone.group] += tone.explained;
        }
        adapt(&mut dict, &encoding, params);

        let completed = step + 1;
        if params.lifetime > 0 && completed % params.lifetime == 0 && completed < params.runs {
            let renewed = renew_unused(&mut dict, &usage, params.renew_threshold, rng);
            if !renewed.is_empty() {
                debug!(step = completed, ?renewed, "renewed unused atom groups");
            }
            usage.fill(0.0);
        }
    }

    info!(runs = params.runs, groups = dict.len(), "dictionary learning finished");
    Ok(dict)
}

/// Replaces every group whose usage does not exceed `threshold`.
///
/// Returns the indices of the renewed groups.
pub(crate) fn renew_unused<R: Rng + ?Sized>(
    dict: &mut Dictionary,
    usage: &[f64],
    threshold: f64,
    rng: &mut R,
) -> Vec<usize> {
    let mut renewed = Vec::new();
    for (index, &used) in usage.iter().enumerate() {
        if used <= threshold {
            dict.groups[index] = renew(&dict.groups[index], dict.height, rng);
            renewed.push(index);
        }
    }
    renewed
}

/// Moves the groups used by `encoding` towards the residual at their
/// harmonics.
///
/// Harmonic weights grow where the residual is positive and shrink where the
/// template overshoots; they stay non-negative and are renormalised to unit
/// norm. The fundamental drifts towards the coded position.
fn adapt(dict: &mut Dictionary, encoding: &Encoding, params: &LearnParams) {
    let power = params.power();
    for tone in &encoding.tones {
        let group = &dict.groups[tone.group];
        let kernel = group.coding_kernel(power);

        let mut weights = group.amplitudes.clone();
        for (h, weight) in weights.iter_mut().enumerate() {
            let center = tone.position + dict.harmonic_offset(h);
            let energy = kernel.energy(center, dict.height);
            let step = kernel.correlate(&encoding.residual, center)
                / (tone.coefficient * energy).max(ENERGY_FLOOR);
            *weight = (*weight + params.learn_rate * step).max(0.0);
        }

        let updated = AtomGroup {
            fundamental: group.fundamental + params.learn_rate * (tone.position - group.fundamental),
            amplitudes: normalized(weights).unwrap_or_else(|| group.amplitudes.clone()),
            spread: group.spread,
        };
        dict.groups[tone.group] = updated;
    }
}
