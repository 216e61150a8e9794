//! Harmonic atom groups and the dictionary that holds them.

use std::f64::consts::PI;

use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::params::{FrequencyRange, LearnParams, VARIANTS_PER_INSTRUMENT};
use crate::spect::PeakKernel;

use super::ENERGY_FLOOR;

/// A parametric harmonic template: one possible tone of one instrument.
///
/// Positions are expressed in log-frequency bins. Harmonic `h` (counting the
/// fundamental as harmonic 1) of a tone at position `p` sits at
/// `p + log_scale * ln(h)`, where `log_scale` is owned by the [`Dictionary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomGroup {
    /// Typical position of the fundamental, in log bins. Tracks where the
    /// group has been used and seeds its renewal range.
    pub fundamental: f64,
    /// Non-negative harmonic weights with unit L2 norm, one per harmonic.
    pub amplitudes: Array1<f64>,
    /// Standard deviation of each rendered harmonic peak, in log bins.
    pub spread: f64,
}

impl AtomGroup {
    /// Draws a group with a fundamental uniform in `[0, height)` and random
    /// positive harmonic weights.
    pub fn random<R: Rng + ?Sized>(har: usize, spread: f64, height: usize, rng: &mut R) -> Self {
        let fundamental = rng.random::<f64>() * height as f64;
        // 1 - U[0, 1) lies in (0, 1], so no weight starts at zero
        let weights = Array1::from_iter((0..har).map(|_| 1.0 - rng.random::<f64>()));
        Self {
            fundamental,
            amplitudes: normalized(weights.clone()).unwrap_or(weights),
            spread,
        }
    }

    /// Number of harmonics.
    pub fn harmonics(&self) -> usize {
        self.amplitudes.len()
    }

    /// Kernel of one harmonic peak once the spectrum is raised to `power`.
    ///
    /// A Gaussian of deviation `s` raised to `power` is a Gaussian of
    /// deviation `s / sqrt(power)`; the cut-off follows the rendering kernel.
    pub fn coding_kernel(&self, power: f64) -> PeakKernel {
        PeakKernel::new(self.spread / power.sqrt(), PI * self.spread)
    }

    /// Kernel of one harmonic peak in the log-frequency output domain.
    pub fn render_kernel(&self) -> PeakKernel {
        PeakKernel::from_fsigma(self.spread)
    }
}

/// Scales `weights` to unit L2 norm. `None` if the norm is below the energy floor.
pub(crate) fn normalized(weights: Array1<f64>) -> Option<Array1<f64>> {
    let norm = weights.dot(&weights).sqrt();
    (norm > ENERGY_FLOOR).then(|| weights / norm)
}

/// Returns a fresh random replacement for `group`, keeping its harmonic count
/// and peak width.
///
/// The input is left untouched; the learner swaps the returned value in.
pub fn renew<R: Rng + ?Sized>(group: &AtomGroup, height: usize, rng: &mut R) -> AtomGroup {
    AtomGroup::random(group.harmonics(), group.spread, height, rng)
}

/// The learned set of atom groups.
///
/// Groups are laid out instrument by instrument: group `g` belongs to
/// instrument `g / VARIANTS_PER_INSTRUMENT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Atom groups, `inst_num * VARIANTS_PER_INSTRUMENT` of them.
    pub groups: Vec<AtomGroup>,
    /// Number of instruments.
    pub inst_num: usize,
    /// Number of log-frequency bins the groups live on.
    pub height: usize,
    /// Log bins per natural-log unit of frequency ratio.
    pub log_scale: f64,
}

impl Dictionary {
    /// Draws the initial random dictionary for a learning run.
    pub fn random<R: Rng + ?Sized>(
        params: &LearnParams,
        range: &FrequencyRange,
        fsigma: f64,
        rng: &mut R,
    ) -> Self {
        let height = range.logspectheight;
        let groups = (0..params.group_count())
            .map(|_| AtomGroup::random(params.har, fsigma, height, rng))
            .collect();
        Self {
            groups,
            inst_num: params.inst_num,
            height,
            log_scale: range.log_scale(),
        }
    }

    /// Instrument a group belongs to.
    pub const fn instrument_of(&self, group: usize) -> usize {
        group / VARIANTS_PER_INSTRUMENT
    }

    /// Log offset of the harmonic with zero-based index `index` from the
    /// fundamental.
    pub fn harmonic_offset(&self, index: usize) -> f64 {
        self.log_scale * ((index + 1) as f64).ln()
    }

    /// Number of atom groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the dictionary holds no group.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
