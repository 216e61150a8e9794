//! Separation quality metrics and permutation-invariant evaluation.
//!
//! Synthesized signals are decomposed against the set of reference signals
//! into a target part, an interference part and an artifact part using
//! time-invariant gains:
//!
//! - `s_target` is the projection of the estimate onto its reference,
//! - `e_interf` is what the projection onto all references adds to it,
//! - `e_artif` is the remainder outside the span of the references.
//!
//! The usual ratios then follow, in dB:
//! `SDR = |s_target|² / |e_interf + e_artif|²`,
//! `SIR = |s_target|² / |e_interf|²`,
//! `SAR = |s_target + e_interf|² / |e_artif|²`.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{SeparationError, SeparationResult};

/// Floor applied to energies before division and to the Gram matrix diagonal.
pub const METRIC_FLOOR: f64 = 1e-12;

/// Source counts above which the permutation search gets noticeably slow.
const PERMUTATION_WARN_LIMIT: usize = 4;

/// Metric matrices indexed by `[synthesized, reference]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measures {
    /// Signal-to-distortion ratio in dB.
    pub sdr: Array2<f64>,
    /// Signal-to-interference ratio in dB.
    pub sir: Array2<f64>,
    /// Signal-to-artifact ratio in dB.
    pub sar: Array2<f64>,
}

impl Measures {
    /// Number of sources.
    pub fn sources(&self) -> usize {
        self.sdr.nrows()
    }
}

/// Aggregate maximised by the permutation search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Criterion {
    /// Total signal-to-distortion ratio.
    #[default]
    Sdr,
    /// Total signal-to-interference ratio.
    Sir,
    /// Total signal-to-artifact ratio.
    Sar,
    /// Sum of all three ratios.
    Sum,
}

impl Criterion {
    fn score(self, measures: &Measures, synthesized: usize, reference: usize) -> f64 {
        let cell = [synthesized, reference];
        match self {
            Criterion::Sdr => measures.sdr[cell],
            Criterion::Sir => measures.sir[cell],
            Criterion::Sar => measures.sar[cell],
            Criterion::Sum => measures.sdr[cell] + measures.sir[cell] + measures.sar[cell],
        }
    }
}

/// Outcome of the permutation search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// `permutation[j]` is the synthesized signal assigned to reference `j`.
    pub permutation: Vec<usize>,
    /// Rows SDR, SIR and SAR; column `j` holds the metrics of reference `j`
    /// against its assigned signal.
    pub metrics: Array2<f64>,
}

impl PerformanceRecord {
    /// SDR of every reference under the chosen assignment.
    pub fn sdr(&self) -> ArrayView1<'_, f64> {
        self.metrics.row(0)
    }

    /// SIR of every reference under the chosen assignment.
    pub fn sir(&self) -> ArrayView1<'_, f64> {
        self.metrics.row(1)
    }

    /// SAR of every reference under the chosen assignment.
    pub fn sar(&self) -> ArrayView1<'_, f64> {
        self.metrics.row(2)
    }
}

fn energy(signal: &DVector<f64>) -> f64 {
    signal.norm_squared()
}

fn ratio_db(numerator: f64, denominator: f64) -> f64 {
    10.0 * (numerator.max(METRIC_FLOOR) / denominator.max(METRIC_FLOOR)).log10()
}

/// Computes SDR, SIR and SAR for every (synthesized, reference) pair.
///
/// Both arrays hold one signal per row.
///
/// # Errors
/// Returns `DimensionMismatch` if the arrays differ in shape or hold no
/// signal.
pub fn measures(synthesized: &Array2<f64>, references: &Array2<f64>) -> SeparationResult<Measures> {
    if synthesized.dim() != references.dim() {
        return Err(SeparationError::DimensionMismatch(format!(
            "Synthesized signals have shape {:?}, references have {:?}",
            synthesized.dim(),
            references.dim()
        )));
    }
    let (sources, samples) = references.dim();
    if sources == 0 {
        return Err(SeparationError::DimensionMismatch(
            "At least one reference signal is required".to_string(),
        ));
    }

    let refs: Vec<DVector<f64>> = references
        .axis_iter(Axis(0))
        .map(|row| DVector::from_iterator(samples, row.iter().copied()))
        .collect();
    let gram = DMatrix::from_fn(sources, sources, |i, j| {
        refs[i].dot(&refs[j]) + if i == j { METRIC_FLOOR } else { 0.0 }
    });
    let lu = gram.lu();

    let mut result = Measures {
        sdr: Array2::zeros((sources, sources)),
        sir: Array2::zeros((sources, sources)),
        sar: Array2::zeros((sources, sources)),
    };

    for (i, row) in synthesized.axis_iter(Axis(0)).enumerate() {
        let estimate = DVector::from_iterator(samples, row.iter().copied());
        let correlations = DVector::from_fn(sources, |k, _| refs[k].dot(&estimate));
        // the regularised Gram matrix is positive definite for finite input
        let coefficients = lu
            .solve(&correlations)
            .unwrap_or_else(|| DVector::zeros(sources));
        let projection = refs
            .iter()
            .zip(coefficients.iter())
            .fold(DVector::<f64>::zeros(samples), |acc, (r, &c)| acc + r * c);
        let e_artif = &estimate - &projection;

        for (j, reference) in refs.iter().enumerate() {
            let gain = reference.dot(&estimate) / (energy(reference) + METRIC_FLOOR);
            let s_target = reference * gain;
            let e_interf = &projection - &s_target;

            let target = energy(&s_target);
            result.sdr[[i, j]] = ratio_db(target, energy(&(&e_interf + &e_artif)));
            result.sir[[i, j]] = ratio_db(target, energy(&e_interf));
            result.sar[[i, j]] = ratio_db(energy(&(&s_target + &e_interf)), energy(&e_artif));
        }
    }

    Ok(result)
}

/// Rearranges `items` into the next lexicographic permutation. Returns
/// `false` once the last permutation has been passed.
fn next_permutation(items: &mut [usize]) -> bool {
    let Some(pivot) = items.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let successor = items
        .iter()
        .rposition(|&x| x > items[pivot])
        .unwrap_or(pivot + 1);
    items.swap(pivot, successor);
    items[pivot + 1..].reverse();
    true
}

const fn is_costly_search(sources: usize) -> bool {
    sources > PERMUTATION_WARN_LIMIT
}

/// Finds the assignment of synthesized signals to references maximising the
/// total SDR.
pub fn select_perm(measures: &Measures) -> PerformanceRecord {
    select_perm_by(measures, Criterion::default())
}

/// Finds the assignment of synthesized signals to references maximising
/// `criterion`.
///
/// All `n!` permutations are tried in lexicographic order and the first
/// maximum wins.
pub fn select_perm_by(measures: &Measures, criterion: Criterion) -> PerformanceRecord {
    let n = measures.sources();
    if is_costly_search(n) {
        warn!(sources = n, "exhaustive permutation search over {n}! assignments");
    }

    let total = |perm: &[usize]| -> f64 {
        perm.iter()
            .enumerate()
            .map(|(reference, &synthesized)| criterion.score(measures, synthesized, reference))
            .sum()
    };

    let mut candidate: Vec<usize> = (0..n).collect();
    let mut best = candidate.clone();
    let mut best_score = total(&candidate);
    while next_permutation(&mut candidate) {
        let score = total(&candidate);
        if score > best_score {
            best_score = score;
            best.clone_from(&candidate);
        }
    }

    let metrics = Array2::from_shape_fn((3, n), |(metric, reference)| {
        let cell = [best[reference], reference];
        match metric {
            0 => measures.sdr[cell],
            1 => measures.sir[cell],
            _ => measures.sar[cell],
        }
    });

    PerformanceRecord {
        permutation: best,
        metrics,
    }
}

/// Statistics of the metrics over several separation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Element-wise mean of the metric matrices.
    pub mean: Array2<f64>,
    /// Element-wise sample standard deviation; zero for a single run.
    pub stdev: Array2<f64>,
    /// Run with the highest summed SDR.
    pub best_index: usize,
}

/// Summarizes the records of several runs.
///
/// # Errors
/// Returns `InvalidParameter` for an empty slice and `DimensionMismatch` if
/// the metric matrices differ in shape.
pub fn summarize_runs(records: &[PerformanceRecord]) -> SeparationResult<RunSummary> {
    let Some(first) = records.first() else {
        return Err(SeparationError::invalid_parameter(
            "records",
            "at least one run is required",
        ));
    };
    let dim = first.metrics.dim();
    if let Some(record) = records.iter().find(|r| r.metrics.dim() != dim) {
        return Err(SeparationError::DimensionMismatch(format!(
            "Run metrics have shape {:?}, expected {:?}",
            record.metrics.dim(),
            dim
        )));
    }

    let count = records.len() as f64;
    let mut mean = Array2::<f64>::zeros(dim);
    for record in records {
        mean += &record.metrics;
    }
    mean /= count;

    let mut stdev = Array2::<f64>::zeros(dim);
    if records.len() > 1 {
        for record in records {
            stdev += &(&record.metrics - &mean).mapv(|d| d * d);
        }
        stdev.mapv_inplace(|v| (v / (count - 1.0)).sqrt());
    }

    let totals: Array1<f64> = records.iter().map(|r| r.sdr().sum()).collect();
    let best_index = totals
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| if v > totals[best] { i } else { best });

    Ok(RunSummary {
        mean,
        stdev,
        best_index,
    })
}
