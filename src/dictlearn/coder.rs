//! Greedy sparse coding of log-spectrogram columns against a dictionary.
//!
//! Columns are coded in the domain `y^power` with `power = pexp * qexp`,
//! where tones add linearly. A tone is a shifted copy of an atom group's
//! harmonic template; the coder repeatedly picks the (group, position) whose
//! template correlates best with the residual, among instruments that still
//! have tone budget, and subtracts its least-squares fit.

use ndarray::ArrayView1;

use crate::spect::PeakKernel;

use super::ENERGY_FLOOR;
use super::atoms::Dictionary;

/// One decoded tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Index of the atom group in the dictionary.
    pub group: usize,
    /// Log-bin position of the fundamental, with sub-bin precision.
    pub position: f64,
    /// Least-squares coefficient of the template.
    pub coefficient: f64,
    /// Squared residual norm removed by this tone.
    pub explained: f64,
}

/// Result of coding one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    /// Tones in extraction order.
    pub tones: Vec<Tone>,
    /// What remains of the coded column.
    pub residual: Vec<f64>,
}

/// Raises a log-spectrogram column into the coding domain.
pub fn coding_domain(column: ArrayView1<'_, f64>, power: f64) -> Vec<f64> {
    column.iter().map(|&v| v.max(0.0).powf(power)).collect()
}

/// Linear interpolation of `values` at a fractional index, zero outside.
fn interpolate(values: &[f64], x: f64) -> f64 {
    if values.is_empty() || x < 0.0 || x > (values.len() - 1) as f64 {
        return 0.0;
    }
    let lo = x.floor() as usize;
    let frac = x - lo as f64;
    match values.get(lo + 1) {
        Some(&next) => values[lo] * (1.0 - frac) + next * frac,
        None => values[lo],
    }
}

/// Sparse coder bound to one dictionary.
#[derive(Debug, Clone)]
pub struct SparseCoder<'a> {
    dict: &'a Dictionary,
    tone_num: usize,
    kernels: Vec<PeakKernel>,
}

impl<'a> SparseCoder<'a> {
    /// Create a coder allowing `tone_num` tones per instrument.
    pub fn new(dict: &'a Dictionary, tone_num: usize, power: f64) -> Self {
        let kernels = dict
            .groups
            .iter()
            .map(|group| group.coding_kernel(power))
            .collect();
        Self {
            dict,
            tone_num,
            kernels,
        }
    }

    /// Kernel of one harmonic peak of `group` in the coding domain.
    pub fn kernel(&self, group: usize) -> &PeakKernel {
        &self.kernels[group]
    }

    /// Template of `group` with its fundamental at `position`.
    pub fn template(&self, group: usize, position: f64) -> Vec<f64> {
        let mut template = vec![0.0; self.dict.height];
        let kernel = &self.kernels[group];
        for (h, &weight) in self.dict.groups[group].amplitudes.iter().enumerate() {
            if weight > 0.0 {
                kernel.add(&mut template, position + self.dict.harmonic_offset(h), weight);
            }
        }
        template
    }

    /// Correlation of the template of `group` with `residual`, at every
    /// integer fundamental position.
    fn scores(&self, group: usize, residual: &[f64]) -> Vec<f64> {
        let correlation = self.kernels[group].correlate_all(residual);
        let amplitudes = &self.dict.groups[group].amplitudes;
        (0..residual.len())
            .map(|p| {
                amplitudes
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| **w > 0.0)
                    .map(|(h, w)| {
                        w * interpolate(&correlation, p as f64 + self.dict.harmonic_offset(h))
                    })
                    .sum()
            })
            .collect()
    }

    /// Codes one column already raised into the coding domain.
    ///
    /// The residual norm never increases, and at most `tone_num` tones are
    /// assigned to each instrument.
    pub fn encode(&self, target: &[f64]) -> Encoding {
        let mut residual = target.to_vec();
        let mut tones = Vec::new();
        if residual.is_empty() {
            return Encoding { tones, residual };
        }
        let mut budget = vec![self.tone_num; self.dict.inst_num];

        loop {
            // ties keep the first group and the lowest position
            let mut best: Option<(usize, usize, f64)> = None;
            let mut best_scores = Vec::new();
            for group in 0..self.dict.len() {
                if budget[self.dict.instrument_of(group)] == 0 {
                    continue;
                }
                let scores = self.scores(group, &residual);
                let mut improved = false;
                for (p, &score) in scores.iter().enumerate() {
                    if best.is_none_or(|(_, _, s)| score > s) {
                        best = Some((group, p, score));
                        improved = true;
                    }
                }
                if improved {
                    best_scores = scores;
                }
            }
            let Some((group, bin, score)) = best else {
                break;
            };
            if score <= ENERGY_FLOOR {
                break;
            }

            let position = refine_position(&best_scores, bin);
            let template = self.template(group, position);
            let tt: f64 = template.iter().map(|t| t * t).sum();
            let rt: f64 = residual.iter().zip(&template).map(|(r, t)| r * t).sum();
            if tt < ENERGY_FLOOR || rt <= 0.0 {
                break;
            }

            let coefficient = rt / tt;
            for (r, t) in residual.iter_mut().zip(&template) {
                *r -= coefficient * t;
            }
            budget[self.dict.instrument_of(group)] -= 1;
            tones.push(Tone {
                group,
                position,
                coefficient,
                explained: rt * rt / tt,
            });
        }

        Encoding { tones, residual }
    }
}

/// Vertex of the parabola through the scores around `bin`.
fn refine_position(scores: &[f64], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= scores.len() {
        return bin as f64;
    }
    let (a, b, c) = (scores[bin - 1], scores[bin], scores[bin + 1]);
    let curvature = a - 2.0 * b + c;
    if curvature >= 0.0 {
        return bin as f64;
    }
    bin as f64 + (0.5 * (a - c) / curvature).clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictlearn::atoms::AtomGroup;
    use approx_eq::assert_approx_eq;
    use ndarray::{Array1, array};

    fn dictionary(inst_num: usize, amplitudes: Array1<f64>) -> Dictionary {
        let group = AtomGroup {
            fundamental: 0.0,
            amplitudes,
            spread: 1.5,
        };
        Dictionary {
            groups: vec![group; inst_num * 2],
            inst_num,
            height: 128,
            log_scale: 20.0,
        }
    }

    #[test]
    fn test_single_tone_is_recovered() {
        let dict = dictionary(1, array![0.8, 0.6]);
        let coder = SparseCoder::new(&dict, 1, 0.5);
        let target: Vec<f64> = coder.template(0, 30.0).iter().map(|v| 2.0 * v).collect();

        let encoding = coder.encode(&target);
        assert_eq!(encoding.tones.len(), 1);
        let tone = encoding.tones[0];
        assert!((tone.position - 30.0).abs() < 0.05, "{}", tone.position);
        assert_approx_eq!(tone.coefficient, 2.0, 0.02);
        let remaining: f64 = encoding.residual.iter().map(|r| r * r).sum();
        let total: f64 = target.iter().map(|r| r * r).sum();
        assert!(remaining < 1e-3 * total);
    }

    #[test]
    fn test_budget_limits_tones_per_instrument() {
        let dict = dictionary(2, array![1.0]);
        let coder = SparseCoder::new(&dict, 1, 1.0);
        let mut target = coder.template(0, 20.0);
        for (t, v) in target.iter_mut().zip(coder.template(0, 60.0)) {
            *t += v;
        }
        for (t, v) in target.iter_mut().zip(coder.template(0, 100.0)) {
            *t += v;
        }

        let encoding = coder.encode(&target);
        assert_eq!(encoding.tones.len(), 2);
        let instruments: Vec<usize> = encoding
            .tones
            .iter()
            .map(|t| dict.instrument_of(t.group))
            .collect();
        assert!(instruments.contains(&0) && instruments.contains(&1));
    }

    #[test]
    fn test_residual_norm_never_increases() {
        let dict = dictionary(3, array![0.6, 0.5, 0.4, 0.3]);
        let coder = SparseCoder::new(&dict, 2, 0.5);
        let target: Vec<f64> = (0..128)
            .map(|i| ((i as f64) * 0.37).sin().abs() + if i % 17 == 0 { 3.0 } else { 0.0 })
            .collect();

        let encoding = coder.encode(&target);
        let mut energy: f64 = target.iter().map(|v| v * v).sum();
        for tone in &encoding.tones {
            assert!(tone.explained >= 0.0);
            energy -= tone.explained;
        }
        let remaining: f64 = encoding.residual.iter().map(|r| r * r).sum();
        assert!((remaining - energy).abs() < 1e-6 * target.len() as f64);
        assert!(encoding.tones.len() <= 6);
    }

    #[test]
    fn test_silent_column_has_no_tones() {
        let dict = dictionary(2, array![1.0, 0.5]);
        let coder = SparseCoder::new(&dict, 3, 0.5);
        let encoding = coder.encode(&vec![0.0; 128]);
        assert!(encoding.tones.is_empty());
        assert!(encoding.residual.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_coding_domain_clamps_and_raises() {
        let column = array![4.0, -1.0, 0.0, 9.0];
        assert_eq!(coding_domain(column.view(), 0.5), vec![2.0, 0.0, 0.0, 3.0]);
    }
}
