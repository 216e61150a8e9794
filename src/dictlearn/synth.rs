//! Rendering of learned dictionaries into per-instrument spectra.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::params::{FrequencyRange, LearnParams, SpectParams};
use crate::spect::{LogFrequencyMap, PeakKernel, map_frames};
use crate::{SeparationError, SeparationResult};

use super::atoms::Dictionary;
use super::coder::{SparseCoder, coding_domain};

/// Spectra rendered from a dictionary, in both frequency scales.
///
/// Per-instrument spectra combine into the full reconstruction under the
/// coding exponent: `Σ_i inst_i^power == dict^power` cell by cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedSpectra {
    /// Full log-frequency reconstruction.
    pub dict_spectrum: Array2<f64>,
    /// Log-frequency reconstruction of each instrument.
    pub inst_spectrums: Vec<Array2<f64>>,
    /// Full linear-frequency reconstruction.
    pub dict_spectrum_lin: Array2<f64>,
    /// Linear-frequency reconstruction of each instrument.
    pub inst_spectrums_lin: Vec<Array2<f64>>,
}

/// Per-instrument sums of `value^power` for one frame.
struct FrameAccumulation {
    log: Vec<Vec<f64>>,
    lin: Vec<Vec<f64>>,
}

fn accumulate(column: &mut [f64], kernel: &PeakKernel, center: f64, amplitude: f64, power: f64) {
    for x in kernel.support(center, column.len()) {
        column[x] += (amplitude * kernel.value(x as f64 - center)).powf(power);
    }
}

/// Combines per-frame `value^power` sums back into a `(height, frames)`
/// magnitude array.
fn collapse(sums: &[Vec<f64>], height: usize, power: f64) -> Array2<f64> {
    Array2::from_shape_fn((height, sums.len()), |(row, frame)| {
        sums[frame][row].powf(1.0 / power)
    })
}

/// Renders the per-instrument and combined spectra of `logspect` as coded by
/// `dict`.
///
/// Every frame is coded with the same greedy coder used during learning.
/// Each harmonic of a decoded tone becomes a Gaussian peak of width `spread`
/// at its log position, and of width `fsigma` at the corresponding linear
/// bin; the linear peak is only drawn when the harmonic lies inside the
/// frequency range.
///
/// # Errors
/// Returns `InvalidParameter` for invalid parameters, and
/// `DimensionMismatch` when the spectrogram, dictionary and range disagree.
pub fn synth_spect(
    logspect: &Array2<f64>,
    dict: &Dictionary,
    params: &LearnParams,
    spect: &SpectParams,
    range: &FrequencyRange,
) -> SeparationResult<SynthesizedSpectra> {
    params.validate()?;
    spect.validate()?;
    range.validate()?;
    if logspect.nrows() != range.logspectheight || dict.height != range.logspectheight {
        return Err(SeparationError::DimensionMismatch(format!(
            "Log spectrogram has {} rows and dictionary {} bins, expected {}",
            logspect.nrows(),
            dict.height,
            range.logspectheight
        )));
    }
    if dict.inst_num != params.inst_num {
        return Err(SeparationError::DimensionMismatch(format!(
            "Dictionary has {} instruments, expected {}",
            dict.inst_num, params.inst_num
        )));
    }

    let power = params.power();
    let map = LogFrequencyMap::new(range, spect);
    let linear_kernel = PeakKernel::from_fsigma(spect.fsigma());
    let coder = SparseCoder::new(dict, params.tone_num, power);
    let log_height = range.logspectheight as f64;
    let frames = logspect.ncols();

    let accumulated = map_frames(frames, |frame| {
        let encoding = coder.encode(&coding_domain(logspect.column(frame), power));
        let mut log = vec![vec![0.0; range.logspectheight]; dict.inst_num];
        let mut lin = vec![vec![0.0; spect.spectheight]; dict.inst_num];

        for tone in &encoding.tones {
            let instrument = dict.instrument_of(tone.group);
            let group = &dict.groups[tone.group];
            let log_kernel = group.render_kernel();
            for (h, &weight) in group.amplitudes.iter().enumerate() {
                let amplitude = (tone.coefficient * weight).max(0.0).powf(1.0 / power);
                if amplitude == 0.0 {
                    continue;
                }
                let position = tone.position + dict.harmonic_offset(h);
                accumulate(&mut log[instrument], &log_kernel, position, amplitude, power);
                if (0.0..log_height).contains(&position) {
                    accumulate(
                        &mut lin[instrument],
                        &linear_kernel,
                        map.to_linear(position),
                        amplitude,
                        power,
                    );
                }
            }
        }
        FrameAccumulation { log, lin }
    });

    let mut inst_spectrums = Vec::with_capacity(dict.inst_num);
    let mut inst_spectrums_lin = Vec::with_capacity(dict.inst_num);
    let mut total_log = vec![vec![0.0; range.logspectheight]; frames];
    let mut total_lin = vec![vec![0.0; spect.spectheight]; frames];
    for instrument in 0..dict.inst_num {
        let log: Vec<Vec<f64>> = accumulated.iter().map(|a| a.log[instrument].clone()).collect();
        let lin: Vec<Vec<f64>> = accumulated.iter().map(|a| a.lin[instrument].clone()).collect();
        for (total, column) in total_log.iter_mut().zip(&log) {
            total.iter_mut().zip(column).for_each(|(t, v)| *t += v);
        }
        for (total, column) in total_lin.iter_mut().zip(&lin) {
            total.iter_mut().zip(column).for_each(|(t, v)| *t += v);
        }
        inst_spectrums.push(collapse(&log, range.logspectheight, power));
        inst_spectrums_lin.push(collapse(&lin, spect.spectheight, power));
    }

    debug!(frames, instruments = dict.inst_num, "spectra synthesized");
    Ok(SynthesizedSpectra {
        dict_spectrum: collapse(&total_log, range.logspectheight, power),
        inst_spectrums,
        dict_spectrum_lin: collapse(&total_lin, spect.spectheight, power),
        inst_spectrums_lin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictlearn::atoms::AtomGroup;
    use ndarray::array;

    fn range() -> FrequencyRange {
        FrequencyRange::from_hz(100.0, 3200.0, 8000, 256)
    }

    fn spect() -> SpectParams {
        SpectParams::new(512, 6.0, 128)
    }

    fn learn_params() -> LearnParams {
        LearnParams {
            inst_num: 2,
            tone_num: 1,
            pexp: 1.0,
            qexp: 0.5,
            har: 2,
            runs: 0,
            lifetime: 0,
            learn_rate: 0.05,
            renew_threshold: 0.0,
        }
    }

    fn dictionary() -> Dictionary {
        let fsigma = spect().fsigma();
        let group = |amplitudes| AtomGroup {
            fundamental: 0.0,
            amplitudes,
            spread: fsigma,
        };
        Dictionary {
            groups: vec![
                group(array![1.0, 0.0]),
                group(array![1.0, 0.0]),
                group(array![0.8, 0.6]),
                group(array![0.8, 0.6]),
            ],
            inst_num: 2,
            height: 256,
            log_scale: range().log_scale(),
        }
    }

    /// Two-tone log spectrogram built by rendering peaks directly.
    fn logspect(frames: usize) -> Array2<f64> {
        let kernel = PeakKernel::from_fsigma(spect().fsigma());
        let mut column = vec![0.0; 256];
        kernel.add(&mut column, 60.0, 0.8);
        kernel.add(&mut column, 150.0, 0.4);
        Array2::from_shape_fn((256, frames), |(row, _)| column[row])
    }

    #[test]
    fn test_instruments_combine_into_reconstruction() {
        let p = learn_params();
        let result = synth_spect(&logspect(5), &dictionary(), &p, &spect(), &range()).unwrap();

        assert_eq!(result.inst_spectrums.len(), 2);
        assert_eq!(result.dict_spectrum.dim(), (256, 5));
        assert_eq!(result.dict_spectrum_lin.dim(), (512, 5));
        let power = p.power();
        for (combined, parts) in [
            (&result.dict_spectrum, &result.inst_spectrums),
            (&result.dict_spectrum_lin, &result.inst_spectrums_lin),
        ] {
            for ((row, frame), &value) in combined.indexed_iter() {
                let sum: f64 = parts.iter().map(|s| s[[row, frame]].powf(power)).sum();
                assert!((sum - value.powf(power)).abs() < 1e-9);
                assert!(value >= 0.0);
            }
        }
    }

    #[test]
    fn test_each_instrument_holds_one_tone() {
        let result = synth_spect(&logspect(3), &dictionary(), &learn_params(), &spect(), &range()).unwrap();
        let argmax = |s: &Array2<f64>| {
            s.column(1)
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap()
        };
        let mut peaks: Vec<usize> = result.inst_spectrums.iter().map(argmax).collect();
        peaks.sort_unstable();
        assert!((peaks[0] as i64 - 60).abs() <= 1, "{peaks:?}");
        assert!((peaks[1] as i64 - 150).abs() <= 1, "{peaks:?}");
    }

    #[test]
    fn test_linear_peaks_land_on_mapped_bins() {
        let map = LogFrequencyMap::new(&range(), &spect());
        let result = synth_spect(&logspect(2), &dictionary(), &learn_params(), &spect(), &range()).unwrap();
        let column = result.dict_spectrum_lin.column(0);
        let expected = map.to_linear(60.0).round() as usize;
        let window = expected - 2..expected + 3;
        let local = window.clone().map(|b| column[b]).fold(0.0, f64::max);
        assert!(local > 0.5, "peak {local} near bin {expected}");
    }

    #[test]
    fn test_empty_and_mismatched_inputs() {
        let p = learn_params();
        let empty = synth_spect(&Array2::zeros((256, 0)), &dictionary(), &p, &spect(), &range()).unwrap();
        assert_eq!(empty.dict_spectrum.dim(), (256, 0));
        assert_eq!(empty.inst_spectrums_lin[1].dim(), (512, 0));

        assert!(matches!(
            synth_spect(&Array2::zeros((128, 2)), &dictionary(), &p, &spect(), &range()),
            Err(SeparationError::DimensionMismatch(_))
        ));
    }
}
