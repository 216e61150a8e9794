//! Gaussian-window spectral transforms.
//!
//! The linear spectrogram is a short-time Fourier transform with a Gaussian
//! window of `2 * spectheight` samples, cut at `sigmas` standard deviations.
//! Each row is therefore the response of one Gaussian-windowed complex
//! sinusoid, and a stationary sinusoid shows up as a Gaussian peak of
//! standard deviation `fsigma = sigmas / π` bins.
//!
//! The log-frequency spectrogram is obtained by a greedy pursuit over those
//! peaks: the largest peak of a column is located with sub-bin precision,
//! removed from the residual and re-deposited at its logarithmic position.
//!
//! ## Frame layout
//!
//! A signal of `len` samples has `ceil(len / sampdist)` columns. Column `k` is
//! centred on sample `k * sampdist`, clamped so that every window keeps at
//! least [`EDGE_SIGMAS`] deviations on each side inside the signal. Columns
//! near the edges therefore repeat the first and last full analysis instead
//! of a zero-padded, smeared one. Signals too short for that are analysed
//! around their middle sample, with zeros outside.
//!
//! ## Magnitude scale
//!
//! Magnitudes are scaled by `2 / Σw`, so a sinusoid of amplitude `a` produces
//! a peak of height close to `a`.

use std::f64::consts::PI;
use std::ops::Range;

use ndarray::{Array2, ArrayView2, s};
use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::params::{FrequencyRange, PursuitParams, SpectParams};
use crate::{SeparationError, SeparationResult};

/// Overlap-add normalisation below which output samples are left at zero.
const WINDOW_FLOOR: f64 = 1e-10;

/// Window deviations kept inside the signal by the edge columns.
pub const EDGE_SIGMAS: f64 = 3.0;

/// Truncated Gaussian peak used wherever a spectral peak is rendered,
/// correlated or removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakKernel {
    /// Standard deviation in bins.
    pub stdev: f64,
    /// Half-width of the support in bins.
    pub radius: usize,
}

impl PeakKernel {
    /// Create a kernel cut at `sigmas` standard deviations.
    pub fn new(stdev: f64, sigmas: f64) -> Self {
        Self {
            stdev,
            radius: (stdev * sigmas).ceil().max(1.0) as usize,
        }
    }

    /// Kernel of a spectral peak produced by the analysis window.
    ///
    /// The window is cut at `sigmas = π * fsigma` deviations; the peak is cut
    /// at the same multiple of its own deviation.
    pub fn from_fsigma(fsigma: f64) -> Self {
        Self::new(fsigma, PI * fsigma)
    }

    /// Kernel value at `offset` bins from the centre.
    pub fn value(&self, offset: f64) -> f64 {
        if offset.abs() > self.radius as f64 {
            0.0
        } else {
            let x = offset / self.stdev;
            (-0.5 * x * x).exp()
        }
    }

    /// Bins of a column of length `len` touched by a peak at `center`.
    pub fn support(&self, center: f64, len: usize) -> Range<usize> {
        let lo = (center - self.radius as f64).ceil().max(0.0);
        let hi = ((center + self.radius as f64).floor() + 1.0).min(len as f64);
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return 0..0;
        }
        lo as usize..hi as usize
    }

    /// Adds a peak of the given amplitude to `column`.
    pub fn add(&self, column: &mut [f64], center: f64, amplitude: f64) {
        for x in self.support(center, column.len()) {
            column[x] += amplitude * self.value(x as f64 - center);
        }
    }

    /// Inner product of `column` with a unit peak at `center`.
    pub fn correlate(&self, column: &[f64], center: f64) -> f64 {
        self.support(center, column.len())
            .map(|x| column[x] * self.value(x as f64 - center))
            .sum()
    }

    /// Squared norm of the part of a unit peak at `center` that lies inside a
    /// column of length `len`.
    pub fn energy(&self, center: f64, len: usize) -> f64 {
        self.support(center, len)
            .map(|x| self.value(x as f64 - center).powi(2))
            .sum()
    }

    /// Correlation of `column` with a unit peak centred on every bin.
    pub fn correlate_all(&self, column: &[f64]) -> Vec<f64> {
        let radius = self.radius as isize;
        let taps: Vec<f64> = (-radius..=radius).map(|d| self.value(d as f64)).collect();
        let len = column.len() as isize;
        (0..len)
            .map(|q| {
                let lo = (q - radius).max(0);
                let hi = (q + radius).min(len - 1);
                (lo..=hi)
                    .map(|x| column[x as usize] * taps[(x - q + radius) as usize])
                    .sum()
            })
            .collect()
    }
}

/// Mapping between linear bins and log-frequency bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogFrequencyMap {
    min_bin: f64,
    max_bin: f64,
    scale: f64,
    height: usize,
}

impl LogFrequencyMap {
    /// Build the map for a frequency range and a kernel bank.
    pub fn new(range: &FrequencyRange, spect: &SpectParams) -> Self {
        let n = spect.fft_len() as f64;
        Self {
            min_bin: range.minfreq * n,
            max_bin: range.maxfreq * n,
            scale: range.log_scale(),
            height: range.logspectheight,
        }
    }

    /// Log position of a (fractional) linear bin.
    pub fn to_log(&self, bin: f64) -> f64 {
        self.scale * (bin / self.min_bin).ln()
    }

    /// Linear bin of a (fractional) log position.
    pub fn to_linear(&self, position: f64) -> f64 {
        self.min_bin * (position / self.scale).exp()
    }

    /// Whether a linear bin lies in the represented range.
    pub fn contains(&self, bin: f64) -> bool {
        bin >= self.min_bin && bin < self.max_bin
    }

    /// Number of log bins.
    pub const fn height(&self) -> usize {
        self.height
    }
}

/// Applies `f` to every frame index, in parallel when the
/// `parallel-processing` feature is enabled. Results keep frame order.
pub(crate) fn map_frames<T, F>(frames: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    #[cfg(feature = "parallel-processing")]
    {
        use rayon::prelude::*;
        (0..frames).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel-processing"))]
    {
        (0..frames).map(f).collect()
    }
}

fn gaussian_window(params: &SpectParams) -> Vec<f64> {
    let n = params.fft_len();
    let stdev = params.window_stdev();
    let center = n as f64 / 2.0;
    (0..n)
        .map(|j| {
            let x = (j as f64 - center) / stdev;
            if x.abs() > params.sigmas {
                0.0
            } else {
                (-0.5 * x * x).exp()
            }
        })
        .collect()
}

/// Sample on which column `frame` of a `siglen`-sample signal is centred.
pub fn frame_center(params: &SpectParams, frame: usize, siglen: usize) -> usize {
    let margin = EDGE_SIGMAS * params.fft_len() as f64 / (2.0 * params.sigmas);
    let margin = (margin.ceil() as usize).min(params.spectheight);
    let center = frame * params.sampdist;
    match siglen.checked_sub(margin + 1) {
        Some(last) if last >= margin => center.clamp(margin, last),
        _ => siglen / 2,
    }
}

fn sample_at(signal: &[f64], index: isize) -> f64 {
    usize::try_from(index)
        .ok()
        .and_then(|i| signal.get(i))
        .copied()
        .unwrap_or(0.0)
}

/// Computes the complex short-time spectrum with the Gaussian kernel bank.
///
/// Returns an array of shape `(spectheight, ceil(len / sampdist))`.
pub fn stft(signal: &[f64], params: &SpectParams) -> SeparationResult<Array2<Complex<f64>>> {
    params.validate()?;

    let n = params.fft_len();
    let half = params.spectheight as isize;
    let frames = params.num_frames(signal.len());
    let window = gaussian_window(params);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);

    let mut result = Array2::zeros((params.spectheight, frames));
    let mut buffer = vec![Complex::new(0.0, 0.0); n];

    for frame in 0..frames {
        let start = frame_center(params, frame, signal.len()) as isize - half;
        for (j, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(sample_at(signal, start + j as isize) * window[j], 0.0);
        }
        fft.process(&mut buffer);
        for (bin, value) in buffer.iter().take(params.spectheight).enumerate() {
            result[[bin, frame]] = *value;
        }
    }

    Ok(result)
}

/// Computes the linear-frequency magnitude spectrogram of a signal.
///
/// An all-zero or empty signal yields an all-zero (or zero-column)
/// spectrogram.
pub fn spectrogram(signal: &[f64], params: &SpectParams) -> SeparationResult<Array2<f64>> {
    let window_sum: f64 = gaussian_window(params).iter().sum();
    let scale = 2.0 / window_sum;
    Ok(stft(signal, params)?.mapv(|c| c.norm() * scale))
}

/// Outcome of the pursuit on a single column.
#[derive(Debug, Clone)]
struct PursuedColumn {
    log: Vec<f64>,
    lin: Vec<f64>,
    residual_energy: f64,
    peaks: usize,
}

/// Locates the vertex of the parabola through the log magnitudes around
/// `bin`. Exact for Gaussian peaks.
fn refine_peak(column: &[f64], bin: usize) -> (f64, f64) {
    let value = column[bin];
    if bin == 0 || bin + 1 >= column.len() {
        return (bin as f64, value);
    }
    let (left, right) = (column[bin - 1], column[bin + 1]);
    if left <= 0.0 || right <= 0.0 {
        return (bin as f64, value);
    }
    let (a, b, c) = (left.ln(), value.ln(), right.ln());
    let curvature = a - 2.0 * b + c;
    if curvature >= 0.0 {
        return (bin as f64, value);
    }
    let delta = (0.5 * (a - c) / curvature).clamp(-0.5, 0.5);
    (bin as f64 + delta, (b - 0.25 * (a - c) * delta).exp())
}

fn pursue_column(
    mut residual: Vec<f64>,
    floor: f64,
    max_peaks: usize,
    kernel: &PeakKernel,
    map: &LogFrequencyMap,
) -> PursuedColumn {
    let mut log = vec![0.0; map.height()];
    let mut lin = vec![0.0; residual.len()];
    let mut peaks = 0;

    for _ in 0..max_peaks {
        let Some((bin, value)) = residual
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            break;
        };
        if value <= floor || value <= 0.0 {
            break;
        }

        let (center, amplitude) = refine_peak(&residual, bin);
        // clamping keeps every residual entry in [0, previous value]
        for x in kernel.support(center, residual.len()) {
            residual[x] = (residual[x] - amplitude * kernel.value(x as f64 - center)).max(0.0);
        }

        if map.contains(center) {
            kernel.add(&mut lin, center, amplitude);
            kernel.add(&mut log, map.to_log(center), amplitude);
            peaks += 1;
        }
    }

    PursuedColumn {
        log,
        lin,
        residual_energy: residual.iter().map(|v| v * v).sum(),
        peaks,
    }
}

/// Computes the sparse log-frequency spectrogram of a signal.
///
/// Returns `(logspect, linspect)`: the log-frequency spectrogram of shape
/// `(logspectheight, frames)` and the linear spectrogram of shape
/// `(spectheight, frames)` rebuilt from the same extracted peaks. The result
/// only depends on the inputs, so it may be cached and reused.
pub fn logspect_pursuit(
    signal: &[f64],
    spect: &SpectParams,
    range: &FrequencyRange,
    pursuit: &PursuitParams,
) -> SeparationResult<(Array2<f64>, Array2<f64>)> {
    spect.validate()?;
    range.validate()?;
    pursuit.validate()?;

    let linear = spectrogram(signal, spect)?;
    let map = LogFrequencyMap::new(range, spect);
    let kernel = PeakKernel::from_fsigma(spect.fsigma());
    let floor = pursuit.threshold * linear.fold(0.0f64, |m, &v| m.max(v));
    let frames = linear.ncols();

    let columns = map_frames(frames, |frame| {
        pursue_column(
            linear.column(frame).to_vec(),
            floor,
            pursuit.max_peaks,
            &kernel,
            &map,
        )
    });

    let mut logspect = Array2::zeros((range.logspectheight, frames));
    let mut linspect = Array2::zeros((spect.spectheight, frames));
    let mut peaks = 0;
    for (frame, column) in columns.into_iter().enumerate() {
        for (dst, src) in logspect.column_mut(frame).iter_mut().zip(&column.log) {
            *dst = *src;
        }
        for (dst, src) in linspect.column_mut(frame).iter_mut().zip(&column.lin) {
            *dst = *src;
        }
        peaks += column.peaks;
    }

    debug!(frames, peaks, "log-frequency pursuit finished");
    Ok((logspect, linspect))
}

/// Phase of bin `bin` for a sinusoid at the bin frequency, observed in a
/// frame centred on sample `center`.
fn coherent_phase(bin: usize, center: usize, n: usize) -> f64 {
    let turns = ((bin as u128 * center as u128) % n as u128) as f64 / n as f64;
    2.0 * PI * turns - PI * (bin % 2) as f64
}

/// Resynthesizes `siglen` samples from a linear magnitude spectrogram.
///
/// Every non-zero cell contributes a Gaussian-windowed sinusoid of its bin
/// frequency, centred on its frame (see [`frame_center`]); frames are
/// overlap-added and normalised by the summed squared window. With a
/// `reference` signal of `siglen` samples the phases of its spectrum are used
/// instead of the bin-coherent phases.
///
/// The mapping is linear in `spectrum` for a fixed reference, so
/// resynthesizing a sum of spectra equals summing their resyntheses.
///
/// # Errors
/// Returns `DimensionMismatch` if the spectrum does not have `spectheight`
/// rows, or if the reference is not `siglen` samples long.
pub fn synth_audio(
    spectrum: &Array2<f64>,
    siglen: usize,
    params: &SpectParams,
    reference: Option<&[f64]>,
) -> SeparationResult<Vec<f64>> {
    params.validate()?;
    if spectrum.nrows() != params.spectheight {
        return Err(SeparationError::DimensionMismatch(format!(
            "Spectrum has {} rows, expected {}",
            spectrum.nrows(),
            params.spectheight
        )));
    }

    let frames = spectrum.ncols();
    let phases = match reference {
        Some(signal) => {
            if signal.len() != siglen {
                return Err(SeparationError::DimensionMismatch(format!(
                    "Reference has {} samples, expected {}",
                    signal.len(),
                    siglen
                )));
            }
            let reference_stft = stft(signal, params)?;
            if reference_stft.ncols() != frames {
                return Err(SeparationError::DimensionMismatch(format!(
                    "Reference has {} frames, spectrum has {}",
                    reference_stft.ncols(),
                    frames
                )));
            }
            Some(reference_stft.mapv(|c| c.arg()))
        }
        None => None,
    };

    let n = params.fft_len();
    let half = params.spectheight;
    let window = gaussian_window(params);
    let gain = window.iter().sum::<f64>() / 2.0;

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(n);

    let mut output = vec![0.0; siglen];
    let mut norm = vec![0.0; siglen];
    let mut buffer = vec![Complex::new(0.0, 0.0); n];

    for frame in 0..frames {
        let center = frame_center(params, frame, siglen);
        let start = center as isize - half as isize;

        buffer.fill(Complex::new(0.0, 0.0));
        let mut active = false;
        for bin in 0..half {
            let magnitude = spectrum[[bin, frame]];
            if magnitude == 0.0 {
                continue;
            }
            active = true;
            let phase = match &phases {
                Some(p) => p[[bin, frame]],
                None => coherent_phase(bin, center, n),
            };
            let value = Complex::from_polar(magnitude * gain, phase);
            buffer[bin] += value;
            if bin > 0 {
                buffer[n - bin] += value.conj();
            }
        }
        if active {
            ifft.process(&mut buffer);
        }

        for (j, value) in buffer.iter().enumerate() {
            let Some(idx) = usize::try_from(start + j as isize)
                .ok()
                .filter(|&i| i < siglen)
            else {
                continue;
            };
            if active {
                output[idx] += value.re / n as f64 * window[j];
            }
            norm[idx] += window[j] * window[j];
        }
    }

    for (sample, weight) in output.iter_mut().zip(&norm) {
        if *weight > WINDOW_FLOOR {
            *sample /= weight;
        } else {
            *sample = 0.0;
        }
    }

    Ok(output)
}

/// Column range of a spectrogram handed to an external renderer.
///
/// The range is clamped to the available frames.
pub fn slice_frames(spectrogram: &Array2<f64>, frames: Range<usize>) -> ArrayView2<'_, f64> {
    let end = frames.end.min(spectrogram.ncols());
    let start = frames.start.min(end);
    spectrogram.slice(s![.., start..end])
}
