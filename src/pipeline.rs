//! End-to-end separation of an in-memory mixture.
//!
//! [`Separator`] sequences the stages for `num_dicts` independently seeded
//! runs: analysis of the mixture, dictionary learning, spectrum synthesis,
//! optional masking, resynthesis and, when reference tracks are supplied,
//! evaluation. Intermediate results go through a [`SpectralCache`] under keys
//! derived from the separator's name:
//!
//! | key                 | entry                                  |
//! |---------------------|----------------------------------------|
//! | `{name}-lin`        | linear spectrogram rebuilt by pursuit  |
//! | `{name}-log`        | log-frequency spectrogram              |
//! | `{name}-{run}-dict` | dictionary learned in run `run`        |
//! | `{name}-{run}-spect`| spectra synthesized in run `run`       |
//!
//! Run `r` seeds its own `ChaCha8Rng` with `r`, so results do not depend on
//! whether an entry came from the cache.

use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::cache::{CacheEntry, SpectralCache};
use crate::dictlearn::{
    Dictionary, MaskedSpectra, SynthesizedSpectra, learn_spect_dict, mask_spectrums, synth_spect,
};
use crate::params::SeparationConfig;
use crate::performance::{PerformanceRecord, RunSummary, measures, select_perm, summarize_runs};
use crate::spect::{logspect_pursuit, spectrogram, synth_audio};
use crate::{SeparationError, SeparationResult};

/// Everything produced by one seeded run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// Seed of the run's random generator.
    pub seed: u64,
    /// Learned dictionary.
    pub dictionary: Dictionary,
    /// Spectra rendered from the dictionary.
    pub spectra: SynthesizedSpectra,
    /// Masked mixture spectra, when masking is enabled.
    pub masked: Option<MaskedSpectra>,
    /// Resynthesized full reconstruction.
    pub mixture_audio: Vec<f64>,
    /// Resynthesized instruments, one per row.
    pub instrument_audio: Array2<f64>,
    /// Best assignment against the references, when they were supplied.
    pub performance: Option<PerformanceRecord>,
}

/// Result of [`Separator::separate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeparationReport {
    /// Linear spectrogram of the mixture, the masking reference.
    pub reference_spectrogram: Array2<f64>,
    /// Log-frequency spectrogram of the mixture.
    pub logspect: Array2<f64>,
    /// Linear spectrogram rebuilt from the pursued peaks.
    pub linspect: Array2<f64>,
    /// One entry per dictionary run.
    pub runs: Vec<RunOutput>,
    /// Statistics over the runs, when references were supplied.
    pub summary: Option<RunSummary>,
}

/// Separates mixtures with a fixed configuration and cache.
#[derive(Debug)]
pub struct Separator<C: SpectralCache> {
    name: String,
    config: SeparationConfig,
    cache: C,
}

fn as_spectrogram(entry: CacheEntry) -> Option<Array2<f64>> {
    match entry {
        CacheEntry::Spectrogram(spect) => Some(spect),
        _ => None,
    }
}

fn as_dictionary(entry: CacheEntry) -> Option<Dictionary> {
    match entry {
        CacheEntry::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn as_spectra(entry: CacheEntry) -> Option<SynthesizedSpectra> {
    match entry {
        CacheEntry::Spectra(spectra) => Some(spectra),
        _ => None,
    }
}

impl<C: SpectralCache> Separator<C> {
    /// Create a separator. `name` prefixes every cache key.
    pub fn new(name: impl Into<String>, config: SeparationConfig, cache: C) -> Self {
        Self {
            name: name.into(),
            config,
            cache,
        }
    }

    /// The configuration in use.
    pub const fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// The cache in use.
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    /// Consumes the separator, returning its cache.
    pub fn into_cache(self) -> C {
        self.cache
    }

    fn lookup<T>(&self, key: &str, extract: fn(CacheEntry) -> Option<T>) -> SeparationResult<Option<T>> {
        let Some(entry) = self.cache.get(key) else {
            return Ok(None);
        };
        let kind = entry.kind();
        match extract(entry) {
            Some(value) => {
                debug!(key, "cache hit");
                Ok(Some(value))
            }
            None => Err(SeparationError::CacheError(format!(
                "entry {key} holds a {kind}"
            ))),
        }
    }

    /// Separates `mixture` into `inst_num` instruments, `num_dicts` times.
    ///
    /// `references`, one track per row, enables evaluation: each run then
    /// carries its best assignment and the report a summary over runs.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for an invalid configuration,
    /// `DimensionMismatch` if the references do not hold `inst_num` tracks of
    /// the mixture's length, and `CacheError` if the cache fails or holds an
    /// entry of the wrong kind.
    pub fn separate(
        &mut self,
        mixture: &[f64],
        sample_rate: u32,
        references: Option<&Array2<f64>>,
    ) -> SeparationResult<SeparationReport> {
        self.config.validate(sample_rate)?;
        if let Some(refs) = references {
            if refs.dim() != (self.config.inst_num, mixture.len()) {
                return Err(SeparationError::DimensionMismatch(format!(
                    "References have shape {:?}, expected ({}, {})",
                    refs.dim(),
                    self.config.inst_num,
                    mixture.len()
                )));
            }
        }

        let spect = self.config.spect_params();
        let reference_spectrogram = spectrogram(mixture, &spect)?;
        let (logspect, linspect) = self.pursuit(mixture, sample_rate)?;
        info!(
            name = %self.name,
            samples = mixture.len(),
            frames = logspect.ncols(),
            "mixture analysed"
        );

        let mut runs = Vec::with_capacity(self.config.num_dicts);
        for seed in 0..self.config.num_dicts as u64 {
            runs.push(self.run(
                seed,
                mixture,
                sample_rate,
                &logspect,
                &reference_spectrogram,
                references,
            )?);
        }

        let summary = match references {
            Some(_) => {
                let records: Vec<PerformanceRecord> =
                    runs.iter().filter_map(|run| run.performance.clone()).collect();
                let summary = summarize_runs(&records)?;
                info!(
                    best = summary.best_index,
                    mean_sdr = ?summary.mean.row(0).to_vec(),
                    "separation summary"
                );
                Some(summary)
            }
            None => None,
        };

        Ok(SeparationReport {
            reference_spectrogram,
            logspect,
            linspect,
            runs,
            summary,
        })
    }

    fn pursuit(&mut self, mixture: &[f64], sample_rate: u32) -> SeparationResult<(Array2<f64>, Array2<f64>)> {
        let log_key = format!("{}-log", self.name);
        let lin_key = format!("{}-lin", self.name);
        let cached = (
            self.lookup(&log_key, as_spectrogram)?,
            self.lookup(&lin_key, as_spectrogram)?,
        );
        if let (Some(log), Some(lin)) = cached {
            return Ok((log, lin));
        }

        let (log, lin) = logspect_pursuit(
            mixture,
            &self.config.spect_params(),
            &self.config.frequency_range(sample_rate),
            &self.config.pursuit_params(),
        )?;
        self.cache.put(&log_key, CacheEntry::Spectrogram(log.clone()))?;
        self.cache.put(&lin_key, CacheEntry::Spectrogram(lin.clone()))?;
        Ok((log, lin))
    }

    fn run(
        &mut self,
        seed: u64,
        mixture: &[f64],
        sample_rate: u32,
        logspect: &Array2<f64>,
        reference_spectrogram: &Array2<f64>,
        references: Option<&Array2<f64>>,
    ) -> SeparationResult<RunOutput> {
        let spect = self.config.spect_params();
        let range = self.config.frequency_range(sample_rate);
        let learn = self.config.learn_params();

        let dict_key = format!("{}-{seed}-dict", self.name);
        let dictionary = match self.lookup(&dict_key, as_dictionary)? {
            Some(dict) => dict,
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let dict = learn_spect_dict(logspect, self.config.fsigma(), &learn, &range, &mut rng)?;
                self.cache.put(&dict_key, CacheEntry::Dictionary(dict.clone()))?;
                dict
            }
        };

        let spect_key = format!("{}-{seed}-spect", self.name);
        let spectra = match self.lookup(&spect_key, as_spectra)? {
            Some(spectra) => spectra,
            None => {
                let spectra = synth_spect(logspect, &dictionary, &learn, &spect, &range)?;
                self.cache.put(&spect_key, CacheEntry::Spectra(spectra.clone()))?;
                spectra
            }
        };

        let masked = if self.config.mask {
            Some(mask_spectrums(&spectra.inst_spectrums_lin, reference_spectrogram)?)
        } else {
            None
        };
        let (combined, parts) = match &masked {
            Some(m) => (&m.combined, &m.inst_spectrums),
            None => (&spectra.dict_spectrum_lin, &spectra.inst_spectrums_lin),
        };

        let len = mixture.len();
        let mixture_audio = synth_audio(combined, len, &spect, Some(mixture))?;
        let mut instrument_audio = Array2::zeros((parts.len(), len));
        for (index, part) in parts.iter().enumerate() {
            let audio = synth_audio(part, len, &spect, Some(mixture))?;
            instrument_audio.row_mut(index).assign(&ArrayView1::from(&audio));
        }

        let performance = match references {
            Some(refs) => {
                let record = select_perm(&measures(&instrument_audio, refs)?);
                info!(
                    seed,
                    permutation = ?record.permutation,
                    sdr = ?record.sdr().to_vec(),
                    "run evaluated"
                );
                Some(record)
            }
            None => {
                info!(seed, "run finished");
                None
            }
        };

        Ok(RunOutput {
            seed,
            dictionary,
            spectra,
            masked,
            mixture_audio,
            instrument_audio,
            performance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, NoCache};
    use crate::utils::generation::{mix, sine_wave};
    use std::time::Duration;

    const SAMPLE_RATE: u32 = 8000;

    fn config(runs: usize, num_dicts: usize) -> SeparationConfig {
        SeparationConfig {
            inst_num: 2,
            tone_num: 1,
            har: 3,
            sampdist: 128,
            spectheight: 512,
            logspectheight: 256,
            minfreq: 100.0,
            maxfreq: 3200.0,
            runs,
            lifetime: 250,
            num_dicts,
            ..SeparationConfig::new()
        }
    }

    fn tracks() -> Array2<f64> {
        let duration = Duration::from_millis(500);
        let low = sine_wave(400.0, duration, SAMPLE_RATE, 0.8);
        let high = sine_wave(1000.0, duration, SAMPLE_RATE, 0.4);
        Array2::from_shape_fn((2, low.len()), |(i, j)| if i == 0 { low[j] } else { high[j] })
    }

    fn mixture(tracks: &Array2<f64>) -> Vec<f64> {
        mix(&[tracks.row(0).to_vec(), tracks.row(1).to_vec()])
    }

    #[test]
    fn test_two_tones_are_separated() {
        let refs = tracks();
        let mut separator = Separator::new("tones", config(1000, 1), NoCache);
        let report = separator.separate(&mixture(&refs), SAMPLE_RATE, Some(&refs)).unwrap();

        assert_eq!(report.runs.len(), 1);
        let run = &report.runs[0];
        assert_eq!(run.instrument_audio.dim(), refs.dim());
        let record = run.performance.as_ref().unwrap();
        for sdr in record.sdr() {
            assert!(*sdr > 10.0, "SDR {sdr} dB with permutation {:?}", record.permutation);
        }
        let summary = report.summary.unwrap();
        assert_eq!(summary.best_index, 0);
    }

    #[test]
    fn test_masked_mixture_resynthesizes_the_input() {
        let refs = tracks();
        let input = mixture(&refs);
        let mut separator = Separator::new("tones", config(20, 1), NoCache);
        let report = separator.separate(&input, SAMPLE_RATE, None).unwrap();

        let run = &report.runs[0];
        assert!(run.performance.is_none());
        assert!(report.summary.is_none());
        let middle = input.len() / 2;
        for i in middle - 200..middle + 200 {
            assert!((run.mixture_audio[i] - input[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_cache_hits_reproduce_results() {
        let refs = tracks();
        let input = mixture(&refs);

        let mut fresh = Separator::new("tones", config(60, 2), NoCache);
        let expected = fresh.separate(&input, SAMPLE_RATE, Some(&refs)).unwrap();

        let mut cached = Separator::new("tones", config(60, 2), MemoryCache::new());
        let first = cached.separate(&input, SAMPLE_RATE, Some(&refs)).unwrap();
        let cache = cached.into_cache();
        for key in ["tones-lin", "tones-log", "tones-0-dict", "tones-1-spect"] {
            assert!(cache.contains(key), "missing {key}");
        }
        let mut replay = Separator::new("tones", config(60, 2), cache);
        let second = replay.separate(&input, SAMPLE_RATE, Some(&refs)).unwrap();

        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_ne!(expected.runs[0].dictionary, expected.runs[1].dictionary);
    }

    #[test]
    fn test_unmasked_run_uses_synthesized_spectra() {
        let refs = tracks();
        let mut cfg = config(20, 1);
        cfg.mask = false;
        let mut separator = Separator::new("plain", cfg, NoCache);
        let report = separator.separate(&mixture(&refs), SAMPLE_RATE, None).unwrap();
        let run = &report.runs[0];
        assert!(run.masked.is_none());
        assert_eq!(run.instrument_audio.nrows(), 2);
        assert_eq!(run.mixture_audio.len(), refs.ncols());
    }

    #[test]
    fn test_reference_count_must_match() {
        let refs = tracks();
        let input = mixture(&refs);
        let single = refs.slice(ndarray::s![..1, ..]).to_owned();
        let mut separator = Separator::new("tones", config(10, 1), NoCache);
        assert!(matches!(
            separator.separate(&input, SAMPLE_RATE, Some(&single)),
            Err(SeparationError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_wrong_cache_entry_kind_is_reported() {
        let refs = tracks();
        let mut cache = MemoryCache::new();
        cache
            .put("tones-log", CacheEntry::Dictionary(Dictionary {
                groups: Vec::new(),
                inst_num: 2,
                height: 256,
                log_scale: 1.0,
            }))
            .unwrap();
        let mut separator = Separator::new("tones", config(10, 1), cache);
        assert!(matches!(
            separator.separate(&mixture(&refs), SAMPLE_RATE, None),
            Err(SeparationError::CacheError(_))
        ));
    }
}
