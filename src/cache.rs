//! Cache collaborators for intermediate separation results.
//!
//! The [`Separator`](crate::pipeline::Separator) asks its cache before
//! computing a spectrogram, a dictionary or a set of synthesized spectra, and
//! stores whatever it computes. Every stage is deterministic, so a cache hit
//! yields exactly what a recomputation would.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::SeparationResult;
use crate::dictlearn::{Dictionary, SynthesizedSpectra};

/// A cached intermediate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEntry {
    /// A linear or log-frequency spectrogram.
    Spectrogram(Array2<f64>),
    /// A learned dictionary.
    Dictionary(Dictionary),
    /// Spectra synthesized from a dictionary.
    Spectra(SynthesizedSpectra),
}

impl CacheEntry {
    /// Short name of the entry kind, for error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            CacheEntry::Spectrogram(_) => "spectrogram",
            CacheEntry::Dictionary(_) => "dictionary",
            CacheEntry::Spectra(_) => "spectra",
        }
    }
}

/// Key-value store for intermediate results.
pub trait SpectralCache {
    /// Returns the entry stored under `key`, if any.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Stores `entry` under `key`, replacing any previous entry.
    fn put(&mut self, key: &str, entry: CacheEntry) -> SeparationResult<()>;
}

/// In-memory cache backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl SpectralCache for MemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, entry: CacheEntry) -> SeparationResult<()> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }
}

/// Cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl SpectralCache for NoCache {
    fn get(&self, _key: &str) -> Option<CacheEntry> {
        None
    }

    fn put(&mut self, _key: &str, _entry: CacheEntry) -> SeparationResult<()> {
        Ok(())
    }
}
