//! Caching of computed time signals.
//!
//! A [TimeCache] stage sits behind an expensive stage (usually a
//! beamformer) and stores its complete output under a key derived from the
//! stage's digest. Where the signals are kept is up to the [BlockCache]
//! implementation; [MemoryCache] keeps them in memory for the lifetime of
//! the process.

use crate::error::BeamError;
use crate::sources::{check_block_size, Block, BlockResult, BlockStream, SamplesGenerator};

use log::{info, warn};
use ndarray::{concatenate, s, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// When cached results are read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachingMode {
    /// Read if present, otherwise compute and write.
    #[default]
    Individual,
    /// Same as [CachingMode::Individual].
    All,
    /// Never read, never write.
    None,
    /// Read if present, otherwise compute without writing.
    Readonly,
    /// Always compute and write, replacing what is there.
    Overwrite,
}

impl CachingMode {
    /// Whether cached results are used.
    pub fn reads(&self) -> bool {
        matches!(
            self,
            CachingMode::Individual | CachingMode::All | CachingMode::Readonly
        )
    }

    /// Whether computed results are stored.
    pub fn writes(&self) -> bool {
        matches!(
            self,
            CachingMode::Individual | CachingMode::All | CachingMode::Overwrite
        )
    }
}

impl FromStr for CachingMode {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(CachingMode::Individual),
            "all" => Ok(CachingMode::All),
            "none" => Ok(CachingMode::None),
            "readonly" => Ok(CachingMode::Readonly),
            "overwrite" => Ok(CachingMode::Overwrite),
            other => Err(BeamError::InvalidParameter(format!(
                "unknown caching mode '{other}'"
            ))),
        }
    }
}

/// A complete time signal as it is kept in a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSignal {
    /// Sample rate, in Hz.
    pub sample_freq: f64,
    /// Samples, `(samples, channels)`.
    pub data: Array2<f64>,
}

/// Storage for complete time signals, addressed by key.
pub trait BlockCache: Send + Sync {
    /// The signal stored under `key`, if there is one.
    fn get(&self, key: &str) -> Result<Option<CachedSignal>, BeamError>;

    /// Stores `signal` under `key`, replacing any previous signal.
    fn put(&self, key: &str, signal: CachedSignal) -> Result<(), BeamError>;
}

/// An in-memory [BlockCache]. Clones share their entries, which are
/// released together with the last clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CachedSignal>>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored signals.
    pub fn len(&self) -> Result<usize, BeamError> {
        let entries = self.entries.lock().map_err(|_| BeamError::PoisonedCache)?;
        Ok(entries.len())
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> Result<bool, BeamError> {
        Ok(self.len()? == 0)
    }
}

impl BlockCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CachedSignal>, BeamError> {
        let entries = self.entries.lock().map_err(|_| BeamError::PoisonedCache)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, signal: CachedSignal) -> Result<(), BeamError> {
        let mut entries = self.entries.lock().map_err(|_| BeamError::PoisonedCache)?;
        entries.insert(key.to_string(), signal);
        Ok(())
    }
}

/// Passes its source through, reading the output from a cache when it is
/// there and storing it when it is not.
///
/// A signal is only stored once the source has delivered all of it without
/// error.
#[derive(Clone)]
pub struct TimeCache<S> {
    source: S,
    cache: Arc<dyn BlockCache>,
    mode: CachingMode,
}

impl<S: SamplesGenerator> TimeCache<S> {
    /// Caches the output of `source` in `cache`.
    pub fn new(source: S, cache: Arc<dyn BlockCache>) -> Self {
        Self {
            source,
            cache,
            mode: CachingMode::default(),
        }
    }

    /// Sets when the cache is read and written.
    pub fn with_mode(mut self, mode: CachingMode) -> Self {
        self.mode = mode;
        self
    }

    /// The key the output of the source is stored under.
    pub fn key(&self) -> Result<String, BeamError> {
        Ok(format!("tc_{}", self.source.digest()?))
    }
}

impl<S: SamplesGenerator> SamplesGenerator for TimeCache<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.source.num_channels()
    }

    fn num_samples(&self) -> Option<usize> {
        self.source.num_samples()
    }

    fn digest(&self) -> Result<String, BeamError> {
        crate::digest::digest(&("TimeCache", self.source.digest()?))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        let key = self.key()?;

        if self.mode.reads() {
            if let Some(signal) = self.cache.get(&key)? {
                info!("TimeCache : reading {} from cache.", key);
                let data = signal.data;
                let total = data.nrows();
                return Ok(Box::new((0..total).step_by(num).map(move |start| {
                    let stop = (start + num).min(total);
                    Ok(data.slice(s![start..stop, ..]).to_owned())
                })));
            }
        }

        info!("TimeCache : computing {}.", key);
        let source = self.source.result(num)?;
        if !self.mode.writes() {
            return Ok(source);
        }
        Ok(Box::new(RecordingStream {
            source,
            cache: Arc::clone(&self.cache),
            key,
            sample_freq: self.source.sample_freq(),
            channels: self.source.num_channels(),
            recorded: Vec::new(),
            failed: false,
            done: false,
        }))
    }
}

/// Passes blocks through and stores all of them once the source is done.
struct RecordingStream<'a> {
    source: BlockStream<'a>,
    cache: Arc<dyn BlockCache>,
    key: String,
    sample_freq: f64,
    channels: usize,
    recorded: Vec<Block>,
    failed: bool,
    done: bool,
}

impl RecordingStream<'_> {
    fn store(&mut self) -> Result<(), BeamError> {
        let views: Vec<_> = self.recorded.iter().map(|b| b.view()).collect();
        let data = if views.is_empty() {
            Array2::zeros((0, self.channels))
        } else {
            concatenate(Axis(0), &views)
                .map_err(|e| BeamError::InvalidParameter(e.to_string()))?
        };
        self.cache.put(
            &self.key,
            CachedSignal {
                sample_freq: self.sample_freq,
                data,
            },
        )
    }
}

impl Iterator for RecordingStream<'_> {
    type Item = BlockResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next() {
            Some(Ok(block)) => {
                self.recorded.push(block.clone());
                Some(Ok(block))
            }
            Some(Err(error)) => {
                self.failed = true;
                Some(Err(error))
            }
            None => {
                self.done = true;
                if !self.failed {
                    match self.store() {
                        Ok(()) => info!("TimeCache : stored {}.", self.key),
                        Err(error) => warn!("TimeCache : could not store {} : {}.", self.key, error),
                    }
                }
                self.recorded.clear();
                None
            }
        }
    }
}
