//! Defines the [SamplesGenerator] trait, the pull-based interface every
//! timebeam stage implements, together with the two sources that sit at
//! the start of a pipeline: [TimeSamples] for data already in memory and
//! [WavSamples] for recordings on disk.
//!
//! A stage hands out blocks of shape `(samples, channels)`. All blocks of a
//! stream have the requested number of samples except the last one, which
//! may be shorter; a stream never yields an empty block. Asking a stage for
//! its [SamplesGenerator::result] starts a fresh, independent run.

use crate::digest::{digest, digest_samples};
use crate::error::BeamError;

use hound::{SampleFormat, WavReader};
use log::debug;
use ndarray::{s, Array2};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A block of samples, one row per time step and one column per channel.
pub type Block = Array2<f64>;

/// What a stream yields for every block.
pub type BlockResult = Result<Block, BeamError>;

/// A stream of blocks, borrowed from the stage that produced it.
pub type BlockStream<'a> = Box<dyn Iterator<Item = BlockResult> + 'a>;

///
/// A producer of multichannel sample blocks. Stages own their upstream
/// stage, so a whole pipeline is one value, and pulling a block from the
/// last stage pulls exactly as much as needed through all the others.
///
pub trait SamplesGenerator {
    /// Sample rate of the output, in Hz.
    fn sample_freq(&self) -> f64;

    /// Number of channels in every output block.
    fn num_channels(&self) -> usize;

    /// Number of output samples, when known in advance.
    fn num_samples(&self) -> Option<usize>;

    /// Content-derived identifier of everything that determines the output.
    fn digest(&self) -> Result<String, BeamError>;

    /// Starts a stream of blocks with `num` samples each. Setup problems are
    /// reported here, problems during streaming as an `Err` item.
    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError>;
}

impl<S: SamplesGenerator + ?Sized> SamplesGenerator for Box<S> {
    fn sample_freq(&self) -> f64 {
        (**self).sample_freq()
    }

    fn num_channels(&self) -> usize {
        (**self).num_channels()
    }

    fn num_samples(&self) -> Option<usize> {
        (**self).num_samples()
    }

    fn digest(&self) -> Result<String, BeamError> {
        (**self).digest()
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        (**self).result(num)
    }
}

/// Rejects zero-sized blocks, which no stage can make progress with.
pub(crate) fn check_block_size(num: usize) -> Result<(), BeamError> {
    if num == 0 {
        Err(BeamError::ZeroBlockSize)
    } else {
        Ok(())
    }
}

/// Time signals held in memory.
#[derive(Debug, Clone)]
pub struct TimeSamples {
    data: Array2<f64>,
    sample_freq: f64,
}

impl TimeSamples {
    /// Wraps `(samples, channels)` data recorded at `sample_freq` Hz.
    pub fn new(data: Array2<f64>, sample_freq: f64) -> Self {
        Self { data, sample_freq }
    }

    /// The wrapped data.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

#[derive(Serialize)]
struct TimeSamplesParams<'a> {
    kind: &'static str,
    sample_freq: f64,
    shape: &'a [usize],
    data: String,
}

impl SamplesGenerator for TimeSamples {
    fn sample_freq(&self) -> f64 {
        self.sample_freq
    }

    fn num_channels(&self) -> usize {
        self.data.ncols()
    }

    fn num_samples(&self) -> Option<usize> {
        Some(self.data.nrows())
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&TimeSamplesParams {
            kind: "TimeSamples",
            sample_freq: self.sample_freq,
            shape: self.data.shape(),
            data: digest_samples(self.data.iter().copied()),
        })
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        let total = self.data.nrows();
        Ok(Box::new((0..total).step_by(num).map(move |start| {
            let stop = (start + num).min(total);
            Ok(self.data.slice(s![start..stop, ..]).to_owned())
        })))
    }
}

/// Time signals streamed from a WAV file. Integer samples are scaled to
/// the range `[-1, 1)`, float samples are passed through.
#[derive(Debug, Clone)]
pub struct WavSamples {
    path: PathBuf,
    channels: usize,
    sample_rate: u32,
    bits_per_sample: u16,
    sample_format: SampleFormat,
    frames: usize,
}

impl WavSamples {
    /// Opens the file once to read its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BeamError> {
        let reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: spec.sample_format,
            frames: reader.duration() as usize,
        })
    }
}

#[derive(Serialize)]
struct WavSamplesParams<'a> {
    kind: &'static str,
    path: &'a str,
    channels: usize,
    sample_rate: u32,
    bits_per_sample: u16,
    frames: usize,
}

impl SamplesGenerator for WavSamples {
    fn sample_freq(&self) -> f64 {
        self.sample_rate as f64
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn num_samples(&self) -> Option<usize> {
        Some(self.frames)
    }

    fn digest(&self) -> Result<String, BeamError> {
        let path = self.path.canonicalize()?;
        digest(&WavSamplesParams {
            kind: "WavSamples",
            path: &path.to_string_lossy(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            frames: self.frames,
        })
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        let reader = WavReader::open(&self.path)?;
        debug!(
            "WavSamples : streaming {} frames of {} channels from {}.",
            self.frames,
            self.channels,
            self.path.display()
        );

        let samples: Box<dyn Iterator<Item = Result<f64, hound::Error>>> =
            match self.sample_format {
                SampleFormat::Float => {
                    Box::new(reader.into_samples::<f32>().map(|s| s.map(f64::from)))
                }
                SampleFormat::Int => {
                    let scale = 1.0 / (1u64 << (self.bits_per_sample - 1)) as f64;
                    Box::new(
                        reader
                            .into_samples::<i32>()
                            .map(move |s| s.map(|v| v as f64 * scale)),
                    )
                }
            };

        Ok(Box::new(WavBlocks {
            samples,
            channels: self.channels,
            num,
            done: false,
        }))
    }
}

/// Groups the interleaved samples of a WAV file into blocks.
struct WavBlocks {
    samples: Box<dyn Iterator<Item = Result<f64, hound::Error>>>,
    channels: usize,
    num: usize,
    done: bool,
}

impl Iterator for WavBlocks {
    type Item = BlockResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut interleaved = Vec::with_capacity(self.num * self.channels);
        while interleaved.len() < self.num * self.channels {
            match self.samples.next() {
                Some(Ok(sample)) => interleaved.push(sample),
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error.into()));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        // a trailing partial frame is dropped
        let frames = interleaved.len() / self.channels;
        if frames == 0 {
            return None;
        }
        interleaved.truncate(frames * self.channels);

        Some(
            Array2::from_shape_vec((frames, self.channels), interleaved)
                .map_err(|e| BeamError::InvalidParameter(e.to_string())),
        )
    }
}
