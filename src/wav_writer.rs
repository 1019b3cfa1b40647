//! A wrapper for the hound library that writes selected channels of a
//! pipeline's output to a WAV file, and [stream_to_wav] to run a whole
//! pipeline into one.

use crate::component::{run_component, Component, ComponentError};
use crate::error::BeamError;
use crate::sources::{Block, SamplesGenerator};

use hound::{SampleFormat, WavSpec};
use log::{info, warn};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc::channel;

/// Writes blocks as 32-bit float WAV frames, one WAV channel per selected
/// block channel.
pub struct WavWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    channels: Vec<usize>,
}

impl WavWriter {
    /// Creates the file at `path`. `channels` selects, in order, the block
    /// channels to write; at least one is needed.
    pub fn create(
        path: impl AsRef<Path>,
        sample_rate: u32,
        channels: Vec<usize>,
    ) -> Result<Self, BeamError> {
        if channels.is_empty() || channels.len() > u16::MAX as usize {
            return Err(BeamError::InvalidParameter(format!(
                "cannot write {} channels to a wav file",
                channels.len()
            )));
        }
        let spec = WavSpec {
            channels: channels.len() as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(path, spec)?;

        Ok(Self {
            writer: Some(writer),
            channels,
        })
    }

    fn write(&mut self, block: &Block) -> Result<usize, ComponentError> {
        if let Some(&channel) = self.channels.iter().find(|&&c| c >= block.ncols()) {
            return Err(BeamError::InvalidParameter(format!(
                "channel {} selected, but blocks have {} channels",
                channel,
                block.ncols()
            ))
            .into());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(
                BeamError::InvalidParameter("writer is already finalized".to_string()).into(),
            );
        };

        for row in block.rows() {
            for &channel in &self.channels {
                writer.write_sample(row[channel] as f32)?;
            }
        }

        // flush after each write to save state of the WAV file in the header
        writer.flush()?;
        Ok(block.nrows())
    }
}

impl Component for WavWriter {
    type InData = Block;
    type OutData = Result<usize, ComponentError>;

    /// Appends the selected channels of a block, returns the number of
    /// frames written.
    fn convert(&mut self, input: Block) -> Result<usize, ComponentError> {
        self.write(&input)
    }

    /// Clean up WavWriter after writing all blocks from pipeline. This
    /// happens automatically when the WavWriter is dropped, but calling
    /// this gives us controlled error checking.
    fn finalize(&mut self) -> Result<(), ComponentError> {
        match self.writer.take() {
            Some(writer) => Ok(writer.finalize()?),
            None => Ok(()),
        }
    }
}

impl fmt::Display for WavWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WavWriter")
    }
}

/// Failure of a [stream_to_wav] run. Blocks that arrived before the
/// failure are in the file either way.
#[derive(Debug)]
pub enum StreamError {
    /// The pipeline failed, the writer finished cleanly.
    Source(BeamError),
    /// Writing failed, the pipeline ran to its end.
    Sink(ComponentError),
    /// Both of them failed.
    Both {
        /// What stopped the pipeline.
        source: BeamError,
        /// The first error of the writer.
        sink: ComponentError,
    },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamError::Source(error) => write!(f, "pipeline failed: {}", error),
            StreamError::Sink(error) => write!(f, "writing failed: {}", error),
            StreamError::Both { source, sink } => {
                write!(f, "pipeline failed: {}; writing failed: {}", source, sink)
            }
        }
    }
}

impl Error for StreamError {}

/// Streams `pipeline` in blocks of `block_size` samples into a new WAV file
/// at `path`, written by a [WavWriter] on its own thread. `channels`
/// selects the output channels to write. Returns the number of frames
/// written.
///
/// The writer is always joined. A pipeline failure ends the stream, but the
/// blocks before it are still written; writer errors do not stop the
/// pipeline.
pub fn stream_to_wav<S: SamplesGenerator + ?Sized>(
    pipeline: &S,
    block_size: usize,
    path: impl AsRef<Path>,
    channels: Vec<usize>,
) -> Result<usize, StreamError> {
    let blocks = pipeline.result(block_size).map_err(StreamError::Source)?;
    let sample_rate = pipeline.sample_freq().round() as u32;
    let writer = WavWriter::create(path, sample_rate, channels)
        .map_err(|e| StreamError::Sink(e.into()))?;

    let (block_tx, writer_rx) = channel::<Block>();
    let (result_tx, result_rx) = channel::<Result<usize, ComponentError>>();
    let writer_handle = run_component(Box::new(writer), writer_rx, result_tx);

    let mut failure = None;
    for block in blocks {
        match block {
            Ok(block) => {
                if block_tx.send(block).is_err() {
                    warn!("WavWriter is gone, stopping.");
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(block_tx);

    let mut frames = 0;
    let mut sink_error = None;
    for written in result_rx {
        match written {
            Ok(n) => frames += n,
            Err(e) => {
                warn!("WavWriter : {}", e);
                if sink_error.is_none() {
                    sink_error = Some(e);
                }
            }
        }
    }
    let finalized = writer_handle
        .join()
        .unwrap_or(Err(ComponentError::Panicked));
    if let (Err(e), None) = (finalized, &sink_error) {
        sink_error = Some(e);
    }
    info!("Streamed {} frames into the wav file.", frames);

    match (failure, sink_error) {
        (None, None) => Ok(frames),
        (Some(source), None) => Err(StreamError::Source(source)),
        (None, Some(sink)) => Err(StreamError::Sink(sink)),
        (Some(source), Some(sink)) => Err(StreamError::Both { source, sink }),
    }
}
