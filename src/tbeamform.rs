//! Time domain beamformers for a grid that stays in place.
//!
//! [BeamformerTime] yields the delay-and-sum signal of every grid point,
//! [BeamformerTimeSq] its square, optionally without the autopower of the
//! single channels. Both read the microphone signals through a ring buffer
//! that holds one block plus the delay span, so the output does not depend
//! on the block size the stream is requested with.
//!
//! Output sample `n` of a grid point combines the input samples around
//! `n + delay`, so the output starts with the sound that was emitted at
//! the start of the recording and is `max(delay) + 1` samples shorter
//! than the input.

use crate::delay_sum::{Delays, Summation};
use crate::digest::digest;
use crate::error::BeamError;
use crate::sources::{check_block_size, Block, BlockResult, BlockStream, SamplesGenerator};
use crate::steering::SteeringVector;
use crate::weighting::SpatialWeighting;

use log::{debug, info};
use ndarray::{s, Array1, Array2};

/// Checks that `source` delivers one channel per microphone.
pub(crate) fn check_channels<S: SamplesGenerator + ?Sized>(
    source: &S,
    steer: &SteeringVector,
) -> Result<(), BeamError> {
    if source.num_channels() != steer.num_mics() {
        return Err(BeamError::ChannelMismatch {
            expected: steer.num_mics(),
            found: source.num_channels(),
        });
    }
    Ok(())
}

/// Delay-and-sum beamformer for a spatially fixed grid.
#[derive(Debug, Clone)]
pub struct BeamformerTime<S> {
    source: S,
    steer: SteeringVector,
    weights: SpatialWeighting,
}

impl<S: SamplesGenerator> BeamformerTime<S> {
    /// Beamforms the signals of `source`, one channel per microphone of
    /// `steer`, onto the grid of `steer`.
    pub fn new(source: S, steer: SteeringVector) -> Self {
        Self {
            source,
            steer,
            weights: SpatialWeighting::None,
        }
    }

    /// Sets the spatial weighting of the microphone channels.
    pub fn with_weights(mut self, weights: SpatialWeighting) -> Self {
        self.weights = weights;
        self
    }

    /// The steering vector.
    pub fn steer(&self) -> &SteeringVector {
        &self.steer
    }

    /// The upstream source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn delays(&self) -> Result<(Delays, Array1<f64>), BeamError> {
        let w = self.weights.weights(&self.steer);
        let metres_per_sample = self.steer.speed_of_sound() / self.source.sample_freq();
        let delays = Delays::new(&self.steer.rm(), &self.steer.r0(), &w, metres_per_sample, 0)?;
        Ok((delays, w))
    }

    fn stream(
        &self,
        num: usize,
        mode: Summation,
        name: &'static str,
    ) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        check_channels(&self.source, &self.steer)?;
        let (delays, w) = self.delays()?;
        let source = self.source.result(num)?;
        Ok(Box::new(StaticStream::new(name, source, delays, w, num, mode)))
    }

    fn output_samples(&self) -> Option<usize> {
        let total = self.source.num_samples()?;
        let (delays, _) = self.delays().ok()?;
        Some(total.saturating_sub(delays.max_index() + 1))
    }
}

impl<S: SamplesGenerator> SamplesGenerator for BeamformerTime<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.steer.grid().size()
    }

    fn num_samples(&self) -> Option<usize> {
        self.output_samples()
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&(
            "BeamformerTime",
            self.steer.digest()?,
            self.source.digest()?,
            self.weights,
        ))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        self.stream(num, Summation::Plain, "BeamformerTime")
    }
}

/// Beamformer for a spatially fixed grid that yields the power of the
/// delay-and-sum signal, by default with the autopower of the single
/// channels removed.
#[derive(Debug, Clone)]
pub struct BeamformerTimeSq<S> {
    beamformer: BeamformerTime<S>,
    r_diag: bool,
}

impl<S: SamplesGenerator> BeamformerTimeSq<S> {
    /// Squared beamformer with autopower removal.
    pub fn new(source: S, steer: SteeringVector) -> Self {
        Self {
            beamformer: BeamformerTime::new(source, steer),
            r_diag: true,
        }
    }

    /// Sets the spatial weighting of the microphone channels.
    pub fn with_weights(mut self, weights: SpatialWeighting) -> Self {
        self.beamformer.weights = weights;
        self
    }

    /// Whether the autopower of the single channels is removed.
    pub fn with_r_diag(mut self, r_diag: bool) -> Self {
        self.r_diag = r_diag;
        self
    }

    /// The steering vector.
    pub fn steer(&self) -> &SteeringVector {
        &self.beamformer.steer
    }
}

impl<S: SamplesGenerator> SamplesGenerator for BeamformerTimeSq<S> {
    fn sample_freq(&self) -> f64 {
        self.beamformer.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.beamformer.num_channels()
    }

    fn num_samples(&self) -> Option<usize> {
        self.beamformer.output_samples()
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&(
            "BeamformerTimeSq",
            self.beamformer.steer.digest()?,
            self.beamformer.source.digest()?,
            self.r_diag,
            self.beamformer.weights,
        ))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        self.beamformer
            .stream(num, Summation::squared(self.r_diag), "BeamformerTimeSq")
    }
}

/// One run of a fixed-grid beamformer.
///
/// Row `span + k` of the ring buffer holds sample `k` of the current
/// block, the `span` rows in front of it the end of the previous block.
/// The next output sample reads the rows from `pos` on.
struct StaticStream<'a> {
    name: &'static str,
    source: BlockStream<'a>,
    delays: Delays,
    w: Array1<f64>,
    mode: Summation,
    buf: Array2<f64>,
    span: usize,
    pos: usize,
    /// Number of samples in the current block.
    loaded: usize,
    out: Array2<f64>,
    filled: usize,
    produced: usize,
    done: bool,
}

impl<'a> StaticStream<'a> {
    fn new(
        name: &'static str,
        source: BlockStream<'a>,
        delays: Delays,
        w: Array1<f64>,
        num: usize,
        mode: Summation,
    ) -> Self {
        let span = delays.max_index() + 1 - delays.min_index();
        let (grid_size, num_mics) = (delays.grid_size(), w.len());
        debug!(
            "{} : delays from {} to {} samples, ring buffer of {} x {}.",
            name,
            delays.min_index(),
            delays.max_index(),
            span + num,
            num_mics
        );

        Self {
            name,
            source,
            pos: delays.max_index() + 1,
            delays,
            w,
            mode,
            buf: Array2::zeros((span + num, num_mics)),
            span,
            loaded: 0,
            out: Array2::zeros((num, grid_size)),
            filled: 0,
            produced: 0,
            done: false,
        }
    }

    /// Moves the delay span at the end of the current block to the front
    /// and appends `block` behind it.
    fn load(&mut self, block: &Block) -> Result<(), BeamError> {
        if block.ncols() != self.w.len() {
            return Err(BeamError::ChannelMismatch {
                expected: self.w.len(),
                found: block.ncols(),
            });
        }
        let (span, ns) = (self.span, self.loaded);
        let tail = self.buf.slice(s![ns..ns + span, ..]).to_owned();
        self.buf.slice_mut(s![..span, ..]).assign(&tail);
        self.pos -= ns;

        let rows = block.nrows();
        self.buf
            .slice_mut(s![span..span + rows, ..])
            .assign(&(block * &self.w));
        self.loaded = rows;
        Ok(())
    }

    fn take_output(&mut self) -> Block {
        let block = self.out.slice(s![..self.filled, ..]).to_owned();
        self.produced += self.filled;
        self.filled = 0;
        block
    }
}

impl Iterator for StaticStream<'_> {
    type Item = BlockResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.filled == self.out.nrows() {
                return Some(Ok(self.take_output()));
            }
            if self.pos < self.loaded {
                self.delays
                    .sum_into(&self.buf, self.pos, self.mode, self.out.row_mut(self.filled));
                self.pos += 1;
                self.filled += 1;
                continue;
            }
            match self.source.next() {
                Some(Ok(block)) => {
                    if let Err(error) = self.load(&block) {
                        self.done = true;
                        return Some(Err(error));
                    }
                }
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
                None => {
                    self.done = true;
                    let last = (self.filled > 0).then(|| Ok(self.take_output()));
                    info!("{} : terminated after {} samples.", self.name, self.produced);
                    return last;
                }
            }
        }
    }
}
