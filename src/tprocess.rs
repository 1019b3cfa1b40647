//! Simple processing stages for time signals: channel and sample
//! selection in front of a beamformer, power and averaging behind it.

use crate::digest::digest;
use crate::error::BeamError;
use crate::sources::{check_block_size, Block, BlockResult, BlockStream, SamplesGenerator};

use log::debug;
use ndarray::{s, Array2, Axis};

/// Passes on the valid part of its source: the samples from `start` up to
/// (not including) `stop`, and all channels that are not marked invalid.
///
/// Invalid channel indices beyond the channel count of the source are
/// ignored.
#[derive(Debug, Clone)]
pub struct MaskedTimeInOut<S> {
    source: S,
    start: usize,
    stop: Option<usize>,
    invalid_channels: Vec<usize>,
}

impl<S: SamplesGenerator> MaskedTimeInOut<S> {
    /// Passes `source` through unchanged until a mask is set.
    pub fn new(source: S) -> Self {
        Self {
            source,
            start: 0,
            stop: None,
            invalid_channels: Vec::new(),
        }
    }

    /// Index of the first valid sample.
    pub fn with_start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    /// Index behind the last valid sample, `None` for the end of the source.
    pub fn with_stop(mut self, stop: Option<usize>) -> Self {
        self.stop = stop;
        self
    }

    /// Channels to leave out.
    pub fn with_invalid_channels(mut self, invalid_channels: Vec<usize>) -> Self {
        self.invalid_channels = invalid_channels;
        self
    }

    /// Indices of the source channels that are passed on, in order.
    pub fn channels(&self) -> Vec<usize> {
        (0..self.source.num_channels())
            .filter(|c| !self.invalid_channels.contains(c))
            .collect()
    }

    /// The end of the valid samples, if it is known.
    fn end(&self) -> Option<usize> {
        match (self.source.num_samples(), self.stop) {
            (Some(total), Some(stop)) => Some(total.min(stop)),
            (Some(total), None) => Some(total),
            (None, stop) => stop,
        }
    }
}

impl<S: SamplesGenerator> SamplesGenerator for MaskedTimeInOut<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.channels().len()
    }

    fn num_samples(&self) -> Option<usize> {
        // with an unknown source length even a stop does not bound the output
        self.source.num_samples()?;
        self.end().map(|end| end.saturating_sub(self.start))
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&(
            "MaskedTimeInOut",
            self.source.digest()?,
            self.start,
            self.stop,
            &self.invalid_channels,
        ))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        let channels = self.channels();
        if channels.is_empty() {
            return Err(BeamError::InvalidParameter(
                "all channels are marked invalid".to_string(),
            ));
        }
        if let Some(end) = self.end() {
            if self.start >= end {
                return Err(BeamError::InvalidParameter(format!(
                    "no samples available between {} and {}",
                    self.start, end
                )));
            }
        }
        debug!(
            "MaskedTimeInOut : samples {}..{:?}, {} of {} channels.",
            self.start,
            self.end(),
            channels.len(),
            self.source.num_channels()
        );

        Ok(Box::new(MaskedStream {
            source: self.source.result(num)?,
            total_channels: self.source.num_channels(),
            buf: Array2::zeros((num, channels.len())),
            channels,
            skip: self.start,
            remaining: self.stop.map(|stop| stop.saturating_sub(self.start)),
            pending: None,
            filled: 0,
            exhausted: false,
            done: false,
        }))
    }
}

/// Cuts the valid window out of a stream and regroups it into full blocks.
struct MaskedStream<'a> {
    source: BlockStream<'a>,
    total_channels: usize,
    channels: Vec<usize>,
    buf: Array2<f64>,
    /// Samples still to be skipped at the start.
    skip: usize,
    /// Samples still to be passed on, `None` for all of them.
    remaining: Option<usize>,
    /// Valid samples that did not fit into `buf` yet.
    pending: Option<Block>,
    filled: usize,
    exhausted: bool,
    done: bool,
}

impl MaskedStream<'_> {
    /// The valid rows and channels of a source block.
    fn valid_part(&mut self, block: &Block) -> Block {
        let rows = block.nrows();
        let skip = self.skip.min(rows);
        self.skip -= skip;
        let mut take = rows - skip;
        if let Some(remaining) = self.remaining.as_mut() {
            take = take.min(*remaining);
            *remaining -= take;
        }
        block
            .slice(s![skip..skip + take, ..])
            .select(Axis(1), &self.channels)
    }

    fn take_output(&mut self) -> Block {
        let block = self.buf.slice(s![..self.filled, ..]).to_owned();
        self.filled = 0;
        block
    }
}

impl Iterator for MaskedStream<'_> {
    type Item = BlockResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.filled == self.buf.nrows() {
                return Some(Ok(self.take_output()));
            }
            if let Some(pending) = self.pending.take() {
                let n = pending.nrows().min(self.buf.nrows() - self.filled);
                self.buf
                    .slice_mut(s![self.filled..self.filled + n, ..])
                    .assign(&pending.slice(s![..n, ..]));
                self.filled += n;
                if n < pending.nrows() {
                    self.pending = Some(pending.slice(s![n.., ..]).to_owned());
                }
                continue;
            }
            if self.exhausted || self.remaining == Some(0) {
                self.done = true;
                return (self.filled > 0).then(|| Ok(self.take_output()));
            }
            match self.source.next() {
                Some(Ok(block)) => {
                    if block.ncols() != self.total_channels {
                        self.done = true;
                        return Some(Err(BeamError::ChannelMismatch {
                            expected: self.total_channels,
                            found: block.ncols(),
                        }));
                    }
                    let valid = self.valid_part(&block);
                    if valid.nrows() > 0 {
                        self.pending = Some(valid);
                    }
                }
                Some(Err(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// Squares every sample of its source.
#[derive(Debug, Clone)]
pub struct TimePower<S> {
    source: S,
}

impl<S: SamplesGenerator> TimePower<S> {
    /// The power of `source`.
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: SamplesGenerator> SamplesGenerator for TimePower<S> {
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
        digest(&("TimePower", self.source.digest()?))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        Ok(Box::new(
            self.source
                .result(num)?
                .map(|block| block.map(|b| b.mapv(|v| v * v))),
        ))
    }
}

/// Default number of samples [TimeAverage] averages over.
pub const DEFAULT_NAVERAGE: usize = 64;

/// Averages over consecutive groups of `naverage` samples, which lowers the
/// sample rate by the same factor. Samples at the end of the source that do
/// not fill a whole group are dropped.
#[derive(Debug, Clone)]
pub struct TimeAverage<S> {
    source: S,
    naverage: usize,
}

impl<S: SamplesGenerator> TimeAverage<S> {
    /// Averages `source` over groups of [DEFAULT_NAVERAGE] samples.
    pub fn new(source: S) -> Self {
        Self {
            source,
            naverage: DEFAULT_NAVERAGE,
        }
    }

    /// Sets the number of samples to average over.
    pub fn with_naverage(mut self, naverage: usize) -> Self {
        self.naverage = naverage;
        self
    }
}

/// Means over consecutive groups of `nav` rows, dropping the incomplete
/// trailing group.
fn group_means(block: &Array2<f64>, nav: usize) -> Array2<f64> {
    let groups = block.nrows() / nav;
    let mut out = Array2::zeros((groups, block.ncols()));
    for (g, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
        let group = block.slice(s![g * nav..(g + 1) * nav, ..]);
        row.assign(&group.sum_axis(Axis(0)));
        row /= nav as f64;
    }
    out
}

impl<S: SamplesGenerator> SamplesGenerator for TimeAverage<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq() / self.naverage as f64
    }

    fn num_channels(&self) -> usize {
        self.source.num_channels()
    }

    fn num_samples(&self) -> Option<usize> {
        self.source
            .num_samples()
            .map(|n| n / self.naverage.max(1))
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&("TimeAverage", self.source.digest()?, self.naverage))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        if self.naverage == 0 {
            return Err(BeamError::InvalidParameter(
                "naverage must be at least one".to_string(),
            ));
        }
        let nav = self.naverage;
        let stream = self
            .source
            .result(num * nav)?
            .map(move |block| block.map(|b| group_means(&b, nav)))
            .filter(|block| block.as_ref().map_or(true, |b| b.nrows() > 0));
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TimeSamples;
    use ndarray::{array, concatenate};

    fn ramp(samples: usize, channels: usize) -> Array2<f64> {
        Array2::from_shape_fn((samples, channels), |(i, j)| (i * 10 + j) as f64)
    }

    fn collect(stream: BlockStream<'_>) -> Vec<Block> {
        stream.map(|b| b.unwrap()).collect()
    }

    #[test]
    fn masked_window_and_channels() {
        let masked = MaskedTimeInOut::new(TimeSamples::new(ramp(20, 4), 100.0))
            .with_start(3)
            .with_stop(Some(14))
            .with_invalid_channels(vec![1, 9]);
        assert_eq!(masked.channels(), vec![0, 2, 3]);
        assert_eq!(masked.num_channels(), 3);
        assert_eq!(masked.num_samples(), Some(11));

        let blocks = collect(masked.result(4).unwrap());
        let rows: Vec<usize> = blocks.iter().map(|b| b.nrows()).collect();
        assert_eq!(rows, vec![4, 4, 3]);
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        let all = concatenate(Axis(0), &views).unwrap();
        assert_eq!(all.row(0).to_vec(), vec![30.0, 32.0, 33.0]);
        assert_eq!(all.row(10).to_vec(), vec![130.0, 132.0, 133.0]);
    }

    #[test]
    fn stop_beyond_the_end_is_clipped() {
        let masked = MaskedTimeInOut::new(TimeSamples::new(ramp(10, 2), 100.0))
            .with_start(7)
            .with_stop(Some(50));
        assert_eq!(masked.num_samples(), Some(3));
        let blocks = collect(masked.result(8).unwrap());
        assert_eq!(blocks, vec![array![[70.0, 71.0], [80.0, 81.0], [90.0, 91.0]]]);
    }

    #[test]
    fn no_mask_passes_everything() {
        let data = ramp(9, 3);
        let masked = MaskedTimeInOut::new(TimeSamples::new(data.clone(), 100.0));
        let blocks = collect(masked.result(4).unwrap());
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        assert_eq!(concatenate(Axis(0), &views).unwrap(), data);
    }

    #[test]
    fn empty_masks_are_rejected() {
        let source = TimeSamples::new(ramp(10, 2), 100.0);
        let empty_window = MaskedTimeInOut::new(source.clone()).with_start(10);
        assert!(matches!(empty_window.result(4), Err(BeamError::InvalidParameter(_))));

        let reversed = MaskedTimeInOut::new(source.clone())
            .with_start(5)
            .with_stop(Some(2));
        assert!(reversed.result(4).is_err());

        let no_channels = MaskedTimeInOut::new(source).with_invalid_channels(vec![0, 1]);
        assert_eq!(no_channels.num_channels(), 0);
        assert!(no_channels.result(4).is_err());
    }

    #[test]
    fn masked_digest_follows_the_mask() {
        let source = TimeSamples::new(ramp(10, 2), 100.0);
        let a = MaskedTimeInOut::new(source.clone());
        let b = MaskedTimeInOut::new(source.clone()).with_invalid_channels(vec![1]);
        let c = MaskedTimeInOut::new(source).with_start(1);
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[test]
    fn power_squares_every_sample() {
        let ts = TimeSamples::new(array![[1.0, -2.0], [0.5, 3.0], [-1.5, 0.0]], 10.0);
        let power = TimePower::new(ts);
        let blocks: Vec<Block> = power.result(2).unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(blocks[0], array![[1.0, 4.0], [0.25, 9.0]]);
        assert_eq!(blocks[1], array![[2.25, 0.0]]);
    }

    #[test]
    fn average_lowers_the_sample_rate() {
        let data = Array2::from_shape_fn((21, 2), |(i, j)| (i + 10 * j) as f64);
        let avg = TimeAverage::new(TimeSamples::new(data, 100.0)).with_naverage(4);
        assert_eq!(avg.sample_freq(), 25.0);
        assert_eq!(avg.num_samples(), Some(5));

        let blocks: Vec<Block> = avg.result(2).unwrap().map(|b| b.unwrap()).collect();
        let rows: Vec<usize> = blocks.iter().map(|b| b.nrows()).collect();
        // 8 + 8 + 5 input samples, the last group of one is dropped
        assert_eq!(rows, vec![2, 2, 1]);
        assert_eq!(blocks[0], array![[1.5, 11.5], [5.5, 15.5]]);
        assert_eq!(blocks[2], array![[17.5, 27.5]]);
    }

    #[test]
    fn short_tails_yield_no_empty_block() {
        let data = Array2::ones((9, 1));
        let avg = TimeAverage::new(TimeSamples::new(data, 100.0)).with_naverage(4);
        let rows: Vec<usize> = avg.result(2).unwrap().map(|b| b.unwrap().nrows()).collect();
        assert_eq!(rows, vec![2]);
    }

    #[test]
    fn zero_naverage_is_rejected() {
        let avg = TimeAverage::new(TimeSamples::new(Array2::ones((9, 1)), 100.0)).with_naverage(0);
        assert!(avg.result(2).is_err());
    }
}
