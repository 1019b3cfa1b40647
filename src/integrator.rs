//! Integration of grid signals over sectors.

use crate::digest::digest;
use crate::error::BeamError;
use crate::grids::{Grid, Sector};
use crate::sources::{check_block_size, BlockStream, SamplesGenerator};

use log::debug;
use ndarray::Array2;
use std::sync::Arc;

/// Default clip level, in dB relative to the block maximum.
pub const DEFAULT_CLIP: f64 = -350.0;

/// Sums the channels of a grid-shaped source (e.g. a beamformer) over
/// sectors of the grid, one output channel per sector.
///
/// Before summation all values of a block that are not above
/// `max(block) * 10^(clip / 10)` are set to zero, which keeps low-level
/// sidelobes out of the sector levels.
#[derive(Clone)]
pub struct IntegratorSectorTime<S> {
    source: S,
    grid: Arc<dyn Grid>,
    sectors: Vec<Sector>,
    clip: f64,
}

impl<S: SamplesGenerator> IntegratorSectorTime<S> {
    /// Integrates `source`, one channel per point of `grid`, over `sectors`.
    pub fn new(source: S, grid: Arc<dyn Grid>, sectors: Vec<Sector>) -> Self {
        Self {
            source,
            grid,
            sectors,
            clip: DEFAULT_CLIP,
        }
    }

    /// Sets the clip level, in dB relative to the block maximum.
    pub fn with_clip(mut self, clip: f64) -> Self {
        self.clip = clip;
        self
    }

    /// The sectors, in output channel order.
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }
}

impl<S: SamplesGenerator> SamplesGenerator for IntegratorSectorTime<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.sectors.len()
    }

    fn num_samples(&self) -> Option<usize> {
        self.source.num_samples()
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&(
            "IntegratorSectorTime",
            &self.sectors,
            self.clip,
            self.grid.digest()?,
            self.source.digest()?,
        ))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        if self.source.num_channels() != self.grid.size() {
            return Err(BeamError::ChannelMismatch {
                expected: self.grid.size(),
                found: self.source.num_channels(),
            });
        }
        let indices = self
            .sectors
            .iter()
            .map(|sector| self.grid.indices(sector))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "IntegratorSectorTime : {} sectors with {:?} points.",
            indices.len(),
            indices.iter().map(Vec::len).collect::<Vec<_>>()
        );

        let gain = 10f64.powf(self.clip / 10.0);
        let stream = self.source.result(num)?.map(move |block| {
            let block = block?;
            let max = block.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let floor = max * gain;
            let gated = block.mapv(|v| if v > floor { v } else { 0.0 });

            Ok(Array2::from_shape_fn(
                (gated.nrows(), indices.len()),
                |(t, k)| indices[k].iter().map(|&i| gated[[t, i]]).sum(),
            ))
        });
        Ok(Box::new(stream))
    }
}
