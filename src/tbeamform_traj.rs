//! Time domain beamformers for a grid that moves along a [Trajectory].
//!
//! The grid is moved once per output sample: translated to the current
//! trajectory location and, if a reference vector is set, rotated so that
//! its x-axis points along the current direction of motion. Output sample
//! `n` belongs to the sound emitted from the moved grid at `t = n / fs`.
//!
//! Because the delays change from sample to sample, the ring buffer keeps
//! a fixed history of `dmax` samples, enough for the largest delay span
//! the grid and array geometry allow.

use crate::delay_sum::{Delays, Summation};
use crate::digest::digest;
use crate::error::BeamError;
use crate::sources::{check_block_size, Block, BlockResult, BlockStream, SamplesGenerator};
use crate::steering::SteeringVector;
use crate::tbeamform::check_channels;
use crate::trajectory::{Derivative, Trajectory, TrajectorySampler};
use crate::weighting::SpatialWeighting;

use log::{debug, info};
use nalgebra::{Matrix3, Vector3};
use ndarray::{s, Array1, Array2};

/// Rotation that turns the x-axis into `direction` and keeps the y-axis
/// perpendicular to `rvec`.
pub fn rotation(direction: &Vector3<f64>, rvec: &Vector3<f64>) -> Matrix3<f64> {
    let dx = *direction;
    let dy = rvec.cross(&dx);
    let dz = dx.cross(&dy);
    Matrix3::from_columns(&[dx.normalize(), dy.normalize(), dz.normalize()])
}

/// Delay-and-sum beamformer for a grid moving along a trajectory.
#[derive(Debug, Clone)]
pub struct BeamformerTimeTraj<S> {
    source: S,
    steer: SteeringVector,
    weights: SpatialWeighting,
    trajectory: Trajectory,
    rvec: [f64; 3],
}

impl<S: SamplesGenerator> BeamformerTimeTraj<S> {
    /// Beamforms the signals of `source` onto the grid of `steer`, moved
    /// along `trajectory`. Trajectory time zero is the first sample.
    pub fn new(source: S, steer: SteeringVector, trajectory: Trajectory) -> Self {
        Self {
            source,
            steer,
            weights: SpatialWeighting::None,
            trajectory,
            rvec: [0.0; 3],
        }
    }

    /// Sets the spatial weighting of the microphone channels.
    pub fn with_weights(mut self, weights: SpatialWeighting) -> Self {
        self.weights = weights;
        self
    }

    /// Sets the reference vector, perpendicular to the y-axis of the moved
    /// grid. The zero vector (default) turns rotation off.
    pub fn with_rvec(mut self, rvec: [f64; 3]) -> Self {
        self.rvec = rvec;
        self
    }

    /// The trajectory.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    fn stream(
        &self,
        num: usize,
        mode: Summation,
        name: &'static str,
    ) -> Result<BlockStream<'_>, BeamError> {
        check_block_size(num)?;
        check_channels(&self.source, &self.steer)?;

        let fs = self.source.sample_freq();
        let metres_per_sample = self.steer.speed_of_sound() / fs;
        let diagonal = self.steer.grid().bbox_diagonal() + self.steer.mics().bbox_diagonal();
        let dmax = (diagonal / metres_per_sample) as usize + 2;
        let num_mics = self.steer.num_mics();
        let grid_size = self.steer.grid().size();
        debug!(
            "{} : history of {} samples, ring buffer of {} x {}.",
            name,
            dmax,
            dmax + num,
            num_mics
        );

        let rvec = Vector3::from(self.rvec);
        Ok(Box::new(MovingStream {
            name,
            source: self.source.result(num)?,
            steer: &self.steer,
            positions: self.steer.grid().positions(),
            locations: self.trajectory.traj(0.0, 1.0 / fs, Derivative::Location),
            velocities: self.trajectory.traj(0.0, 1.0 / fs, Derivative::Velocity),
            rotate: rvec != Vector3::zeros(),
            rvec,
            w: self.weights.weights(&self.steer),
            metres_per_sample,
            mode,
            buf: Array2::zeros((dmax + num, num_mics)),
            dmax,
            offset: (dmax + num) as isize,
            valid_end: dmax + num,
            out: Array2::zeros((num, grid_size)),
            filled: 0,
            produced: 0,
            done: false,
        }))
    }

    fn params_digest(&self, kind: &str, r_diag: Option<bool>) -> Result<String, BeamError> {
        digest(&(
            kind,
            self.steer.digest()?,
            self.source.digest()?,
            r_diag,
            self.weights,
            self.rvec,
            self.trajectory.digest()?,
        ))
    }
}

impl<S: SamplesGenerator> SamplesGenerator for BeamformerTimeTraj<S> {
    fn sample_freq(&self) -> f64 {
        self.source.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.steer.grid().size()
    }

    fn num_samples(&self) -> Option<usize> {
        None
    }

    fn digest(&self) -> Result<String, BeamError> {
        self.params_digest("BeamformerTimeTraj", None)
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        self.stream(num, Summation::Plain, "BeamformerTimeTraj")
    }
}

/// Moving-grid beamformer that yields the power of the delay-and-sum
/// signal, by default with the autopower of the single channels removed.
#[derive(Debug, Clone)]
pub struct BeamformerTimeSqTraj<S> {
    beamformer: BeamformerTimeTraj<S>,
    r_diag: bool,
}

impl<S: SamplesGenerator> BeamformerTimeSqTraj<S> {
    /// Squared moving-grid beamformer with autopower removal.
    pub fn new(source: S, steer: SteeringVector, trajectory: Trajectory) -> Self {
        Self {
            beamformer: BeamformerTimeTraj::new(source, steer, trajectory),
            r_diag: true,
        }
    }

    /// Sets the spatial weighting of the microphone channels.
    pub fn with_weights(mut self, weights: SpatialWeighting) -> Self {
        self.beamformer.weights = weights;
        self
    }

    /// Sets the reference vector of the grid rotation.
    pub fn with_rvec(mut self, rvec: [f64; 3]) -> Self {
        self.beamformer.rvec = rvec;
        self
    }

    /// Whether the autopower of the single channels is removed.
    pub fn with_r_diag(mut self, r_diag: bool) -> Self {
        self.r_diag = r_diag;
        self
    }
}

impl<S: SamplesGenerator> SamplesGenerator for BeamformerTimeSqTraj<S> {
    fn sample_freq(&self) -> f64 {
        self.beamformer.sample_freq()
    }

    fn num_channels(&self) -> usize {
        self.beamformer.num_channels()
    }

    fn num_samples(&self) -> Option<usize> {
        None
    }

    fn digest(&self) -> Result<String, BeamError> {
        self.beamformer
            .params_digest("BeamformerTimeSqTraj", Some(self.r_diag))
    }

    fn result(&self, num: usize) -> Result<BlockStream<'_>, BeamError> {
        self.beamformer
            .stream(num, Summation::squared(self.r_diag), "BeamformerTimeSqTraj")
    }
}

/// One run of a moving-grid beamformer.
///
/// The rows `[0, valid_end)` of the ring buffer hold input samples, the
/// current block starting at row `dmax`. The next output sample reads the
/// rows from `offset + min(delay)` on.
struct MovingStream<'a> {
    name: &'static str,
    source: BlockStream<'a>,
    steer: &'a SteeringVector,
    positions: Vec<Vector3<f64>>,
    locations: TrajectorySampler<'a>,
    velocities: TrajectorySampler<'a>,
    rotate: bool,
    rvec: Vector3<f64>,
    w: Array1<f64>,
    metres_per_sample: f64,
    mode: Summation,
    buf: Array2<f64>,
    dmax: usize,
    offset: isize,
    valid_end: usize,
    out: Array2<f64>,
    filled: usize,
    produced: usize,
    done: bool,
}

impl MovingStream<'_> {
    /// Grid positions for the next output sample, `None` once the
    /// trajectory is used up.
    fn moved_grid(&mut self) -> Option<Vec<Vector3<f64>>> {
        let loc = self.locations.next()?;
        if self.rotate {
            let rot = rotation(&self.velocities.next()?, &self.rvec);
            Some(self.positions.iter().map(|g| rot * g + loc).collect())
        } else {
            Some(self.positions.iter().map(|g| g + loc).collect())
        }
    }

    /// Moves the last `dmax` valid rows to the front and appends `block`.
    fn load(&mut self, block: &Block) -> Result<(), BeamError> {
        if block.ncols() != self.w.len() {
            return Err(BeamError::ChannelMismatch {
                expected: self.w.len(),
                found: block.ncols(),
            });
        }
        let (dmax, end) = (self.dmax, self.valid_end);
        let history = self.buf.slice(s![end - dmax..end, ..]).to_owned();
        self.buf.slice_mut(s![..dmax, ..]).assign(&history);
        self.offset -= (end - dmax) as isize;

        let rows = block.nrows();
        self.buf
            .slice_mut(s![dmax..dmax + rows, ..])
            .assign(&(block * &self.w));
        self.valid_end = dmax + rows;
        Ok(())
    }

    fn take_output(&mut self) -> Block {
        let block = self.out.slice(s![..self.filled, ..]).to_owned();
        self.produced += self.filled;
        self.filled = 0;
        block
    }

    fn finish(&mut self) -> Option<BlockResult> {
        self.done = true;
        let last = (self.filled > 0).then(|| Ok(self.take_output()));
        info!("{} : terminated after {} samples.", self.name, self.produced);
        last
    }

    fn fail(&mut self, error: BeamError) -> Option<BlockResult> {
        self.done = true;
        Some(Err(error))
    }
}

impl Iterator for MovingStream<'_> {
    type Item = BlockResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.filled == self.out.nrows() {
                return Some(Ok(self.take_output()));
            }
            let sample = self.produced + self.filled;

            let Some(tpos) = self.moved_grid() else {
                return self.finish();
            };
            let rm = self.steer.rm_at(&tpos);
            let r0 = self.steer.r0_at(&tpos);
            let delays = match Delays::new(&rm, &r0, &self.w, self.metres_per_sample, sample) {
                Ok(delays) => delays,
                Err(error) => return self.fail(error),
            };

            while self.offset + delays.max_index() as isize + 2 > self.valid_end as isize {
                match self.source.next() {
                    Some(Ok(block)) => {
                        if let Err(error) = self.load(&block) {
                            return self.fail(error);
                        }
                    }
                    Some(Err(error)) => return self.fail(error),
                    None => return self.finish(),
                }
            }

            let row0 = self.offset + delays.min_index() as isize;
            if row0 < 0 {
                return self.fail(BeamError::InsufficientHistory { sample });
            }
            delays.sum_into(&self.buf, row0 as usize, self.mode, self.out.row_mut(self.filled));
            self.offset += 1;
            self.filled += 1;
        }
    }
}
