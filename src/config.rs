//! Run configuration of the `timebeam` tool.
//!
//! A [RunConfig] is read from a [ron] file and describes everything about a
//! beamforming run except where the samples come from: the focus grid, the
//! microphone array, the beamformer variant and the stages behind it. All
//! fields are optional in the file and fall back to their defaults, e.g.
//!
//! ```text
//! (
//!     grid: Rect((x_min: -0.5, x_max: 0.5, y_min: -0.5, y_max: 0.5, z: 1.0, increment: 0.05)),
//!     mics: [(0.1, 0.0, 0.0), (0.0, 0.1, 0.0), (-0.1, 0.0, 0.0), (0.0, -0.1, 0.0)],
//!     weighting: power,
//!     squared: true,
//!     sectors: [Circle(x: 0.0, y: 0.0, r: 0.1)],
//! )
//! ```

use crate::cache::{BlockCache, CachingMode, TimeCache};
use crate::environment::FreeField;
use crate::error::BeamError;
use crate::grids::{Grid, RectGrid, RectGrid3D, Sector};
use crate::integrator::{IntegratorSectorTime, DEFAULT_CLIP};
use crate::microphones::MicGeom;
use crate::sources::SamplesGenerator;
use crate::steering::{Reference, SteeringVector};
use crate::tbeamform::{BeamformerTime, BeamformerTimeSq};
use crate::tbeamform_traj::{BeamformerTimeSqTraj, BeamformerTimeTraj};
use crate::tprocess::{MaskedTimeInOut, TimeAverage, TimePower};
use crate::trajectory::Trajectory;
use crate::weighting::SpatialWeighting;

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Number of samples per block when nothing else is configured.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// The focus grid of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridConfig {
    /// A plane of points at fixed z.
    Rect(RectGrid),
    /// A box of points.
    Rect3D(RectGrid3D),
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig::Rect(RectGrid::default())
    }
}

impl GridConfig {
    /// The configured grid, ready to be shared between stages.
    pub fn build(&self) -> Arc<dyn Grid> {
        match self {
            GridConfig::Rect(grid) => Arc::new(grid.clone()),
            GridConfig::Rect3D(grid) => Arc::new(grid.clone()),
        }
    }
}

/// Movement of the grid during the recording.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Way-points `(time, (x, y, z))`, time in seconds from the first sample.
    pub points: Vec<(f64, [f64; 3])>,
    /// Reference vector for rotating the grid with the direction of
    /// movement. All zero keeps the grid orientation fixed.
    pub rvec: [f64; 3],
}

/// Everything about a run except the input and output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// The focus grid.
    pub grid: GridConfig,
    /// Microphone positions in channel order.
    pub mics: Vec<[f64; 3]>,
    /// Channels (indices into `mics`) of faulty microphones. They are
    /// dropped from the recording and from the array.
    pub invalid_channels: Vec<usize>,
    /// First sample of the recording to use.
    pub start: usize,
    /// Sample behind the last one to use, the end of the recording if not
    /// given.
    pub stop: Option<usize>,
    /// Speed of sound, in m/s.
    pub speed_of_sound: f64,
    /// What the reference distance of a grid point is measured against.
    pub reference: Reference,
    /// Weighting of the microphone channels.
    pub weighting: SpatialWeighting,
    /// Whether the beamformer outputs power instead of pressure.
    pub squared: bool,
    /// Whether the squared beamformer removes the auto-power of the
    /// microphones.
    pub r_diag: bool,
    /// Grid movement, if the grid moves.
    pub trajectory: Option<TrajectoryConfig>,
    /// Sectors to integrate the beamformer output over. Without sectors the
    /// output has one channel per grid point.
    pub sectors: Vec<Sector>,
    /// Clip level for the sector integration, in dB.
    pub clip: f64,
    /// Samples per block.
    pub block_size: usize,
    /// Whether to square the output.
    pub power: bool,
    /// Number of samples to average the output over, if any.
    pub naverage: Option<usize>,
    /// When the beamformer output is read from and written to the cache.
    pub caching: CachingMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            mics: Vec::new(),
            invalid_channels: Vec::new(),
            start: 0,
            stop: None,
            speed_of_sound: 343.0,
            reference: Reference::default(),
            weighting: SpatialWeighting::default(),
            squared: false,
            r_diag: true,
            trajectory: None,
            sectors: Vec::new(),
            clip: DEFAULT_CLIP,
            block_size: DEFAULT_BLOCK_SIZE,
            power: false,
            naverage: None,
            caching: CachingMode::default(),
        }
    }
}

impl FromStr for RunConfig {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ron::from_str(s)?)
    }
}

impl RunConfig {
    /// Reads a configuration from a RON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BeamError> {
        fs::read_to_string(path)?.parse()
    }

    /// The configuration as pretty-printed RON.
    pub fn to_ron(&self) -> Result<String, BeamError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// The steering vector of the configured grid and the valid part of
    /// the array.
    pub fn steering(&self) -> Result<SteeringVector, BeamError> {
        let mics =
            MicGeom::from_coordinates(&self.mics)?.without_channels(&self.invalid_channels)?;
        let env = FreeField::new(self.speed_of_sound)?;
        Ok(SteeringVector::new(self.grid.build(), mics)?
            .with_environment(Arc::new(env))
            .with_reference(self.reference))
    }

    /// The configured trajectory, if the grid moves.
    pub fn trajectory(&self) -> Result<Option<Trajectory>, BeamError> {
        self.trajectory
            .as_ref()
            .map(|t| Trajectory::new(t.points.clone()))
            .transpose()
    }

    /// Whether part of the recording is masked out.
    fn masks(&self) -> bool {
        self.start != 0 || self.stop.is_some() || !self.invalid_channels.is_empty()
    }

    /// Assembles the configured pipeline behind `source`. With a `cache`,
    /// the beamformer output goes through a [TimeCache] unless caching is
    /// switched off in the configuration. Without one nothing is cached.
    pub fn build<'a, S>(
        &self,
        source: S,
        cache: Option<Arc<dyn BlockCache>>,
    ) -> Result<Box<dyn SamplesGenerator + 'a>, BeamError>
    where
        S: SamplesGenerator + 'a,
    {
        let steer = self.steering()?;
        let grid = Arc::clone(steer.grid());
        let rvec = self.trajectory.as_ref().map_or([0.0; 3], |t| t.rvec);

        let mut stages = Vec::new();
        let source: Box<dyn SamplesGenerator + 'a> = if self.masks() {
            stages.push("mask");
            Box::new(
                MaskedTimeInOut::new(source)
                    .with_start(self.start)
                    .with_stop(self.stop)
                    .with_invalid_channels(self.invalid_channels.clone()),
            )
        } else {
            Box::new(source)
        };

        let mut stage: Box<dyn SamplesGenerator + 'a> = match (self.trajectory()?, self.squared) {
            (None, false) => Box::new(BeamformerTime::new(source, steer).with_weights(self.weighting)),
            (None, true) => Box::new(
                BeamformerTimeSq::new(source, steer)
                    .with_weights(self.weighting)
                    .with_r_diag(self.r_diag),
            ),
            (Some(trajectory), false) => Box::new(
                BeamformerTimeTraj::new(source, steer, trajectory)
                    .with_weights(self.weighting)
                    .with_rvec(rvec),
            ),
            (Some(trajectory), true) => Box::new(
                BeamformerTimeSqTraj::new(source, steer, trajectory)
                    .with_weights(self.weighting)
                    .with_rvec(rvec)
                    .with_r_diag(self.r_diag),
            ),
        };
        stages.push(if self.squared { "squared beamformer" } else { "beamformer" });

        match cache {
            Some(cache) if self.caching != CachingMode::None => {
                stage = Box::new(TimeCache::new(stage, cache).with_mode(self.caching));
                stages.push("cache");
            }
            _ => {}
        }
        if !self.sectors.is_empty() {
            stage = Box::new(
                IntegratorSectorTime::new(stage, grid, self.sectors.clone()).with_clip(self.clip),
            );
            stages.push("sectors");
        }
        if self.power {
            stage = Box::new(TimePower::new(stage));
            stages.push("power");
        }
        if let Some(naverage) = self.naverage {
            stage = Box::new(TimeAverage::new(stage).with_naverage(naverage));
            stages.push("average");
        }

        info!(
            "Pipeline : {} with {} output channels.",
            stages.join(" -> "),
            stage.num_channels()
        );
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::sources::TimeSamples;
    use ndarray::{concatenate, s, Array2, Axis};
    use std::io::Write;

    const CONFIG: &str = r#"(
        grid: Rect((x_min: -0.2, x_max: 0.2, y_min: -0.2, y_max: 0.2, z: 1.0, increment: 0.1)),
        mics: [(0.1, 0.0, 0.0), (0.0, 0.1, 0.0), (-0.1, 0.0, 0.0), (0.0, -0.1, 0.0)],
        weighting: power,
        squared: true,
        sectors: [Circle(x: 0.0, y: 0.0, r: 0.05), Rect(x1: -0.2, y1: -0.2, x2: 0.0, y2: 0.0)],
        block_size: 64,
        caching: none,
    )"#;

    fn noise(channels: usize) -> TimeSamples {
        let data = Array2::from_shape_fn((400, channels), |(i, j)| ((i * 7 + j * 3) % 11) as f64 - 5.0);
        TimeSamples::new(data, 20000.0)
    }

    fn memory(cache: &MemoryCache) -> Option<Arc<dyn BlockCache>> {
        Some(Arc::new(cache.clone()))
    }

    fn collect(pipeline: &dyn SamplesGenerator, num: usize) -> Array2<f64> {
        let blocks: Vec<_> = pipeline.result(num).unwrap().map(|b| b.unwrap()).collect();
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        concatenate(Axis(0), &views).unwrap()
    }

    #[test]
    fn parse_partial_config() {
        let config: RunConfig = CONFIG.parse().unwrap();
        assert_eq!(config.mics.len(), 4);
        assert_eq!(config.weighting, SpatialWeighting::Power);
        assert_eq!(config.caching, CachingMode::None);
        assert_eq!(config.sectors.len(), 2);
        assert_eq!(config.block_size, 64);
        // not in the file
        assert!(config.r_diag);
        assert_eq!(config.speed_of_sound, 343.0);
        assert_eq!(config.clip, DEFAULT_CLIP);
        assert!(config.trajectory.is_none());
    }

    #[test]
    fn demo_config_is_valid() {
        let config: RunConfig = include_str!("../demos/beamform.ron").parse().unwrap();
        let steer = config.steering().unwrap();
        assert_eq!(steer.num_mics(), 16);
        assert_eq!(steer.grid().size(), 21 * 21);
        assert_eq!(config.naverage, Some(64));
        assert_eq!(config.caching, CachingMode::None);
    }

    #[test]
    fn pretty_output_reads_back() {
        let config: RunConfig = CONFIG.parse().unwrap();
        let again: RunConfig = config.to_ron().unwrap().parse().unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(config.mics.len(), 4);

        assert!(matches!(
            RunConfig::from_path("/nonexistent/run.ron"),
            Err(BeamError::IoError(_))
        ));
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(matches!(
            "(mics: [(0.1, 0.0)], squared: maybe)".parse::<RunConfig>(),
            Err(BeamError::RonSpannedError(_))
        ));
    }

    #[test]
    fn build_with_sectors() {
        let config: RunConfig = CONFIG.parse().unwrap();
        let pipeline = config.build(noise(4), memory(&MemoryCache::new())).unwrap();
        assert_eq!(pipeline.num_channels(), 2);

        let rows: usize = pipeline
            .result(config.block_size)
            .unwrap()
            .map(|b| b.unwrap().nrows())
            .sum();
        assert_eq!(Some(rows), pipeline.num_samples());
    }

    #[test]
    fn build_plain_averaged() {
        let config = RunConfig {
            mics: vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]],
            naverage: Some(8),
            power: true,
            ..RunConfig::default()
        };
        let cache = MemoryCache::new();
        let pipeline = config.build(noise(2), memory(&cache)).unwrap();
        assert_eq!(pipeline.num_channels(), 21 * 21);
        assert_eq!(pipeline.sample_freq(), 2500.0);

        assert!(pipeline.result(100).unwrap().all(|b| b.is_ok()));
        // the beamformer output was stored
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn build_moving() {
        let config = RunConfig {
            mics: vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]],
            trajectory: Some(TrajectoryConfig {
                points: vec![(0.0, [0.0, 0.0, 0.0]), (0.1, [0.1, 0.0, 0.0])],
                rvec: [0.0; 3],
            }),
            caching: CachingMode::None,
            ..RunConfig::default()
        };
        let pipeline = config.build(noise(2), None).unwrap();
        assert_eq!(pipeline.num_samples(), None);
        assert!(pipeline.result(64).unwrap().all(|b| b.is_ok()));
    }

    #[test]
    fn build_without_mics_fails() {
        let config = RunConfig::default();
        assert!(matches!(
            config.build(noise(2), None),
            Err(BeamError::NoMicrophones)
        ));

        let config = RunConfig {
            mics: vec![[0.1, 0.0, 0.0]],
            trajectory: Some(TrajectoryConfig::default()),
            ..RunConfig::default()
        };
        assert!(matches!(
            config.build(noise(1), None),
            Err(BeamError::InvalidParameter(_))
        ));
    }

    #[test]
    fn no_cache_means_no_cache_stage() {
        let config = RunConfig {
            mics: vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]],
            ..RunConfig::default()
        };
        assert_eq!(config.caching, CachingMode::Individual);
        let uncached = config.build(noise(2), None).unwrap();

        let cache = MemoryCache::new();
        let cached = config.build(noise(2), memory(&cache)).unwrap();
        let switched_off = RunConfig {
            caching: CachingMode::None,
            ..config.clone()
        }
        .build(noise(2), memory(&cache))
        .unwrap();

        assert_eq!(uncached.digest().unwrap(), switched_off.digest().unwrap());
        assert_ne!(uncached.digest().unwrap(), cached.digest().unwrap());

        assert!(switched_off.result(128).unwrap().all(|b| b.is_ok()));
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn invalid_channels_are_masked_in_recording_and_array() {
        let mics = vec![
            [0.1, 0.0, 0.0],
            [0.0, 0.1, 0.0],
            [-0.1, 0.0, 0.0],
            [0.0, -0.1, 0.0],
        ];
        let masked = RunConfig {
            mics: mics.clone(),
            invalid_channels: vec![1],
            start: 50,
            stop: Some(350),
            caching: CachingMode::None,
            ..RunConfig::default()
        };
        let pipeline = masked.build(noise(4), None).unwrap();

        // the same run on a recording that never had the faulty channel
        let full = noise(4);
        let valid = full.data().slice(s![50..350, ..]).select(Axis(1), &[0, 2, 3]);
        let reduced = RunConfig {
            mics: vec![mics[0], mics[2], mics[3]],
            caching: CachingMode::None,
            ..RunConfig::default()
        };
        let expected = reduced.build(TimeSamples::new(valid, 20000.0), None).unwrap();

        let out = collect(pipeline.as_ref(), 64);
        let reference = collect(expected.as_ref(), 64);
        assert_eq!(out.dim(), reference.dim());
        assert!((&out - &reference).iter().all(|d| d.abs() < 1e-12));
        assert_eq!(Some(out.nrows()), pipeline.num_samples());

        let out_of_range = RunConfig {
            invalid_channels: vec![4],
            ..masked
        };
        assert!(matches!(
            out_of_range.build(noise(4), None),
            Err(BeamError::InvalidParameter(_))
        ));
    }
}
