//! timebeam computes acoustic source maps from multichannel microphone
//! recordings by delay-and-sum beamforming in the time domain.
//!
//! Every processing step is a [SamplesGenerator](sources::SamplesGenerator)
//! that owns the step before it, and a pipeline is pulled block by block
//! from its last step:
//!
//! - [sources] reads samples from memory or from WAV files.
//! - [tbeamform] steers a fixed grid of virtual sources, producing one
//!   output channel per grid point.
//! - [tbeamform_traj] does the same for a grid that moves (and optionally
//!   turns) along a [Trajectory](trajectory::Trajectory) during the
//!   recording.
//! - [integrator] sums grid channels over sectors of the grid.
//! - [tprocess] and [cache] square, average and cache signals.
//!
//! The `timebeam` binary assembles a pipeline from a [RunConfig](config::RunConfig)
//! and hands the output to a [WavWriter](wav_writer::WavWriter) running as a
//! [Component](component::Component) on its own thread.

#![warn(missing_docs)]
pub mod args;
pub mod cache;
pub mod component;
pub mod config;
mod delay_sum;
pub mod digest;
pub mod environment;
pub mod error;
pub mod grids;
pub mod integrator;
pub mod microphones;
mod sector_parser;
pub mod sources;
pub mod steering;
pub mod tbeamform;
pub mod tbeamform_traj;
pub mod tprocess;
pub mod trajectory;
pub mod wav_writer;
pub mod weighting;

#[cfg(test)]
mod tests {
    use crate::component::{run_component, ComponentError};
    use crate::grids::{Grid, RectGrid, Sector};
    use crate::integrator::IntegratorSectorTime;
    use crate::microphones::MicGeom;
    use crate::sources::{Block, SamplesGenerator, TimeSamples, WavSamples};
    use crate::steering::{Reference, SteeringVector};
    use crate::tbeamform::{BeamformerTime, BeamformerTimeSq};
    use crate::wav_writer::WavWriter;

    use approx::assert_relative_eq;
    use hound::{SampleFormat, WavReader, WavSpec};
    use nalgebra::Vector3;
    use ndarray::{concatenate, Array2, Axis};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::{mpsc::channel, Arc};

    const FS: f64 = 48000.0;
    const C: f64 = 343.0;

    fn collect(source: &impl SamplesGenerator, num: usize) -> Array2<f64> {
        let blocks: Vec<Block> = source.result(num).unwrap().map(|b| b.unwrap()).collect();
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        concatenate(Axis(0), &views).unwrap()
    }

    fn noise(samples: usize, channels: usize) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        Array2::from_shape_fn((samples, channels), |_| rng.gen_range(-1.0..1.0))
    }

    /// Eight microphones around a single grid point at the circle's center,
    /// all hit by the same impulse, give back that impulse.
    #[test]
    fn impulse_from_the_center_of_a_ring() {
        // just under one sample of travel time to every microphone
        let radius = 0.999 * C / FS;
        let mics = MicGeom::circle(8, radius, Vector3::zeros()).unwrap();
        let grid = RectGrid {
            x_min: 0.0,
            x_max: 0.0,
            y_min: 0.0,
            y_max: 0.0,
            z: 0.0,
            increment: 0.1,
        };
        let steer = SteeringVector::new(Arc::new(grid), mics)
            .unwrap()
            .with_reference(Reference::Distance(radius));

        let mut data = Array2::zeros((2000, 8));
        data.row_mut(1000).fill(1.0);
        let bf = BeamformerTime::new(TimeSamples::new(data, FS), steer);

        let out = collect(&bf, 256);
        assert_eq!(out.dim(), (1999, 1));
        assert_relative_eq!(out[[1000, 0]], 0.999, epsilon = 1e-9);
        assert_relative_eq!(out[[999, 0]], 0.001, epsilon = 1e-9);
        let elsewhere: f64 = out
            .column(0)
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 999 && *i != 1000)
            .map(|(_, v)| v.abs())
            .sum();
        assert_eq!(elsewhere, 0.0);
    }

    /// A sector that covers the whole grid adds up all beamformer channels.
    #[test]
    fn whole_grid_sector_sums_all_channels() {
        let grid: Arc<dyn Grid> = Arc::new(RectGrid {
            x_min: -0.3,
            x_max: 0.3,
            y_min: -0.3,
            y_max: 0.3,
            z: 0.8,
            increment: 0.1,
        });
        let mics = MicGeom::circle(6, 0.2, Vector3::zeros()).unwrap();
        let steer = SteeringVector::new(Arc::clone(&grid), mics).unwrap();
        let source = TimeSamples::new(noise(1500, 6), FS);

        let bf = BeamformerTimeSq::new(source, steer).with_r_diag(false);
        let per_point = collect(&bf, 200);

        let sectors = vec![Sector::Rect {
            x1: -0.3,
            y1: -0.3,
            x2: 0.3,
            y2: 0.3,
        }];
        let integrated = collect(&IntegratorSectorTime::new(bf, grid, sectors), 200);

        assert_eq!(integrated.dim(), (per_point.nrows(), 1));
        for (sum, row) in integrated.column(0).iter().zip(per_point.rows()) {
            assert_relative_eq!(*sum, row.sum(), max_relative = 1e-12);
        }
    }

    /// Reads a recording from disk, beamforms it and writes the result
    /// through a WavWriter thread, the way the binary does.
    #[test]
    fn wav_in_wav_out() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rec.wav");
        let output = dir.path().join("map.wav");

        let data = noise(1200, 4).mapv(|v| (v * 0.5) as f32 as f64);
        let spec = WavSpec {
            channels: 4,
            sample_rate: FS as u32,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for v in data.iter() {
            writer.write_sample(*v as f32).unwrap();
        }
        writer.finalize().unwrap();

        let grid = Arc::new(RectGrid {
            x_min: -0.2,
            x_max: 0.2,
            y_min: -0.2,
            y_max: 0.2,
            z: 0.5,
            increment: 0.2,
        });
        let mics = MicGeom::circle(4, 0.1, Vector3::zeros()).unwrap();
        let steer = SteeringVector::new(grid, mics).unwrap();

        let from_memory = collect(&BeamformerTime::new(TimeSamples::new(data, FS), steer.clone()), 128);
        let bf = BeamformerTime::new(WavSamples::open(&input).unwrap(), steer);

        let wav_writer = WavWriter::create(&output, FS as u32, vec![4, 0]).unwrap();
        let (block_tx, writer_rx) = channel::<Block>();
        let (result_tx, result_rx) = channel::<Result<usize, ComponentError>>();
        let handle = run_component(Box::new(wav_writer), writer_rx, result_tx);
        for block in bf.result(128).unwrap() {
            assert!(block_tx.send(block.unwrap()).is_ok());
        }
        drop(block_tx);
        let written: usize = result_rx.iter().map(|r| r.unwrap()).sum();
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(written, from_memory.nrows());

        let mut reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2 * from_memory.nrows());
        for (frame, expected) in samples.chunks_exact(2).zip(from_memory.rows()) {
            assert_relative_eq!(frame[0], expected[4] as f32, max_relative = 1e-5);
            assert_relative_eq!(frame[1], expected[0] as f32, max_relative = 1e-5);
        }
    }
}
