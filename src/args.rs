//! Commandline argument parser using clap for timebeam.

use crate::grids::Sector;

use clap::Parser;
use std::path::PathBuf;

/// Time domain delay-and-sum beamforming of a multichannel WAV recording.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct TimebeamArgs {
    /// Run configuration (grid, microphones, beamformer and stages), in RON
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Multichannel recording, one channel per microphone
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Filename for the beamformer output to be written to
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Samples per block, overrides the block size of the configuration
    #[arg(short = 'b', long = "block")]
    pub block: Option<usize>,

    /// Output channels to write, all of them if none are given
    #[arg(long = "channels")]
    #[clap(num_args = 1..)]
    pub channels: Vec<usize>,

    /// Additional sectors to integrate over, e.g. "circle(0,0,0.1)",
    /// "rect(-1,-1,0,0)", "poly(0,0,1,0,0,1)" or "box(0,0,0,1,1,1)"
    #[arg(short = 's', long = "sector")]
    #[clap(num_args = 1..)]
    pub sectors: Vec<Sector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_command_line() {
        let args = TimebeamArgs::try_parse_from([
            "timebeam",
            "--config",
            "run.ron",
            "-i",
            "rec.wav",
            "-o",
            "map.wav",
            "--block",
            "512",
            "--channels",
            "0",
            "2",
            "--sector",
            "circle(0,0,0.1)",
            "rect(-1,-1,0,0)",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("run.ron"));
        assert_eq!(args.block, Some(512));
        assert_eq!(args.channels, vec![0, 2]);
        assert_eq!(
            args.sectors[0],
            Sector::Circle {
                x: 0.0,
                y: 0.0,
                r: 0.1
            }
        );
        assert_eq!(args.sectors.len(), 2);
    }

    #[test]
    fn defaults_and_bad_sectors() {
        let args =
            TimebeamArgs::try_parse_from(["timebeam", "-c", "a.ron", "-i", "b.wav", "-o", "c.wav"])
                .unwrap();
        assert_eq!(args.block, None);
        assert!(args.channels.is_empty());
        assert!(args.sectors.is_empty());

        assert!(TimebeamArgs::try_parse_from([
            "timebeam", "-c", "a.ron", "-i", "b.wav", "-o", "c.wav", "-s", "circle(1)"
        ])
        .is_err());
    }
}
