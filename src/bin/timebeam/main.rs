//! Beamforms a multichannel WAV recording as described by a run
//! configuration and writes selected output channels to a WAV file.

use clap::Parser;
use timebeam::{
    args::TimebeamArgs,
    cache::CachingMode,
    config::RunConfig,
    sources::{SamplesGenerator, WavSamples},
    wav_writer::stream_to_wav,
};

use log::{error, info};
use std::{error::Error, process::ExitCode};

// Example:
// cargo run --bin timebeam --
//                          --config  run.ron
//                          --input   recording.wav
//                          --output  map.wav
//                          --block   1024
//                          --sector  "circle(0,0,0.1)" "rect(0.1,0.1,0.3,0.3)"

fn main() -> ExitCode {
    env_logger::init();
    let args = TimebeamArgs::parse();

    match run(args) {
        Ok(frames) => {
            info!("Wrote {} frames.", frames);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("timebeam: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: TimebeamArgs) -> Result<usize, Box<dyn Error>> {
    let mut config = RunConfig::from_path(&args.config)?;
    config.sectors.extend(args.sectors);
    let block_size = args.block.unwrap_or(config.block_size);

    let source = WavSamples::open(&args.input)?;
    info!(
        "Reading {} channels at {} Hz from {}.",
        source.num_channels(),
        source.sample_freq(),
        args.input.display()
    );
    // Only an in-memory cache exists, and one run never asks for the same
    // output twice.
    if config.caching != CachingMode::None {
        info!("Caching is {:?}, but output is not cached on the command line.", config.caching);
    }
    let pipeline = config.build(source, None)?;

    let channels = if args.channels.is_empty() {
        (0..pipeline.num_channels()).collect()
    } else {
        args.channels
    };
    Ok(stream_to_wav(pipeline.as_ref(), block_size, &args.output, channels)?)
}
