//! The error type shared by every stage of a timebeam pipeline.
//!
//! Configuration problems are reported before a stream produces anything,
//! domain problems (degenerate geometry) are reported on the first sample
//! they affect, after which the stream ends.

use std::{borrow::Cow, error::Error, fmt};

/// Everything that can go wrong while setting up or running a pipeline.
#[derive(Debug)]
pub enum BeamError {
    /// A stage was asked for blocks of zero samples.
    ZeroBlockSize,

    /// The upstream source does not deliver one channel per microphone.
    ChannelMismatch {
        /// Number of channels the stage needs.
        expected: usize,
        /// Number of channels the source actually delivers.
        found: usize,
    },

    /// A microphone array without any microphones.
    NoMicrophones,

    /// A grid without any points.
    EmptyGrid,

    /// A coordinate lies outside of the grid it was looked up in.
    OutOfRange {
        /// Name of the axis, `"x"`, `"y"` or `"z"`.
        axis: &'static str,
        /// The offending coordinate.
        value: f64,
        /// Lower grid limit on that axis.
        min: f64,
        /// Upper grid limit on that axis.
        max: f64,
    },

    /// A sector that the grid cannot resolve into indices.
    InvalidSector(String),

    /// Any other malformed parameter, with a description.
    InvalidParameter(String),

    /// A distance between a grid point and a microphone (or the reference
    /// point) is zero, negative or not finite.
    NonPositiveDistance {
        /// Output sample at which the geometry broke down.
        sample: usize,
        /// The offending distance.
        distance: f64,
    },

    /// The ring buffer does not hold the history the current delays need.
    InsufficientHistory {
        /// Output sample at which it happened.
        sample: usize,
    },

    /// Somebody panicked while holding the lock on a shared cache.
    PoisonedCache,

    /// Returned when io fails when reading or writing files.
    IoError(std::io::Error),

    /// Returned when reading or writing a WAV file fails.
    HoundError(hound::Error),

    /// Returned when serialization of parameters fails.
    RonError(ron::Error),

    /// Returned when deserialization of a configuration fails.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when a sector given on the command line cannot be parsed.
    ParseError(String),
}

impl fmt::Display for BeamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BeamError as BE;
        let msg = match self {
            BE::ZeroBlockSize => Cow::from("block size must be at least one sample"),
            BE::ChannelMismatch { expected, found } => Cow::from(format!(
                "source delivers {found} channels, but {expected} are needed"
            )),
            BE::NoMicrophones => Cow::from("microphone array is empty"),
            BE::EmptyGrid => Cow::from("grid has no points"),
            BE::OutOfRange {
                axis,
                value,
                min,
                max,
            } => Cow::from(format!(
                "{axis}-value out of range {value} ({min}, {max})"
            )),
            BE::InvalidSector(why) => Cow::from(format!("invalid sector: {why}")),
            BE::InvalidParameter(why) => Cow::from(format!("invalid parameter: {why}")),
            BE::NonPositiveDistance { sample, distance } => Cow::from(format!(
                "degenerate geometry at output sample {sample}: distance {distance}"
            )),
            BE::InsufficientHistory { sample } => Cow::from(format!(
                "delay span exceeds buffered history at output sample {sample}"
            )),
            BE::PoisonedCache => Cow::from("cache lock is poisoned"),
            BE::IoError(error) => Cow::from(format!("io error: {}", error)),
            BE::HoundError(error) => Cow::from(format!("wav error: {}", error)),
            BE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            BE::RonSpannedError(error) => Cow::from(format!("ron spanning error: {}", error)),
            BE::ParseError(input) => Cow::from(format!("cannot parse sector: {input}")),
        };

        write!(f, "{}", msg)
    }
}

impl Error for BeamError {}

impl From<std::io::Error> for BeamError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<hound::Error> for BeamError {
    fn from(value: hound::Error) -> Self {
        Self::HoundError(value)
    }
}

impl From<ron::Error> for BeamError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for BeamError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}
