//! Sound propagation models. The beamformers only need two things from an
//! environment: the speed of sound and the travel distance between two
//! points.

use crate::digest::digest;
use crate::error::BeamError;

use nalgebra::Vector3;
use ndarray::{Array1, Array2};

/// Speed of sound in air at about 20 degrees Celsius, in m/s.
pub const DEFAULT_SPEED_OF_SOUND: f64 = 343.0;

/// A propagation medium.
pub trait Environment: Send + Sync {
    /// Speed of sound, in m/s.
    fn speed_of_sound(&self) -> f64;

    /// Effective sound travel distance from `from` to `to`, in metres.
    fn distance(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> f64;

    /// Identifier of the environment parameters.
    fn digest(&self) -> Result<String, BeamError>;

    /// Travel distances between every point and every microphone, as a
    /// `(points, mics)` matrix.
    fn distances(&self, points: &[Vector3<f64>], mics: &[Vector3<f64>]) -> Array2<f64> {
        Array2::from_shape_fn((points.len(), mics.len()), |(i, j)| {
            self.distance(&points[i], &mics[j])
        })
    }

    /// Travel distances between every point and one reference position.
    fn distances_to(&self, points: &[Vector3<f64>], reference: &Vector3<f64>) -> Array1<f64> {
        points.iter().map(|p| self.distance(p, reference)).collect()
    }
}

/// Free field: sound travels on straight lines in a medium at rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeField {
    c: f64,
}

impl FreeField {
    /// A free field with speed of sound `c`, in m/s.
    pub fn new(c: f64) -> Result<Self, BeamError> {
        if !(c.is_finite() && c > 0.0) {
            return Err(BeamError::InvalidParameter(format!(
                "speed of sound must be positive, got {c}"
            )));
        }
        Ok(Self { c })
    }
}

impl Default for FreeField {
    fn default() -> Self {
        Self {
            c: DEFAULT_SPEED_OF_SOUND,
        }
    }
}

impl Environment for FreeField {
    fn speed_of_sound(&self) -> f64 {
        self.c
    }

    fn distance(&self, from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
        (to - from).norm()
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&("FreeField", self.c))
    }
}
