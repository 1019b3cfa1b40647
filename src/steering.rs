//! The steering vector: where the grid points are relative to the
//! microphones, expressed as distances.

use crate::digest::digest;
use crate::environment::{Environment, FreeField};
use crate::error::BeamError;
use crate::grids::Grid;
use crate::microphones::MicGeom;

use nalgebra::Vector3;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What the reference distance `r0` of a grid point is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Reference {
    /// Distance from the coordinate origin.
    #[default]
    Origin,
    /// Distance from a fixed point.
    Point([f64; 3]),
    /// The same distance for every grid point.
    Distance(f64),
}

/// Grid, microphones and environment of a beamformer.
#[derive(Clone)]
pub struct SteeringVector {
    grid: Arc<dyn Grid>,
    mics: MicGeom,
    env: Arc<dyn Environment>,
    reference: Reference,
}

impl SteeringVector {
    /// Steers `mics` at the points of `grid` in a free field.
    pub fn new(grid: Arc<dyn Grid>, mics: MicGeom) -> Result<Self, BeamError> {
        if grid.size() == 0 {
            return Err(BeamError::EmptyGrid);
        }
        Ok(Self {
            grid,
            mics,
            env: Arc::new(FreeField::default()),
            reference: Reference::default(),
        })
    }

    /// Replaces the propagation environment.
    pub fn with_environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = env;
        self
    }

    /// Replaces what `r0` is measured against.
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    /// The grid.
    pub fn grid(&self) -> &Arc<dyn Grid> {
        &self.grid
    }

    /// The microphone array.
    pub fn mics(&self) -> &MicGeom {
        &self.mics
    }

    /// The propagation environment.
    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Number of microphones.
    pub fn num_mics(&self) -> usize {
        self.mics.num_mics()
    }

    /// Speed of sound of the environment, in m/s.
    pub fn speed_of_sound(&self) -> f64 {
        self.env.speed_of_sound()
    }

    /// Distances between every grid point and every microphone, `(N, M)`.
    pub fn rm(&self) -> Array2<f64> {
        self.rm_at(&self.grid.positions())
    }

    /// Reference distance of every grid point.
    pub fn r0(&self) -> Array1<f64> {
        self.r0_at(&self.grid.positions())
    }

    /// Like [SteeringVector::rm], for arbitrary (e.g. moved) positions.
    pub fn rm_at(&self, points: &[Vector3<f64>]) -> Array2<f64> {
        self.env.distances(points, self.mics.positions())
    }

    /// Like [SteeringVector::r0], for arbitrary (e.g. moved) positions.
    pub fn r0_at(&self, points: &[Vector3<f64>]) -> Array1<f64> {
        match self.reference {
            Reference::Origin => self.env.distances_to(points, &Vector3::zeros()),
            Reference::Point(p) => self.env.distances_to(points, &Vector3::from(p)),
            Reference::Distance(d) => Array1::from_elem(points.len(), d),
        }
    }

    /// Identifier of grid, microphones, environment and reference.
    pub fn digest(&self) -> Result<String, BeamError> {
        digest(&(
            "SteeringVector",
            self.grid.digest()?,
            self.mics.digest()?,
            self.env.digest()?,
            self.reference,
        ))
    }
}

impl std::fmt::Debug for SteeringVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteeringVector")
            .field("grid_size", &self.grid.size())
            .field("mics", &self.mics)
            .field("speed_of_sound", &self.env.speed_of_sound())
            .field("reference", &self.reference)
            .finish()
    }
}
