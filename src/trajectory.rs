//! Time-stamped paths through space, used to move a grid during a
//! measurement.
//!
//! Between its way-points a [Trajectory] is a cubic Hermite curve whose
//! tangents are finite differences of the neighbouring way-points, so the
//! path passes through every way-point and has a continuous velocity.

use crate::digest::digest;
use crate::error::BeamError;

use nalgebra::Vector3;
use serde::Serialize;

/// Which quantity a [TrajectorySampler] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivative {
    /// Position, in metres.
    Location,
    /// Velocity, in metres per second.
    Velocity,
}

/// A path given by way-points `(time, [x, y, z])`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    points: Vec<(f64, [f64; 3])>,
}

impl Trajectory {
    /// Builds a trajectory from way-points in any order. At least one
    /// way-point is needed, and no two may share a time.
    pub fn new(mut points: Vec<(f64, [f64; 3])>) -> Result<Self, BeamError> {
        if points.is_empty() {
            return Err(BeamError::InvalidParameter(
                "a trajectory needs at least one way-point".to_string(),
            ));
        }
        if points
            .iter()
            .any(|(t, p)| !t.is_finite() || p.iter().any(|c| !c.is_finite()))
        {
            return Err(BeamError::InvalidParameter(
                "trajectory way-points must be finite".to_string(),
            ));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(w) = points.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(BeamError::InvalidParameter(format!(
                "two trajectory way-points at time {}",
                w[0].0
            )));
        }
        Ok(Self { points })
    }

    /// Time of the first and of the last way-point.
    pub fn interval(&self) -> (f64, f64) {
        (self.points[0].0, self.points[self.points.len() - 1].0)
    }

    fn time(&self, k: usize) -> f64 {
        self.points[k].0
    }

    fn point(&self, k: usize) -> Vector3<f64> {
        Vector3::from(self.points[k].1)
    }

    /// Finite-difference tangent at way-point `k`.
    fn tangent(&self, k: usize) -> Vector3<f64> {
        let last = self.points.len() - 1;
        let (a, b) = (k.saturating_sub(1), (k + 1).min(last));
        (self.point(b) - self.point(a)) / (self.time(b) - self.time(a))
    }

    /// Segment containing `t` and the position within it, from 0 to 1.
    fn segment(&self, t: f64) -> (usize, f64) {
        let last = self.points.len() - 1;
        let k = self.points[1..last]
            .partition_point(|(tk, _)| *tk <= t)
            .min(last - 1);
        let h = self.time(k + 1) - self.time(k);
        (k, ((t - self.time(k)) / h).clamp(0.0, 1.0))
    }

    /// Position at time `t`. Outside the interval the nearest end point is
    /// returned.
    pub fn location(&self, t: f64) -> Vector3<f64> {
        if self.points.len() == 1 {
            return self.point(0);
        }
        let (k, s) = self.segment(t);
        let h = self.time(k + 1) - self.time(k);
        let (s2, s3) = (s * s, s * s * s);

        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;

        self.point(k) * h00
            + self.tangent(k) * (h10 * h)
            + self.point(k + 1) * h01
            + self.tangent(k + 1) * (h11 * h)
    }

    /// Velocity at time `t`.
    pub fn velocity(&self, t: f64) -> Vector3<f64> {
        if self.points.len() == 1 {
            return Vector3::zeros();
        }
        let (k, s) = self.segment(t);
        let h = self.time(k + 1) - self.time(k);
        let s2 = s * s;

        let d00 = 6.0 * s2 - 6.0 * s;
        let d10 = 3.0 * s2 - 4.0 * s + 1.0;
        let d01 = -6.0 * s2 + 6.0 * s;
        let d11 = 3.0 * s2 - 2.0 * s;

        (self.point(k) * d00 + self.point(k + 1) * d01) / h
            + self.tangent(k) * d10
            + self.tangent(k + 1) * d11
    }

    /// Samples the trajectory at `t_start + k * delta_t` for as long as the
    /// time lies before the end of the interval.
    pub fn traj(&self, t_start: f64, delta_t: f64, derivative: Derivative) -> TrajectorySampler<'_> {
        TrajectorySampler {
            trajectory: self,
            t_start,
            delta_t,
            k: 0,
            derivative,
        }
    }

    /// Identifier of the way-points.
    pub fn digest(&self) -> Result<String, BeamError> {
        digest(&("Trajectory", &self.points))
    }
}

/// Iterator over evenly spaced samples of a [Trajectory].
#[derive(Debug, Clone)]
pub struct TrajectorySampler<'a> {
    trajectory: &'a Trajectory,
    t_start: f64,
    delta_t: f64,
    k: usize,
    derivative: Derivative,
}

impl Iterator for TrajectorySampler<'_> {
    type Item = Vector3<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.t_start + self.k as f64 * self.delta_t;
        if t >= self.trajectory.interval().1 || (self.k > 0 && self.delta_t <= 0.0) {
            return None;
        }
        self.k += 1;
        Some(match self.derivative {
            Derivative::Location => self.trajectory.location(t),
            Derivative::Velocity => self.trajectory.velocity(t),
        })
    }
}
