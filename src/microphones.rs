//! Microphone array geometry.

use crate::digest::digest;
use crate::error::BeamError;

use nalgebra::Vector3;

/// The ordered positions of the microphones of an array. The order is the
/// channel order of the recordings the array produces.
#[derive(Debug, Clone, PartialEq)]
pub struct MicGeom {
    positions: Vec<Vector3<f64>>,
}

impl MicGeom {
    /// Builds an array from its microphone positions, in metres.
    pub fn new(positions: Vec<Vector3<f64>>) -> Result<Self, BeamError> {
        if positions.is_empty() {
            return Err(BeamError::NoMicrophones);
        }
        Ok(Self { positions })
    }

    /// Builds an array from `[x, y, z]` triples.
    pub fn from_coordinates(coordinates: &[[f64; 3]]) -> Result<Self, BeamError> {
        Self::new(coordinates.iter().map(|&c| Vector3::from(c)).collect())
    }

    /// `count` microphones evenly spaced on a circle of `radius` around
    /// `center`, in the plane perpendicular to the z-axis.
    pub fn circle(count: usize, radius: f64, center: Vector3<f64>) -> Result<Self, BeamError> {
        use std::f64::consts::PI;
        let positions = (0..count)
            .map(|i| 2.0 * PI * i as f64 / count as f64)
            .map(|angle| center + Vector3::new(radius * angle.cos(), radius * angle.sin(), 0.0))
            .collect();
        Self::new(positions)
    }

    /// The array without the microphones at the `invalid` channel indices,
    /// matching a source with those channels masked.
    pub fn without_channels(&self, invalid: &[usize]) -> Result<Self, BeamError> {
        if let Some(&channel) = invalid.iter().find(|&&c| c >= self.positions.len()) {
            return Err(BeamError::InvalidParameter(format!(
                "invalid channel {} of an array with {} microphones",
                channel,
                self.positions.len()
            )));
        }
        Self::new(
            self.positions
                .iter()
                .enumerate()
                .filter(|(i, _)| !invalid.contains(i))
                .map(|(_, p)| *p)
                .collect(),
        )
    }

    /// Number of microphones.
    pub fn num_mics(&self) -> usize {
        self.positions.len()
    }

    /// Microphone positions in channel order.
    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    /// Geometric center of the array.
    pub fn center(&self) -> Vector3<f64> {
        self.positions.iter().sum::<Vector3<f64>>() / self.positions.len() as f64
    }

    /// Diagonal of the axis-aligned box around all microphones.
    pub fn bbox_diagonal(&self) -> f64 {
        bbox_diagonal(&self.positions)
    }

    /// Identifier of the array geometry.
    pub fn digest(&self) -> Result<String, BeamError> {
        let coordinates: Vec<[f64; 3]> = self.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
        digest(&("MicGeom", coordinates))
    }
}

/// Diagonal of the axis-aligned box around `points`, zero for no points.
pub(crate) fn bbox_diagonal(points: &[Vector3<f64>]) -> f64 {
    let Some(first) = points.first() else {
        return 0.0;
    };
    let (lo, hi) = points
        .iter()
        .fold((*first, *first), |(lo, hi), p| (lo.inf(p), hi.sup(p)));
    (hi - lo).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_array_is_rejected() {
        assert!(matches!(MicGeom::new(vec![]), Err(BeamError::NoMicrophones)));
    }

    #[test]
    fn circle_is_centered() {
        let mics = MicGeom::circle(8, 0.5, Vector3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(mics.num_mics(), 8);
        let center = mics.center();
        assert_abs_diff_eq!(center.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(center.y, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(center.z, 3.0, epsilon = 1e-12);
        for p in mics.positions() {
            assert_abs_diff_eq!((p - center).norm(), 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn invalid_channels_are_left_out() {
        let mics = MicGeom::circle(4, 1.0, Vector3::zeros()).unwrap();
        let valid = mics.without_channels(&[1, 3]).unwrap();
        assert_eq!(valid.num_mics(), 2);
        assert_eq!(valid.positions()[0], mics.positions()[0]);
        assert_eq!(valid.positions()[1], mics.positions()[2]);

        assert!(matches!(
            mics.without_channels(&[4]),
            Err(BeamError::InvalidParameter(_))
        ));
        assert!(matches!(
            mics.without_channels(&[0, 1, 2, 3]),
            Err(BeamError::NoMicrophones)
        ));
    }

    #[test]
    fn bbox_diagonal_of_a_square() {
        let mics =
            MicGeom::from_coordinates(&[[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 4.0, 0.0]]).unwrap();
        assert_abs_diff_eq!(mics.bbox_diagonal(), 5.0, epsilon = 1e-12);
    }
}
