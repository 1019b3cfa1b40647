//! Grids of virtual source positions that the beamformers steer at, and
//! the [Sector]s that select parts of them.
//!
//! The order of [Grid::positions] is the output channel order of every
//! beamformer. Cartesian grids flatten their points in C order over
//! [Grid::shape], so for a [RectGrid] the point `(xi, yi)` is channel
//! `xi * nysteps + yi`.

use crate::digest::digest;
use crate::error::BeamError;
use crate::microphones::bbox_diagonal;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A sub-region of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sector {
    /// All points within radius `r` of `(x, y)`.
    Circle {
        /// Center x-coordinate.
        x: f64,
        /// Center y-coordinate.
        y: f64,
        /// Radius.
        r: f64,
    },
    /// The rectangle between two corners.
    Rect {
        /// First corner x-coordinate.
        x1: f64,
        /// First corner y-coordinate.
        y1: f64,
        /// Opposite corner x-coordinate.
        x2: f64,
        /// Opposite corner y-coordinate.
        y2: f64,
    },
    /// The inside of a polygon with at least three `[x, y]` corners.
    Polygon(Vec<[f64; 2]>),
    /// The box between two corners, for three-dimensional grids.
    Cuboid {
        /// First corner.
        p1: [f64; 3],
        /// Opposite corner.
        p2: [f64; 3],
    },
}

/// The geometry of a set of virtual source positions.
pub trait Grid: Send + Sync {
    /// Overall number of grid points.
    fn size(&self) -> usize;

    /// Number of points along each axis.
    fn shape(&self) -> Vec<usize>;

    /// All grid points, flattened in C order over [Grid::shape].
    fn positions(&self) -> Vec<Vector3<f64>>;

    /// Flat indices of the grid points inside `sector`, in ascending order.
    fn indices(&self, sector: &Sector) -> Result<Vec<usize>, BeamError>;

    /// Identifier of the grid definition.
    fn digest(&self) -> Result<String, BeamError>;

    /// Diagonal of the axis-aligned box around all grid points.
    fn bbox_diagonal(&self) -> f64 {
        bbox_diagonal(&self.positions())
    }
}

/// Number of steps for a grid axis, one if the increment is zero.
fn nsteps(min: f64, max: f64, increment: f64) -> usize {
    let i = increment.abs();
    if i != 0.0 {
        ((max - min).abs() / i + 1.0).round() as usize
    } else {
        1
    }
}

/// `n` evenly spaced values from `min` to `max`, both included.
fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![min];
    }
    let step = (max - min) / (n - 1) as f64;
    (0..n).map(|k| min + k as f64 * step).collect()
}

fn check_range(axis: &'static str, value: f64, min: f64, max: f64) -> Result<(), BeamError> {
    if value < min || value > max {
        Err(BeamError::OutOfRange {
            axis,
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

/// Even-odd test whether `(x, y)` lies inside the polygon `corners`.
fn polygon_contains(corners: &[[f64; 2]], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = corners.len() - 1;
    for i in 0..corners.len() {
        let [xi, yi] = corners[i];
        let [xj, yj] = corners[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A cartesian 2D grid on a plane perpendicular to the z-axis, with square
/// or nearly square cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectGrid {
    /// The lower x-limit.
    pub x_min: f64,
    /// The upper x-limit.
    pub x_max: f64,
    /// The lower y-limit.
    pub y_min: f64,
    /// The upper y-limit.
    pub y_max: f64,
    /// The z-coordinate of the plane.
    pub z: f64,
    /// The cell side length.
    pub increment: f64,
}

impl Default for RectGrid {
    fn default() -> Self {
        Self {
            x_min: -1.0,
            x_max: 1.0,
            y_min: -1.0,
            y_max: 1.0,
            z: 1.0,
            increment: 0.1,
        }
    }
}

impl RectGrid {
    /// Number of grid points along the x-axis.
    pub fn nxsteps(&self) -> usize {
        nsteps(self.x_min, self.x_max, self.increment)
    }

    /// Number of grid points along the y-axis.
    pub fn nysteps(&self) -> usize {
        nsteps(self.y_min, self.y_max, self.increment)
    }

    /// The extent of the grid as `(x_min, x_max, y_min, y_max)`.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        (self.x_min, self.x_max, self.y_min, self.y_max)
    }

    /// Indices of the grid point nearest to `(x, y)`.
    pub fn index(&self, x: f64, y: f64) -> Result<(usize, usize), BeamError> {
        check_range("x", x, self.x_min, self.x_max)?;
        check_range("y", y, self.y_min, self.y_max)?;
        let inc = self.increment.abs();
        if inc == 0.0 {
            return Ok((0, 0));
        }
        let xi = ((x - self.x_min) / inc + 0.5) as usize;
        let yi = ((y - self.y_min) / inc + 0.5) as usize;
        Ok((xi.min(self.nxsteps() - 1), yi.min(self.nysteps() - 1)))
    }

    fn flat(&self, (xi, yi): (usize, usize)) -> usize {
        xi * self.nysteps() + yi
    }

    /// Flat indices of the points matching `inside`, or of the point
    /// nearest to `fallback` if there are none.
    fn select<F>(&self, inside: F, fallback: (f64, f64)) -> Result<Vec<usize>, BeamError>
    where
        F: Fn(f64, f64) -> bool,
    {
        let found: Vec<usize> = self
            .positions()
            .iter()
            .enumerate()
            .filter(|(_, p)| inside(p.x, p.y))
            .map(|(i, _)| i)
            .collect();

        if found.is_empty() {
            let nearest = self.index(fallback.0, fallback.1)?;
            Ok(vec![self.flat(nearest)])
        } else {
            Ok(found)
        }
    }
}

impl Grid for RectGrid {
    fn size(&self) -> usize {
        self.nxsteps() * self.nysteps()
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.nxsteps(), self.nysteps()]
    }

    fn positions(&self) -> Vec<Vector3<f64>> {
        let xs = linspace(self.x_min, self.x_max, self.nxsteps());
        let ys = linspace(self.y_min, self.y_max, self.nysteps());
        xs.iter()
            .flat_map(|&x| ys.iter().map(move |&y| Vector3::new(x, y, self.z)))
            .collect()
    }

    fn indices(&self, sector: &Sector) -> Result<Vec<usize>, BeamError> {
        match sector {
            Sector::Circle { x, y, r } => {
                let r2 = r * r;
                self.select(|px, py| (px - x).powi(2) + (py - y).powi(2) <= r2, (*x, *y))
            }
            Sector::Rect { x1, y1, x2, y2 } => {
                let (xi1, yi1) = self.index(x1.min(*x2), y1.min(*y2))?;
                let (xi2, yi2) = self.index(x1.max(*x2), y1.max(*y2))?;
                Ok((xi1..=xi2)
                    .flat_map(|xi| (yi1..=yi2).map(move |yi| (xi, yi)))
                    .map(|ij| self.flat(ij))
                    .collect())
            }
            Sector::Polygon(corners) => {
                if corners.len() < 3 {
                    return Err(BeamError::InvalidSector(format!(
                        "a polygon needs at least three corners, got {}",
                        corners.len()
                    )));
                }
                let n = corners.len() as f64;
                let cx = corners.iter().map(|c| c[0]).sum::<f64>() / n;
                let cy = corners.iter().map(|c| c[1]).sum::<f64>() / n;
                self.select(|px, py| polygon_contains(corners, px, py), (cx, cy))
            }
            Sector::Cuboid { .. } => Err(BeamError::InvalidSector(
                "box sectors need a three-dimensional grid".to_string(),
            )),
        }
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&("RectGrid", self))
    }
}

/// A cartesian 3D grid with cubic or nearly cubic cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectGrid3D {
    /// The lower x-limit.
    pub x_min: f64,
    /// The upper x-limit.
    pub x_max: f64,
    /// The lower y-limit.
    pub y_min: f64,
    /// The upper y-limit.
    pub y_max: f64,
    /// The lower z-limit.
    pub z_min: f64,
    /// The upper z-limit.
    pub z_max: f64,
    /// The cell side lengths in x-, y- and z-direction.
    pub increment: [f64; 3],
}

impl Default for RectGrid3D {
    fn default() -> Self {
        Self {
            x_min: -1.0,
            x_max: 1.0,
            y_min: -1.0,
            y_max: 1.0,
            z_min: -1.0,
            z_max: 1.0,
            increment: [0.1; 3],
        }
    }
}

impl RectGrid3D {
    /// Number of grid points along each axis.
    pub fn steps(&self) -> [usize; 3] {
        [
            nsteps(self.x_min, self.x_max, self.increment[0]),
            nsteps(self.y_min, self.y_max, self.increment[1]),
            nsteps(self.z_min, self.z_max, self.increment[2]),
        ]
    }

    /// Indices of the grid point nearest to `(x, y, z)`.
    pub fn index(&self, x: f64, y: f64, z: f64) -> Result<[usize; 3], BeamError> {
        check_range("x", x, self.x_min, self.x_max)?;
        check_range("y", y, self.y_min, self.y_max)?;
        check_range("z", z, self.z_min, self.z_max)?;

        let steps = self.steps();
        let mins = [self.x_min, self.y_min, self.z_min];
        let mut ijk = [0; 3];
        for (axis, value) in [x, y, z].into_iter().enumerate() {
            let inc = self.increment[axis].abs();
            if inc != 0.0 {
                ijk[axis] = (((value - mins[axis]) / inc).round() as usize).min(steps[axis] - 1);
            }
        }
        Ok(ijk)
    }
}

impl Grid for RectGrid3D {
    fn size(&self) -> usize {
        self.steps().iter().product()
    }

    fn shape(&self) -> Vec<usize> {
        self.steps().to_vec()
    }

    fn positions(&self) -> Vec<Vector3<f64>> {
        let [nx, ny, nz] = self.steps();
        let xs = linspace(self.x_min, self.x_max, nx);
        let ys = linspace(self.y_min, self.y_max, ny);
        let zs = linspace(self.z_min, self.z_max, nz);

        let mut positions = Vec::with_capacity(nx * ny * nz);
        for &x in &xs {
            for &y in &ys {
                for &z in &zs {
                    positions.push(Vector3::new(x, y, z));
                }
            }
        }
        positions
    }

    fn indices(&self, sector: &Sector) -> Result<Vec<usize>, BeamError> {
        let Sector::Cuboid { p1, p2 } = sector else {
            return Err(BeamError::InvalidSector(
                "three-dimensional grids only support box sectors".to_string(),
            ));
        };
        let lo = self.index(p1[0].min(p2[0]), p1[1].min(p2[1]), p1[2].min(p2[2]))?;
        let hi = self.index(p1[0].max(p2[0]), p1[1].max(p2[1]), p1[2].max(p2[2]))?;

        let [_, ny, nz] = self.steps();
        let mut flat = Vec::new();
        for xi in lo[0]..=hi[0] {
            for yi in lo[1]..=hi[1] {
                for zi in lo[2]..=hi[2] {
                    flat.push((xi * ny + yi) * nz + zi);
                }
            }
        }
        Ok(flat)
    }

    fn digest(&self) -> Result<String, BeamError> {
        digest(&("RectGrid3D", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> RectGrid {
        RectGrid {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
            z: 0.5,
            increment: 0.25,
        }
    }

    #[test]
    fn rect_grid_shape_and_order() {
        let grid = unit_grid();
        assert_eq!(grid.shape(), vec![5, 5]);
        assert_eq!(grid.size(), 25);

        let pos = grid.positions();
        assert_eq!(pos.len(), 25);
        // y runs fastest
        assert_eq!(pos[1], Vector3::new(0.0, 0.25, 0.5));
        assert_eq!(pos[5], Vector3::new(0.25, 0.0, 0.5));
        assert_eq!(pos[24], Vector3::new(1.0, 1.0, 0.5));
    }

    #[test]
    fn zero_increment_gives_a_single_point() {
        let grid = RectGrid {
            increment: 0.0,
            ..unit_grid()
        };
        assert_eq!(grid.size(), 1);
        assert_eq!(grid.positions(), vec![Vector3::new(0.0, 0.0, 0.5)]);
    }

    #[test]
    fn index_rounds_to_the_nearest_point() {
        let grid = unit_grid();
        assert_eq!(grid.index(0.0, 0.0).unwrap(), (0, 0));
        assert_eq!(grid.index(0.3, 0.6).unwrap(), (1, 2));
        assert_eq!(grid.index(1.0, 1.0).unwrap(), (4, 4));
        assert!(matches!(
            grid.index(1.5, 0.0),
            Err(BeamError::OutOfRange { axis: "x", .. })
        ));
    }

    #[test]
    fn rect_sector_covers_the_rectangle_and_is_stable() {
        let grid = unit_grid();
        let sector = Sector::Rect {
            x1: 0.75,
            y1: 0.5,
            x2: 0.25,
            y2: 0.0,
        };
        let first = grid.indices(&sector).unwrap();
        let second = grid.indices(&sector).unwrap();
        assert_eq!(first, second);

        let pos = grid.positions();
        for (i, p) in pos.iter().enumerate() {
            let inside = (0.25..=0.75).contains(&p.x) && (0.0..=0.5).contains(&p.y);
            if inside {
                assert!(first.contains(&i), "point {i} at {p:?} is missing");
            }
        }
        assert_eq!(first.len(), 9);
    }

    #[test]
    fn circle_sector() {
        let grid = unit_grid();
        let inds = grid
            .indices(&Sector::Circle {
                x: 0.5,
                y: 0.5,
                r: 0.25,
            })
            .unwrap();
        // center plus its four direct neighbours
        assert_eq!(inds, vec![7, 11, 12, 13, 17]);
    }

    #[test]
    fn tiny_circle_falls_back_to_the_nearest_point() {
        let grid = unit_grid();
        let inds = grid
            .indices(&Sector::Circle {
                x: 0.3,
                y: 0.3,
                r: 0.01,
            })
            .unwrap();
        assert_eq!(inds, vec![6]);
    }

    #[test]
    fn polygon_sector() {
        let grid = unit_grid();
        let triangle = Sector::Polygon(vec![[-0.1, -0.1], [0.7, -0.1], [-0.1, 0.7]]);
        let inds = grid.indices(&triangle).unwrap();
        // (0,0), (0,0.25), (0,0.5), (0.25,0), (0.25,0.25), (0.5,0)
        assert_eq!(inds, vec![0, 1, 2, 5, 6, 10]);

        let degenerate = Sector::Polygon(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(matches!(
            grid.indices(&degenerate),
            Err(BeamError::InvalidSector(_))
        ));
    }

    #[test]
    fn grid_3d_box_sector() {
        let grid = RectGrid3D {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
            z_min: 0.0,
            z_max: 1.0,
            increment: [0.5, 0.5, 0.5],
        };
        assert_eq!(grid.shape(), vec![3, 3, 3]);
        assert_eq!(grid.positions()[1], Vector3::new(0.0, 0.0, 0.5));

        let inds = grid
            .indices(&Sector::Cuboid {
                p1: [0.5, 0.5, 0.5],
                p2: [1.0, 1.0, 1.0],
            })
            .unwrap();
        assert_eq!(inds, vec![13, 14, 16, 17, 22, 23, 25, 26]);
        assert!(grid
            .indices(&Sector::Circle {
                x: 0.0,
                y: 0.0,
                r: 1.0
            })
            .is_err());
    }

    #[test]
    fn digests_differ_between_grids() {
        let a = unit_grid();
        let b = RectGrid {
            z: 0.6,
            ..unit_grid()
        };
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap(), unit_grid().digest().unwrap());
    }
}
