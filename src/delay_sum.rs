//! The delay model and the interpolated delay-and-sum kernel shared by all
//! time domain beamformers.
//!
//! A sound emitted at grid point `i` reaches microphone `j` after
//! `rm[i, j] / c` seconds, which is `delay[i, j]` samples. The output for
//! grid point `i` at time `t` sums the microphone signals at `t + delay`,
//! linearly interpolated between the two neighbouring samples and scaled
//! by an amplitude factor that undoes the spherical spreading.

use crate::error::BeamError;

use ndarray::{Array1, Array2, ArrayViewMut1};

/// Lower and upper clip bounds of the diagonal-removed power.
pub(crate) const DIAG_REMOVED_BOUNDS: (f64, f64) = (1e-100, 1e100);

/// How the per-microphone contributions of a grid point are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Summation {
    /// The plain sum.
    Plain,
    /// The square of the sum.
    Squared,
    /// The square of the sum without the autopower of each channel.
    DiagonalRemoved,
}

impl Summation {
    pub(crate) fn squared(r_diag: bool) -> Self {
        if r_diag {
            Summation::DiagonalRemoved
        } else {
            Summation::Squared
        }
    }
}

/// Integer delays and premultiplied interpolation weights for every
/// (grid point, microphone) pair.
#[derive(Debug, Clone)]
pub(crate) struct Delays {
    /// Integer delays, relative to `min_index`.
    index: Array2<usize>,
    frac1: Array2<f64>,
    frac2: Array2<f64>,
    min_index: usize,
    max_index: usize,
}

/// Fails with the first distance that is not strictly positive and finite.
fn check_distances<'a>(
    distances: impl IntoIterator<Item = &'a f64>,
    sample: usize,
) -> Result<(), BeamError> {
    match distances
        .into_iter()
        .find(|d| !(d.is_finite() && **d > 0.0))
    {
        Some(&distance) => Err(BeamError::NonPositiveDistance { sample, distance }),
        None => Ok(()),
    }
}

impl Delays {
    /// Derives the delays from the distances `rm` `(N, M)` and `r0` `(N)`,
    /// the channel weights `w` `(M)` and the distance sound travels during
    /// one sample. `sample` is only used to report degenerate geometry.
    pub(crate) fn new(
        rm: &Array2<f64>,
        r0: &Array1<f64>,
        w: &Array1<f64>,
        metres_per_sample: f64,
        sample: usize,
    ) -> Result<Self, BeamError> {
        check_distances(rm.iter(), sample)?;
        check_distances(r0.iter(), sample)?;

        let delays = rm / metres_per_sample;
        let floors = delays.mapv(f64::floor);
        let mut frac1 = &delays - &floors;
        let mut frac2 = frac1.mapv(|f| 1.0 - f);

        // amp[i, j] = 1 / (rm[i, j] * r0[i] * sum_j(w[j] / rm[i, j]^2))
        let norm: Array1<f64> = rm
            .rows()
            .into_iter()
            .zip(r0.iter())
            .map(|(row, r0)| row.iter().zip(w.iter()).map(|(r, w)| w / (r * r)).sum::<f64>() * r0)
            .collect();
        let amp = Array2::from_shape_fn(rm.dim(), |(i, j)| 1.0 / (norm[i] * rm[[i, j]]));
        frac1 *= &amp;
        frac2 *= &amp;

        let index = floors.mapv(|d| d as usize);
        let min_index = index.iter().copied().min().unwrap_or(0);
        let max_index = index.iter().copied().max().unwrap_or(0);

        Ok(Self {
            index: index.mapv(|d| d - min_index),
            frac1,
            frac2,
            min_index,
            max_index,
        })
    }

    /// Number of grid points.
    pub(crate) fn grid_size(&self) -> usize {
        self.index.nrows()
    }

    /// Smallest integer delay, in samples.
    pub(crate) fn min_index(&self) -> usize {
        self.min_index
    }

    /// Largest integer delay, in samples.
    pub(crate) fn max_index(&self) -> usize {
        self.max_index
    }

    /// Computes one output sample for every grid point into `out`. Row
    /// `row0` of `buf` holds the sample the smallest delay points at, and
    /// `buf` must hold the rows up to `row0 + max_index - min_index + 1`.
    pub(crate) fn sum_into(
        &self,
        buf: &Array2<f64>,
        row0: usize,
        mode: Summation,
        mut out: ArrayViewMut1<f64>,
    ) {
        let (grid_size, num_mics) = self.index.dim();
        for i in 0..grid_size {
            let mut sum = 0.0;
            let mut autopower = 0.0;
            for j in 0..num_mics {
                let row = row0 + self.index[[i, j]];
                let contrib =
                    buf[[row, j]] * self.frac1[[i, j]] + buf[[row + 1, j]] * self.frac2[[i, j]];
                sum += contrib;
                autopower += contrib * contrib;
            }
            out[i] = match mode {
                Summation::Plain => sum,
                Summation::Squared => sum * sum,
                Summation::DiagonalRemoved => {
                    let (lo, hi) = DIAG_REMOVED_BOUNDS;
                    (sum * sum - autopower).clamp(lo, hi)
                }
            };
        }
    }
}
