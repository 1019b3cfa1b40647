//! Spatial weighting of the microphone channels.

use crate::error::BeamError;
use crate::steering::SteeringVector;

use nalgebra::Vector3;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the microphone channels are weighted before summation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialWeighting {
    /// Every channel counts the same.
    #[default]
    None,
    /// Channels are weighted so that the power per unit area of the array
    /// is constant, which compensates for arrays that are denser in some
    /// rings than in others.
    Power,
}

impl SpatialWeighting {
    /// Per-microphone weights for the array of `steer`.
    pub fn weights(&self, steer: &SteeringVector) -> Array1<f64> {
        match self {
            SpatialWeighting::None => Array1::ones(steer.num_mics()),
            SpatialWeighting::Power => {
                let r = steer
                    .env()
                    .distances_to(steer.mics().positions(), &Vector3::zeros());
                const_power_weights(&r.to_vec())
            }
        }
    }
}

impl FromStr for SpatialWeighting {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SpatialWeighting::None),
            "power" => Ok(SpatialWeighting::Power),
            other => Err(BeamError::InvalidParameter(format!(
                "unknown weighting '{other}', expected 'none' or 'power'"
            ))),
        }
    }
}

/// Weights from the distances of the microphones to the array origin. The
/// distances are binned into rings, and each microphone gets the square
/// root of its ring's area shared among the ring's microphones.
fn const_power_weights(distances: &[f64]) -> Array1<f64> {
    let max = distances.iter().copied().fold(0.0, f64::max);
    if max <= 0.0 {
        return Array1::ones(distances.len());
    }
    let rounded: Vec<f64> = distances
        .iter()
        .map(|d| (d / max * 10.0).round() / 10.0)
        .collect();

    let mut unique = rounded.clone();
    unique.sort_by(f64::total_cmp);
    unique.dedup();
    if unique.len() < 2 {
        return Array1::ones(distances.len());
    }

    let mids: Vec<f64> = unique.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    let last_mid = mids[mids.len() - 1];
    let mut edges = Vec::with_capacity(unique.len() + 1);
    edges.push(0.0);
    edges.extend_from_slice(&mids);
    edges.push(1.5 - 0.5 * last_mid);

    let ring = |value: f64| unique.iter().position(|&u| u == value).unwrap_or(0);
    let mut counts = vec![0usize; unique.len()];
    for &value in &rounded {
        counts[ring(value)] += 1;
    }

    let per_ring: Vec<f64> = (0..unique.len())
        .map(|k| ((edges[k + 1].powi(2) - edges[k].powi(2)) / counts[k] as f64).sqrt())
        .collect();
    let mean = per_ring.iter().sum::<f64>() / per_ring.len() as f64;

    rounded.iter().map(|&value| per_ring[ring(value)] / mean).collect()
}
