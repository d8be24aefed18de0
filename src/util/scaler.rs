//! Per-feature standardization for window tensors.
//!
//! Statistics are fitted once on training windows (flattened over the
//! window and time axes) and reused verbatim for held-out and inference
//! windows.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Fitted per-feature mean and scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    /// Number of time steps the statistics were fitted on
    pub n_samples: usize,
}

impl ScalerState {
    /// Fits mean and population standard deviation for every feature of a
    /// `(windows, backcandles, features)` array. Features with zero variance
    /// get a unit scale so they map to zero.
    pub fn fit(windows: &Array3<f64>) -> Result<Self> {
        let n_features = windows.len_of(Axis(2));
        let n_samples = windows.len_of(Axis(0)) * windows.len_of(Axis(1));
        if n_samples == 0 {
            return Err(ForecastError::InvalidTrainingData(
                "cannot fit a scaler on an empty window set".into(),
            ));
        }

        let mut sum = vec![0.0; n_features];
        for lane in windows.lanes(Axis(2)) {
            for (j, v) in lane.iter().enumerate() {
                sum[j] += v;
            }
        }
        let mean: Vec<f64> = sum.iter().map(|s| s / n_samples as f64).collect();

        let mut sq = vec![0.0; n_features];
        for lane in windows.lanes(Axis(2)) {
            for (j, v) in lane.iter().enumerate() {
                sq[j] += (v - mean[j]).powi(2);
            }
        }
        let scale = sq
            .iter()
            .map(|s| {
                let std = (s / n_samples as f64).sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self {
            mean,
            scale,
            n_samples,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn check_features(&self, windows: &Array3<f64>) -> Result<()> {
        let actual = windows.len_of(Axis(2));
        if actual != self.n_features() {
            return Err(ForecastError::FeatureMismatch {
                expected: self.n_features(),
                actual,
            });
        }
        Ok(())
    }

    /// Applies `(x - mean) / scale` per feature; never refits
    pub fn transform(&self, windows: &Array3<f64>) -> Result<Array3<f64>> {
        self.check_features(windows)?;
        let mut scaled = windows.clone();
        for mut lane in scaled.lanes_mut(Axis(2)) {
            for (j, v) in lane.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        Ok(scaled)
    }

    /// Maps standardized values back to the original feature space
    pub fn inverse_transform(&self, windows: &Array3<f64>) -> Result<Array3<f64>> {
        self.check_features(windows)?;
        let mut restored = windows.clone();
        for mut lane in restored.lanes_mut(Axis(2)) {
            for (j, v) in lane.iter_mut().enumerate() {
                *v = *v * self.scale[j] + self.mean[j];
            }
        }
        Ok(restored)
    }

    /// Standardizes one value of feature `j`
    pub fn scale_value(&self, j: usize, value: f64) -> f64 {
        (value - self.mean[j]) / self.scale[j]
    }

    /// Inverse of `scale_value`
    pub fn unscale_value(&self, j: usize, value: f64) -> f64 {
        value * self.scale[j] + self.mean[j]
    }
}
