//! Ordinary least squares fusion of a numeric price prediction and a
//! sentiment score into one price estimate.

use anyhow::Context;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ForecastError, Result};

/// Linear model `price = intercept + w_p * prediction + w_s * sentiment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionModel {
    pub intercept: f64,
    pub prediction_weight: f64,
    pub sentiment_weight: f64,
    /// R-squared on the training rows, absent when the targets are constant
    pub r_squared: Option<f64>,
    pub n_samples: usize,
}

impl FusionModel {
    /// Fits the model on three aligned series.
    ///
    /// Solves the normal equations on mean-centred inputs, so the intercept
    /// follows from the means. A feature with no variance gets a zero weight.
    pub fn fit(predictions: &[f64], sentiments: &[f64], true_prices: &[f64]) -> Result<Self> {
        let n = true_prices.len();
        if predictions.len() != n || sentiments.len() != n {
            return Err(ForecastError::InvalidTrainingData(format!(
                "fusion inputs have mismatched lengths: {} predictions, {} sentiments, {} prices",
                predictions.len(),
                sentiments.len(),
                n
            )));
        }
        if n == 0 {
            return Err(ForecastError::InvalidTrainingData(
                "cannot fit the fusion model without rows".into(),
            ));
        }
        let all_finite = predictions
            .iter()
            .chain(sentiments)
            .chain(true_prices)
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ForecastError::InvalidTrainingData(
                "fusion inputs contain non-finite values".into(),
            ));
        }

        let mut x = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            x[[i, 0]] = predictions[i];
            x[[i, 1]] = sentiments[i];
        }
        let y = Array1::from(true_prices.to_vec());

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(2));
        let y_mean = y.sum() / n as f64;
        let xc = &x - &x_mean;
        let yc = &y - y_mean;

        // Normal equations: beta = (X'X)^(-1) X'y
        let xtx = xc.t().dot(&xc);
        let xty = xc.t().dot(&yc);
        let beta = solve_normal_equations(&xtx, &xty)?;

        let intercept = y_mean - beta.dot(&x_mean);
        let mut model = Self {
            intercept,
            prediction_weight: beta[0],
            sentiment_weight: beta[1],
            r_squared: None,
            n_samples: n,
        };

        let ss_tot: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
        if ss_tot > 0.0 {
            let ss_res: f64 = (0..n)
                .map(|i| (true_prices[i] - model.predict(predictions[i], sentiments[i])).powi(2))
                .sum();
            model.r_squared = Some(1.0 - ss_res / ss_tot);
        }

        Ok(model)
    }

    /// Fused price estimate for one prediction and sentiment value
    pub fn predict(&self, prediction: f64, sentiment: f64) -> f64 {
        self.intercept + self.prediction_weight * prediction + self.sentiment_weight * sentiment
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create fusion model directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize fusion model")?;
        std::fs::write(path, json).context("Failed to write fusion model")?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path).context("Failed to read fusion model")?;
        serde_json::from_str(&json).context("Failed to parse fusion model")
    }
}

/// Cholesky solve with a tiny ridge on the diagonal for numerical stability
fn solve_normal_equations(xtx: &Array2<f64>, xty: &Array1<f64>) -> Result<Array1<f64>> {
    let n = xtx.nrows();
    let mut a = xtx.clone();
    for i in 0..n {
        a[[i, i]] += 1e-10;
    }

    // Cholesky decomposition: A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return Err(ForecastError::InvalidTrainingData(
                        "fusion design matrix is singular".into(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * z = b
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * z[j]).sum();
        z[i] = (xty[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = z
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (z[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn linear_data() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let predictions: Vec<f64> = (0..30).map(|i| 18_000.0 + 13.0 * i as f64).collect();
        let sentiments: Vec<f64> = (0..30).map(|i| ((i as f64) * 0.7).sin() * 0.5).collect();
        let prices = predictions
            .iter()
            .zip(&sentiments)
            .map(|(p, s)| 25.0 + 0.98 * p + 140.0 * s)
            .collect();
        (predictions, sentiments, prices)
    }

    #[test]
    fn test_recovers_exact_linear_relation() {
        let (p, s, y) = linear_data();
        let model = FusionModel::fit(&p, &s, &y).unwrap();

        assert!((model.prediction_weight - 0.98).abs() < 1e-6);
        assert!((model.sentiment_weight - 140.0).abs() < 1e-4);
        assert!((model.intercept - 25.0).abs() < 1e-2);
        assert!((model.r_squared.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(model.n_samples, 30);
    }

    #[test]
    fn test_predict_is_linear_in_both_inputs() {
        let (p, s, mut y) = linear_data();
        // Add noise so the fit is not exact
        for (i, v) in y.iter_mut().enumerate() {
            *v += ((i * 17) % 11) as f64 - 5.0;
        }
        let model = FusionModel::fit(&p, &s, &y).unwrap();

        for (a, b) in [(18_100.0, 0.3), (0.0, -0.8), (17_950.5, 0.0)] {
            let lhs = model.predict(a, b);
            let rhs = model.predict(a, 0.0) + model.predict(0.0, b) - model.predict(0.0, 0.0);
            assert!((lhs - rhs).abs() < 1e-6);
        }
    }

    #[test]
    fn test_constant_sentiment_gets_zero_weight() {
        let (p, _, _) = linear_data();
        let s = vec![0.0; p.len()];
        let y: Vec<f64> = p.iter().map(|v| 2.0 * v - 100.0).collect();
        let model = FusionModel::fit(&p, &s, &y).unwrap();

        assert_eq!(model.sentiment_weight, 0.0);
        assert!((model.prediction_weight - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(FusionModel::fit(&[1.0, 2.0], &[0.1], &[1.0, 2.0]).is_err());
        assert!(FusionModel::fit(&[], &[], &[]).is_err());
        let err = FusionModel::fit(&[1.0, f64::NAN], &[0.1, 0.2], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidTrainingData(_)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (p, s, y) = linear_data();
        let model = FusionModel::fit(&p, &s, &y).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("fusion").join("fusion_model.json");

        model.save(&path).unwrap();
        assert_eq!(FusionModel::load(&path).unwrap(), model);

        let exact = FusionModel {
            intercept: 0.02782406139645227,
            prediction_weight: 0.9799999999991588,
            sentiment_weight: -12.345678901234567,
            r_squared: Some(0.9999999999999998),
            n_samples: 42,
        };
        exact.save(&path).unwrap();
        let restored = FusionModel::load(&path).unwrap();
        assert_eq!(restored.prediction_weight.to_bits(), exact.prediction_weight.to_bits());
        assert_eq!(restored, exact);
    }
}
