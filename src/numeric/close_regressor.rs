// External imports
use burn::module::{AutodiffModule, Module};
use burn::nn::{Linear, LinearConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::Backend, Tensor};
use burn_ndarray::NdArrayDevice;
use chrono::NaiveDate;
use log::{debug, info};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

// Internal imports
use super::PricePredictor;
use crate::constants::{PRICE_LOOKBACK, SPLIT_SEED};
use crate::direction::step_1_tensor_preparation::{targets_to_tensor, windows_to_tensor};
use crate::direction::step_2_lstm_cell::SequenceLSTM;
use crate::direction::step_4_train_model::{InferenceBackend, TrainBackend};
use crate::error::{ForecastError, Result};
use crate::types::PriceRecord;
use crate::util::feature_engineering::validate_price_history;
use crate::util::scaler::ScalerState;

/// Close-only sequence regressor: one LSTM over the lookback window of
/// standardized closes and a linear read-out of the next close
#[derive(Module, Debug)]
pub struct CloseRegressor<B: Backend> {
    hidden_size: usize,
    lstm: SequenceLSTM<B>,
    output_layer: Linear<B>,
}

impl<B: Backend> CloseRegressor<B> {
    pub fn new(hidden_size: usize, device: &B::Device) -> Self {
        Self {
            hidden_size,
            lstm: SequenceLSTM::new(1, hidden_size, false, device),
            output_layer: LinearConfig::new(hidden_size, 1).init(device),
        }
    }

    /// Maps [batch_size, lookback, 1] to [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, sequence_length, _] = x.dims();
        let last_output = self
            .lstm
            .forward(x)
            .narrow(1, sequence_length - 1, 1)
            .reshape([batch_size, self.hidden_size]);
        self.output_layer.forward(last_output)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseRegressorConfig {
    pub lookback: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for CloseRegressorConfig {
    fn default() -> Self {
        Self {
            lookback: PRICE_LOOKBACK,
            hidden_size: 50,
            learning_rate: 0.001,
            epochs: 10,
            batch_size: 32,
            seed: SPLIT_SEED,
        }
    }
}

/// Trained close regressor bundled with the closes it predicts from
#[derive(Debug, Clone)]
pub struct ClosePricePredictor {
    model: CloseRegressor<InferenceBackend>,
    scaler: ScalerState,
    lookback: usize,
    /// Ascending `(date, close)` history
    closes: Vec<(NaiveDate, f64)>,
    device: NdArrayDevice,
}

/// Closes laid out as `(n, 1, 1)` so the feature scaler can fit them
fn close_column(closes: &[f64]) -> Array3<f64> {
    Array3::from_shape_fn((closes.len(), 1, 1), |(i, _, _)| closes[i])
}

/// Sliding windows of `lookback` closes, each paired with the close that follows it
fn lookback_windows(scaled: &[f64], lookback: usize) -> (Array3<f64>, Vec<f32>) {
    let n = scaled.len() - lookback;
    let windows = Array3::from_shape_fn((n, lookback, 1), |(i, t, _)| scaled[i + t]);
    let targets = scaled[lookback..].iter().map(|v| *v as f32).collect();
    (windows, targets)
}

/// Trains the close regressor on a price history with MSE loss
pub fn train_close_regressor(
    prices: &[PriceRecord],
    config: &CloseRegressorConfig,
    device: &NdArrayDevice,
) -> Result<ClosePricePredictor> {
    validate_price_history(prices)?;
    if config.lookback == 0 || config.batch_size == 0 {
        return Err(ForecastError::Config(
            "lookback and batch_size must be at least 1".into(),
        ));
    }
    if prices.len() <= config.lookback {
        return Err(ForecastError::InsufficientHistory {
            needed: config.lookback + 1,
            available: prices.len(),
        });
    }

    let raw: Vec<f64> = prices.iter().map(|p| p.close).collect();
    let scaler = ScalerState::fit(&close_column(&raw))?;
    let scaled: Vec<f64> = raw.iter().map(|c| scaler.scale_value(0, *c)).collect();
    let (windows, targets) = lookback_windows(&scaled, config.lookback);
    let num_samples = targets.len();

    info!(
        "Training close regressor on {} windows of {} closes",
        num_samples, config.lookback
    );

    TrainBackend::seed(config.seed);
    let mut model = CloseRegressor::<TrainBackend>::new(config.hidden_size, device);
    let mut optimizer = AdamConfig::new().init();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..num_samples).collect();

    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);
        let features = windows_to_tensor::<TrainBackend>(
            &windows.select(ndarray::Axis(0), &order),
            device,
        );
        let shuffled_targets: Vec<f32> = order.iter().map(|&i| targets[i]).collect();
        let targets_tensor = targets_to_tensor::<TrainBackend>(&shuffled_targets, device);

        let mut epoch_loss = 0.0;
        let mut start = 0;
        while start < num_samples {
            let len = usize::min(config.batch_size, num_samples - start);
            let predictions = model.forward(features.clone().narrow(0, start, len));
            let diff = predictions - targets_tensor.clone().narrow(0, start, len);
            let loss = (diff.clone() * diff).mean();
            epoch_loss += f64::from(loss.clone().into_scalar()) * len as f64;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
            start += len;
        }
        debug!(
            "Close regressor epoch {}/{}: MSE {:.6}",
            epoch,
            config.epochs,
            epoch_loss / num_samples as f64
        );
    }

    Ok(ClosePricePredictor {
        model: model.valid(),
        scaler,
        lookback: config.lookback,
        closes: prices.iter().map(|p| (p.date, p.close)).collect(),
        device: device.clone(),
    })
}

impl ClosePricePredictor {
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Replaces the closes predictions are drawn from, e.g. with history
    /// extending past the training period
    pub fn with_history(mut self, prices: &[PriceRecord]) -> Result<Self> {
        validate_price_history(prices)?;
        self.closes = prices.iter().map(|p| (p.date, p.close)).collect();
        Ok(self)
    }
}

impl PricePredictor for ClosePricePredictor {
    /// Predicts the close on `date` from the `lookback` closes dated before it
    fn predict_price(&self, date: NaiveDate) -> Result<f64> {
        let available = self.closes.partition_point(|(d, _)| *d < date);
        if available < self.lookback {
            return Err(ForecastError::InsufficientHistory {
                needed: self.lookback,
                available,
            });
        }

        let window: Vec<f64> = self.closes[available - self.lookback..available]
            .iter()
            .map(|(_, c)| self.scaler.scale_value(0, *c))
            .collect();
        let input = windows_to_tensor::<InferenceBackend>(
            &Array3::from_shape_fn((1, self.lookback, 1), |(_, t, _)| window[t]),
            &self.device,
        );
        let output = self
            .model
            .forward(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ForecastError::Model(format!("failed to read prediction: {:?}", e)))?;
        let scaled = output
            .first()
            .copied()
            .ok_or_else(|| ForecastError::Model("empty regressor output".into()))?;

        Ok(self.scaler.unscale_value(0, f64::from(scaled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_utils::synthetic_prices;

    fn tiny_config() -> CloseRegressorConfig {
        CloseRegressorConfig {
            lookback: 10,
            hidden_size: 6,
            epochs: 2,
            batch_size: 16,
            ..CloseRegressorConfig::default()
        }
    }

    #[test]
    fn test_lookback_windows_pair_with_next_value() {
        let values: Vec<f64> = (0..6).map(|v| v as f64).collect();
        let (windows, targets) = lookback_windows(&values, 3);
        assert_eq!(windows.dim(), (3, 3, 1));
        assert_eq!(windows[[1, 2, 0]], 3.0);
        assert_eq!(targets, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_predictions_need_full_lookback() {
        let prices = synthetic_prices(60);
        let predictor = train_close_regressor(&prices, &tiny_config(), &NdArrayDevice::Cpu).unwrap();

        // Exactly ten closes precede row 10
        let prediction = predictor.predict_price(prices[10].date).unwrap();
        assert!(prediction.is_finite());

        let err = predictor.predict_price(prices[9].date).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientHistory {
                needed: 10,
                available: 9
            }
        ));
    }

    #[test]
    fn test_predictions_stay_in_price_units() {
        let prices = synthetic_prices(80);
        let predictor = train_close_regressor(&prices, &tiny_config(), &NdArrayDevice::Cpu).unwrap();
        let min = prices.iter().map(|p| p.close).fold(f64::INFINITY, f64::min);
        let max = prices.iter().map(|p| p.close).fold(f64::NEG_INFINITY, f64::max);

        // The read-out is unscaled back into the close range, give or take a few spreads
        let prediction = predictor.predict_price(prices[79].date).unwrap();
        let spread = max - min;
        assert!(prediction > min - 5.0 * spread && prediction < max + 5.0 * spread);
    }

    #[test]
    fn test_extended_history_serves_later_dates() {
        let prices = synthetic_prices(70);
        let predictor = train_close_regressor(&prices[..40], &tiny_config(), &NdArrayDevice::Cpu)
            .unwrap()
            .with_history(&prices)
            .unwrap();
        assert!(predictor.predict_price(prices[65].date).unwrap().is_finite());
    }

    #[test]
    fn test_short_history_cannot_train() {
        let prices = synthetic_prices(10);
        let err = train_close_regressor(&prices, &tiny_config(), &NdArrayDevice::Cpu).unwrap_err();
        assert!(err.is_insufficient_history());
    }
}
