// External imports
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use log::{debug, info};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

// Internal imports
use super::step_1_tensor_preparation::{
    stratified_split, targets_to_tensor, windows_to_tensor, LabeledWindows,
};
use super::step_3_lstm_model_arch::{DirectionLstm, DirectionLstmConfig};
use crate::constants::{SPLIT_SEED, TEST_SPLIT_RATIO, VALIDATION_SPLIT_RATIO};
use crate::error::{ForecastError, Result};
use crate::util::metrics::{calibrate_threshold, CalibrationReport};
use crate::util::scaler::ScalerState;

pub type TrainBackend = Autodiff<NdArray<f32>>;
pub type InferenceBackend = NdArray<f32>;

/// Configuration for training one horizon's classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Share of windows held out for threshold calibration
    pub test_split: f64,
    /// Share of the training windows monitored for early stopping
    pub validation_split: f64,
    pub patience: usize,
    pub min_delta: f64,
    pub dropout: f64,
    pub hidden_sizes: [usize; 2],
    pub dense_sizes: [usize; 2],
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 25,
            test_split: TEST_SPLIT_RATIO,
            validation_split: VALIDATION_SPLIT_RATIO,
            patience: 5,       // Early stopping patience
            min_delta: 0.0001, // Minimum improvement threshold
            dropout: 0.3,
            hidden_sizes: [100, 50],
            dense_sizes: [64, 32],
            seed: SPLIT_SEED,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.epochs == 0 {
            return Err(ForecastError::Config(
                "batch_size and epochs must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(ForecastError::Config(format!(
                "validation split {} must lie in [0, 1)",
                self.validation_split
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ForecastError::Config(format!(
                "dropout {} must lie in [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Network layout for `input_size` features per time step
    pub fn network_config(&self, input_size: usize) -> DirectionLstmConfig {
        DirectionLstmConfig {
            input_size,
            hidden_size: self.hidden_sizes[0],
            second_hidden_size: self.hidden_sizes[1],
            dense_sizes: self.dense_sizes,
            dropout_rate: self.dropout,
            ..DirectionLstmConfig::new(input_size)
        }
    }
}

/// Loss curve of one training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub validation_losses: Vec<f64>,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_loss: f64,
    pub stopped_early: bool,
}

/// A trained classifier with the scaler fitted on its training windows and
/// the calibration computed on its held-out windows
#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    pub model: DirectionLstm<InferenceBackend>,
    pub network: DirectionLstmConfig,
    pub scaler: ScalerState,
    pub calibration: CalibrationReport,
    pub history: TrainingHistory,
    pub train_size: usize,
    pub validation_size: usize,
    pub test_size: usize,
}

/// Binary cross-entropy on raw logits, computed in the numerically stable
/// form `max(x, 0) - x * y + ln(1 + exp(-|x|))`
pub fn bce_with_logits_loss<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let positive_part = logits.clone().clamp_min(0.0);
    let log_term = logits.clone().abs().neg().exp().log1p();
    (positive_part - logits * targets + log_term).mean()
}

/// Splits `0..num_samples` into consecutive batches
fn batch_ranges(num_samples: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let mut batches = Vec::new();
    let mut start = 0;
    while start < num_samples {
        let end = usize::min(start + batch_size, num_samples);
        batches.push((start, end - start));
        start = end;
    }
    batches
}

fn labels_as_targets(labels: &[u8]) -> Vec<f32> {
    labels.iter().map(|l| f32::from(*l)).collect()
}

/// Mean BCE over a window set, evaluated without dropout
fn evaluate_loss<B: Backend>(
    model: &DirectionLstm<B>,
    features: &Tensor<B, 3>,
    targets: &Tensor<B, 2>,
    batch_size: usize,
) -> f64 {
    let num_samples = features.dims()[0];
    let mut total = 0.0;
    for (start, len) in batch_ranges(num_samples, batch_size) {
        let logits = model.forward(features.clone().narrow(0, start, len), false);
        let loss = bce_with_logits_loss(logits, targets.clone().narrow(0, start, len));
        total += loss.into_scalar().elem::<f64>() * len as f64;
    }
    total / num_samples.max(1) as f64
}

/// Runs already-scaled windows through the classifier and returns the
/// probability of an upward move for each
pub fn predict_probabilities<B: Backend>(
    model: &DirectionLstm<B>,
    scaled_windows: &Array3<f64>,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<f64>> {
    let features = windows_to_tensor::<B>(scaled_windows, device);
    let num_samples = features.dims()[0];
    let mut probabilities = Vec::with_capacity(num_samples);

    for (start, len) in batch_ranges(num_samples, batch_size.max(1)) {
        let batch = features.clone().narrow(0, start, len);
        let values = model
            .predict_proba(batch)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ForecastError::Model(format!("failed to read probabilities: {:?}", e)))?;
        probabilities.extend(values.into_iter().map(f64::from));
    }

    Ok(probabilities)
}

/// Trains one horizon's classifier.
///
/// Windows are split with a label-stratified, seeded split; the scaler is
/// fitted on the training part only. A trailing slice of the training part
/// drives early stopping and the held-out part calibrates the decision
/// threshold.
pub fn train_direction_classifier(
    data: &LabeledWindows,
    config: &TrainingConfig,
    device: &NdArrayDevice,
) -> Result<TrainedClassifier> {
    config.validate()?;
    if data.is_empty() {
        return Err(ForecastError::InvalidTrainingData(
            "no labeled windows to train on".into(),
        ));
    }

    let split = stratified_split(&data.labels, config.test_split, config.seed)?;

    // Validation slice taken from the end of the shuffled training indices
    let validation_size = (split.train.len() as f64 * config.validation_split).round() as usize;
    let validation_size = validation_size.min(split.train.len().saturating_sub(1));
    let fit_size = split.train.len() - validation_size;

    let train_part = data.select(&split.train);
    let fit_set = data.select(&split.train[..fit_size]);
    let validation_set = data.select(&split.train[fit_size..]);
    let test_set = data.select(&split.test);

    let scaler = ScalerState::fit(&train_part.windows)?;
    let fit_windows = scaler.transform(&fit_set.windows)?;
    if fit_windows.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::InvalidTrainingData(
            "training windows contain non-finite values".into(),
        ));
    }
    let validation_windows = scaler.transform(&validation_set.windows)?;
    let test_windows = scaler.transform(&test_set.windows)?;

    info!(
        "Training on {} windows, validating on {}, calibrating on {}",
        fit_size,
        validation_size,
        test_set.len()
    );

    TrainBackend::seed(config.seed);
    let network = config.network_config(data.windows.dim().2);
    let mut model: DirectionLstm<TrainBackend> = network.init(device);
    let mut optimizer = AdamConfig::new().init();

    // Monitored set lives on the inner backend so no graph is recorded
    let (monitor_x, monitor_y) = if validation_size > 0 {
        (
            windows_to_tensor::<InferenceBackend>(&validation_windows, device),
            targets_to_tensor::<InferenceBackend>(&labels_as_targets(&validation_set.labels), device),
        )
    } else {
        (
            windows_to_tensor::<InferenceBackend>(&fit_windows, device),
            targets_to_tensor::<InferenceBackend>(&labels_as_targets(&fit_set.labels), device),
        )
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..fit_size).collect();
    let mut history = TrainingHistory {
        best_loss: f64::INFINITY,
        ..TrainingHistory::default()
    };
    let mut best_model = model.clone();
    let mut epochs_no_improve = 0;

    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);
        let shuffled = fit_set.select(&order);
        let features = windows_to_tensor::<TrainBackend>(
            &scaler.transform(&shuffled.windows)?,
            device,
        );
        let targets = targets_to_tensor::<TrainBackend>(&labels_as_targets(&shuffled.labels), device);

        let mut epoch_loss = 0.0;
        for (start, len) in batch_ranges(fit_size, config.batch_size) {
            let logits = model.forward(features.clone().narrow(0, start, len), true);
            let loss = bce_with_logits_loss(logits, targets.clone().narrow(0, start, len));
            epoch_loss += f64::from(loss.clone().into_scalar()) * len as f64;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);
        }
        let train_loss = epoch_loss / fit_size as f64;
        let monitored_loss = evaluate_loss(&model.valid(), &monitor_x, &monitor_y, config.batch_size);

        history.train_losses.push(train_loss);
        history.validation_losses.push(monitored_loss);
        history.epochs_run = epoch;
        debug!(
            "Epoch {}/{}: train loss {:.6}, monitored loss {:.6}",
            epoch, config.epochs, train_loss, monitored_loss
        );

        // Early stopping logic
        if history.best_loss - monitored_loss > config.min_delta {
            history.best_loss = monitored_loss;
            history.best_epoch = epoch;
            best_model = model.clone();
            epochs_no_improve = 0;
        } else {
            epochs_no_improve += 1;
            if epochs_no_improve >= config.patience {
                debug!(
                    "Early stopping at epoch {} (best loss {:.6} at epoch {})",
                    epoch, history.best_loss, history.best_epoch
                );
                history.stopped_early = true;
                break;
            }
        }
    }

    let model = best_model.valid();
    let probabilities = predict_probabilities(&model, &test_windows, config.batch_size, device)?;
    let calibration = calibrate_threshold(&probabilities, &test_set.labels)?;

    info!(
        "Calibrated threshold {:.2} with F1 {:.4}, ROC AUC {}, AP {}, labels {:?}",
        calibration.threshold,
        calibration.f1,
        calibration
            .roc_auc
            .map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v)),
        calibration
            .average_precision
            .map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v)),
        calibration.label_distribution
    );

    Ok(TrainedClassifier {
        model,
        network,
        scaler,
        calibration,
        history,
        train_size: fit_size,
        validation_size,
        test_size: test_set.len(),
    })
}
