// External imports
use burn_ndarray::NdArrayDevice;
use chrono::NaiveDate;
use log::{debug, warn};
use polars::prelude::*;

// Internal imports
use super::step_1_tensor_preparation::prepare_full_dataset_for_prediction;
use super::step_3_lstm_model_arch::{DirectionLstm, DirectionLstmConfig};
use super::step_4_train_model::{predict_probabilities, InferenceBackend, TrainedClassifier};
use crate::error::{ForecastError, Result};
use crate::types::{Horizon, Prediction};
use crate::util::metrics::apply_threshold;
use crate::util::scaler::ScalerState;

const INFERENCE_BATCH_SIZE: usize = 256;

/// Everything needed to classify one horizon: the network, the scaler fitted
/// on its training windows and its calibrated threshold. The three are only
/// ever used together.
#[derive(Debug, Clone)]
pub struct HorizonModel {
    pub horizon: Horizon,
    pub classifier: DirectionLstm<InferenceBackend>,
    pub network: DirectionLstmConfig,
    pub scaler: ScalerState,
    pub threshold: f64,
    pub backcandles: usize,
    /// Ordered feature columns the classifier was trained on
    pub feature_columns: Vec<String>,
}

impl HorizonModel {
    pub fn from_trained(
        horizon: Horizon,
        trained: TrainedClassifier,
        backcandles: usize,
        feature_columns: &[&str],
    ) -> Self {
        Self {
            horizon,
            threshold: trained.calibration.threshold,
            classifier: trained.model,
            network: trained.network,
            scaler: trained.scaler,
            backcandles,
            feature_columns: feature_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn feature_refs(&self) -> Vec<&str> {
        self.feature_columns.iter().map(String::as_str).collect()
    }
}

/// Outcome for one inference date
#[derive(Debug)]
pub struct DatedPrediction {
    pub date: NaiveDate,
    pub outcome: Result<Prediction>,
}

impl DatedPrediction {
    pub fn prediction(&self) -> Option<Prediction> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Walk-forward inference over a whole feature frame.
///
/// Every row with `backcandles` rows before it gets an entry. A date whose
/// lookback contains an incomplete row gets `InsufficientHistory` instead of
/// a prediction and the rest of the batch is unaffected. Each prediction
/// reads only the rows strictly before its date.
pub fn predict_direction(
    model: &HorizonModel,
    frame: &DataFrame,
    device: &NdArrayDevice,
) -> Result<Vec<DatedPrediction>> {
    let feature_columns = model.feature_refs();
    if model.scaler.n_features() != feature_columns.len() {
        return Err(ForecastError::FeatureMismatch {
            expected: feature_columns.len(),
            actual: model.scaler.n_features(),
        });
    }

    let full = prepare_full_dataset_for_prediction(frame, model.backcandles, &feature_columns)?;
    let probabilities = if full.windows.dim().0 > 0 {
        let scaled = model.scaler.transform(&full.windows)?;
        predict_probabilities(&model.classifier, &scaled, INFERENCE_BATCH_SIZE, device)?
    } else {
        Vec::new()
    };
    let directions = apply_threshold(&probabilities, model.threshold);

    let predictions: Vec<DatedPrediction> = full
        .slots
        .iter()
        .map(|slot| {
            let outcome = match slot.window {
                Some(idx) => Ok(Prediction {
                    probability: probabilities[idx],
                    direction: directions[idx],
                }),
                None => Err(ForecastError::InsufficientHistory {
                    needed: model.backcandles,
                    available: slot.valid_rows,
                }),
            };
            DatedPrediction {
                date: slot.date,
                outcome,
            }
        })
        .collect();

    let missing = predictions.iter().filter(|p| p.outcome.is_err()).count();
    if missing > 0 {
        warn!(
            "{} of {} {} dates lack a complete lookback and have no prediction",
            missing,
            predictions.len(),
            model.horizon
        );
    }
    debug!(
        "Predicted {} {} dates with threshold {:.2}",
        predictions.len() - missing,
        model.horizon,
        model.threshold
    );

    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FEATURE_COLUMNS;
    use crate::direction::step_1_tensor_preparation::prepare_dataset;
    use crate::util::pre_processor::column_dates;
    use crate::util::test_utils::{synthetic_joined_features, tiny_training_config};

    /// Untrained network with a scaler fitted on the frame's own windows
    fn untrained_model(labeled: &DataFrame, backcandles: usize) -> HorizonModel {
        let device = NdArrayDevice::Cpu;
        let data = prepare_dataset(
            labeled,
            Horizon::Daily.label_column(),
            backcandles,
            &FEATURE_COLUMNS,
            None,
        )
        .unwrap();
        let network = tiny_training_config().network_config(FEATURE_COLUMNS.len());
        HorizonModel {
            horizon: Horizon::Daily,
            classifier: network.init(&device),
            network,
            scaler: ScalerState::fit(&data.windows).unwrap(),
            threshold: 0.5,
            backcandles,
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_eighty_rows_yield_sixty_five_dates() {
        let (labeled, inference) = synthetic_joined_features(80, Horizon::Daily);
        let model = untrained_model(&labeled, 15);

        let predictions = predict_direction(&model, &inference, &NdArrayDevice::Cpu).unwrap();
        let dates = column_dates(&inference).unwrap();

        assert_eq!(predictions.len(), 65);
        assert_eq!(predictions[0].date, dates[15]);
        assert!(predictions.iter().all(|p| p.date >= dates[15]));
        for p in &predictions {
            let prediction = p.prediction().unwrap();
            assert!((0.0..=1.0).contains(&prediction.probability));
            assert_eq!(prediction.direction, u8::from(prediction.probability >= 0.5));
        }
    }

    #[test]
    fn test_later_rows_never_change_earlier_predictions() {
        let (labeled, inference) = synthetic_joined_features(80, Horizon::Daily);
        let model = untrained_model(&labeled, 15);
        let device = NdArrayDevice::Cpu;
        let before = predict_direction(&model, &inference, &device).unwrap();

        // Perturb the last ten sessions
        let mut altered = inference.clone();
        let high: Vec<f64> = crate::util::pre_processor::column_f64(&inference, "high")
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.unwrap() * if i >= 70 { 1.5 } else { 1.0 })
            .collect();
        altered.replace("high", Series::new("high".into(), high)).unwrap();
        let after = predict_direction(&model, &altered, &device).unwrap();

        // Slot for row r reads rows r - 15 .. r, so rows up to 70 are untouched
        for (a, b) in before.iter().zip(after.iter()).take(70 - 15 + 1) {
            assert_eq!(a.date, b.date);
            assert_eq!(a.prediction(), b.prediction());
        }
    }

    #[test]
    fn test_incomplete_lookback_is_reported_per_date() {
        let (labeled, inference) = synthetic_joined_features(60, Horizon::Daily);
        let model = untrained_model(&labeled, 10);

        let mut gappy = inference.clone();
        let mut sentiment: Vec<Option<f64>> =
            crate::util::pre_processor::column_f64(&inference, "avg_sentiment").unwrap();
        sentiment[0] = None;
        gappy
            .replace("avg_sentiment", Series::new("avg_sentiment".into(), sentiment))
            .unwrap();

        let predictions = predict_direction(&model, &gappy, &NdArrayDevice::Cpu).unwrap();
        assert_eq!(predictions.len(), 50);
        match &predictions[0].outcome {
            Err(ForecastError::InsufficientHistory { needed, available }) => {
                assert_eq!((*needed, *available), (10, 9));
            }
            other => panic!("expected insufficient history, got {:?}", other),
        }
        assert!(predictions[1..].iter().all(|p| p.outcome.is_ok()));
    }
}
