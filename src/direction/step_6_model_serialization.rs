use anyhow::{Context, Result};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn_ndarray::NdArrayDevice;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::step_3_lstm_model_arch::DirectionLstmConfig;
use super::step_5_prediction::HorizonModel;
use crate::build_info;
use crate::constants::{BUNDLE_META_FILE_NAME, CLASSIFIER_FILE_NAME, SCALER_FILE_NAME};
use crate::error::ForecastError;
use crate::types::Horizon;
use crate::util::scaler::ScalerState;

/// Metadata written next to a horizon's classifier and scaler
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BundleMetadata {
    pub version: String,
    pub rustc_version: String,
    pub created_at: DateTime<Utc>,
    pub horizon: Horizon,
    pub backcandles: usize,
    pub feature_columns: Vec<String>,
    pub threshold: f64,
    pub network: DirectionLstmConfig,
}

impl BundleMetadata {
    pub fn for_model(model: &HorizonModel) -> Self {
        Self {
            version: build_info::PKG_VERSION.to_string(),
            rustc_version: build_info::RUSTC_VERSION.to_string(),
            created_at: Utc::now(),
            horizon: model.horizon,
            backcandles: model.backcandles,
            feature_columns: model.feature_columns.clone(),
            threshold: model.threshold,
            network: model.network.clone(),
        }
    }

    /// Fails with `ArtifactMismatch` unless the bundle was trained for the
    /// same horizon, lookback and ordered feature set
    pub fn check_fingerprint(
        &self,
        horizon: Horizon,
        backcandles: usize,
        feature_columns: &[&str],
    ) -> std::result::Result<(), ForecastError> {
        if self.horizon != horizon {
            return Err(ForecastError::ArtifactMismatch(format!(
                "bundle was trained for the {} horizon, not {}",
                self.horizon, horizon
            )));
        }
        if self.backcandles != backcandles {
            return Err(ForecastError::ArtifactMismatch(format!(
                "bundle uses {} backcandles, configuration asks for {}",
                self.backcandles, backcandles
            )));
        }
        if self.feature_columns.iter().map(String::as_str).ne(feature_columns.iter().copied()) {
            return Err(ForecastError::ArtifactMismatch(format!(
                "bundle features {:?} differ from {:?}",
                self.feature_columns, feature_columns
            )));
        }
        Ok(())
    }
}

/// Directory holding one horizon's artifacts
pub fn bundle_dir(model_dir: &Path, horizon: Horizon) -> PathBuf {
    model_dir.join(horizon.name())
}

/// True when all three artifacts of a horizon are present
pub fn bundle_exists(model_dir: &Path, horizon: Horizon) -> bool {
    let dir = bundle_dir(model_dir, horizon);
    dir.join(CLASSIFIER_FILE_NAME).with_extension("bin").exists()
        && dir.join(SCALER_FILE_NAME).exists()
        && dir.join(BUNDLE_META_FILE_NAME).exists()
}

/// Save classifier weights, scaler and metadata for one horizon
pub fn save_horizon_model(model: &HorizonModel, model_dir: &Path) -> Result<PathBuf> {
    let dir = bundle_dir(model_dir, model.horizon);
    std::fs::create_dir_all(&dir).context("Failed to create model bundle directory")?;

    // An existing bundle stops being loadable before any of its files change
    let metadata_path = dir.join(BUNDLE_META_FILE_NAME);
    if metadata_path.exists() {
        std::fs::remove_file(&metadata_path).context("Failed to remove old metadata file")?;
    }

    model
        .classifier
        .clone()
        .save_file::<BinFileRecorder<FullPrecisionSettings>, _>(
            dir.join(CLASSIFIER_FILE_NAME),
            &Default::default(),
        )
        .context("Failed to save classifier")?;

    let scaler_json =
        serde_json::to_string_pretty(&model.scaler).context("Failed to serialize scaler")?;
    std::fs::write(dir.join(SCALER_FILE_NAME), scaler_json)
        .context("Failed to write scaler file")?;

    // Metadata goes last and marks the bundle complete
    let metadata = BundleMetadata::for_model(model);
    let metadata_json =
        serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    std::fs::write(&metadata_path, metadata_json)
        .context("Failed to write metadata file")?;

    Ok(dir)
}

/// Load a horizon's bundle after checking it matches the requested horizon,
/// lookback and feature set
pub fn load_horizon_model(
    model_dir: &Path,
    horizon: Horizon,
    backcandles: usize,
    feature_columns: &[&str],
    device: &NdArrayDevice,
) -> Result<HorizonModel> {
    let dir = bundle_dir(model_dir, horizon);

    // Load metadata first
    let metadata_json = std::fs::read_to_string(dir.join(BUNDLE_META_FILE_NAME))
        .context("Failed to read metadata file")?;
    let metadata: BundleMetadata =
        serde_json::from_str(&metadata_json).context("Failed to parse metadata")?;
    metadata.check_fingerprint(horizon, backcandles, feature_columns)?;

    let scaler_json =
        std::fs::read_to_string(dir.join(SCALER_FILE_NAME)).context("Failed to read scaler file")?;
    let scaler: ScalerState =
        serde_json::from_str(&scaler_json).context("Failed to parse scaler")?;
    if scaler.n_features() != feature_columns.len() {
        return Err(ForecastError::FeatureMismatch {
            expected: feature_columns.len(),
            actual: scaler.n_features(),
        }
        .into());
    }

    // Rebuild the network from metadata before loading its weights
    let classifier = metadata
        .network
        .init(device)
        .load_file::<BinFileRecorder<FullPrecisionSettings>, _>(
            dir.join(CLASSIFIER_FILE_NAME),
            &Default::default(),
            device,
        )
        .context("Failed to load classifier")?;

    Ok(HorizonModel {
        horizon,
        classifier,
        network: metadata.network,
        scaler,
        threshold: metadata.threshold,
        backcandles,
        feature_columns: metadata.feature_columns,
    })
}
