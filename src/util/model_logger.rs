use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::direction::TrainedClassifier;
use crate::types::Horizon;

/// Record of one horizon's training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExperiment {
    pub timestamp: String,
    pub symbol: String,
    pub horizon: Horizon,
    pub backcandles: usize,
    pub hidden_sizes: [usize; 2],
    pub dense_sizes: [usize; 2],
    pub dropout: f64,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub train_windows: usize,
    pub validation_windows: usize,
    pub test_windows: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_validation_loss: f64,
    pub stopped_early: bool,
    pub threshold: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub roc_auc: Option<f64>,
    pub average_precision: Option<f64>,
    pub label_distribution: BTreeMap<u8, usize>,
    pub training_time_seconds: Option<f64>,
    pub notes: String,
}

impl TrainingExperiment {
    pub fn from_training(
        symbol: &str,
        horizon: Horizon,
        backcandles: usize,
        batch_size: usize,
        learning_rate: f64,
        trained: &TrainedClassifier,
    ) -> Self {
        let calibration = &trained.calibration;
        Self {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            symbol: symbol.to_string(),
            horizon,
            backcandles,
            hidden_sizes: [trained.network.hidden_size, trained.network.second_hidden_size],
            dense_sizes: trained.network.dense_sizes,
            dropout: trained.network.dropout_rate,
            batch_size,
            learning_rate,
            train_windows: trained.train_size,
            validation_windows: trained.validation_size,
            test_windows: trained.test_size,
            epochs_run: trained.history.epochs_run,
            best_epoch: trained.history.best_epoch,
            best_validation_loss: trained.history.best_loss,
            stopped_early: trained.history.stopped_early,
            threshold: calibration.threshold,
            f1: calibration.f1,
            accuracy: calibration.confusion.accuracy(),
            roc_auc: calibration.roc_auc,
            average_precision: calibration.average_precision,
            label_distribution: calibration.label_distribution.clone(),
            training_time_seconds: None,
            notes: String::new(),
        }
    }

    pub fn set_training_time(&mut self, seconds: f64) {
        self.training_time_seconds = Some(seconds);
    }

    pub fn add_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }

    pub fn save(&self, experiment_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(experiment_dir)?;

        let filename = format!(
            "{}_{}_k{}_experiment.json",
            self.symbol, self.horizon, self.backcandles
        );
        let file_path = experiment_dir.join(filename);

        let json = serde_json::to_string_pretty(&self)?;
        let mut file = fs::File::create(&file_path)?;
        file.write_all(json.as_bytes())?;

        Ok(file_path)
    }
}

/// Timestamped directory under `root` for this run's experiment records
pub fn create_experiment_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join(Local::now().format("%Y%m%d_%H%M%S").to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
