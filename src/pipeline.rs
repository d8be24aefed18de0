//! End-to-end run: per-horizon training or loading, walk-forward inference,
//! report assembly and the optional fusion stage

// External crates
use anyhow::{Context, Result};
use burn_ndarray::NdArrayDevice;
use chrono::NaiveDate;
use log::{info, warn};
use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// Internal imports
use crate::constants::{DEFAULT_BACKCANDLES, FEATURE_COLUMNS, MODEL_DIR};
use crate::direction::step_1_tensor_preparation::prepare_dataset;
use crate::direction::step_4_train_model::train_direction_classifier;
use crate::direction::step_6_model_serialization::{
    bundle_exists, load_horizon_model, save_horizon_model,
};
use crate::direction::{predict_direction, DatedPrediction, HorizonModel, TrainingConfig};
use crate::error::ForecastError;
use crate::fusion::{build_fusion_training_data, collect_sentiment_series, CsvSentimentSource, FusionModel};
use crate::numeric::{generate_price_predictions, train_close_regressor, CloseRegressorConfig};
use crate::report::build_report;
use crate::types::{Horizon, PriceRecord, SentimentRecord};
use crate::util::feature_engineering::engineer_features_for;
use crate::util::file_utils::{read_sentiment_file, write_csv, CsvMarketData, MarketDataSource};
use crate::util::model_logger::{create_experiment_dir, TrainingExperiment};
use crate::util::pre_processor::join_sentiment;

const MAX_BACKOFF_MS: u64 = 10_000;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Fusion stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub enabled: bool,
    /// First business day the fusion model is fitted on; the close
    /// regressor trains on the history before it
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub regressor: CloseRegressorConfig,
    pub model_path: PathBuf,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: date(2025, 3, 10),
            end: date(2025, 5, 31),
            regressor: CloseRegressorConfig::default(),
            model_path: PathBuf::from(MODEL_DIR).join("fusion_model.json"),
        }
    }
}

/// Settings for one pipeline run, loadable from a JSON file where every
/// field is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbol: String,
    /// Directory holding `{symbol}_daily_ohlcv.csv`
    pub data_dir: PathBuf,
    pub sentiment_path: PathBuf,
    pub model_dir: PathBuf,
    pub experiment_dir: PathBuf,
    /// Defaults to `prediction_summary_{report_start}_to_{report_end}.csv`
    pub output_path: Option<PathBuf>,
    pub history_start: NaiveDate,
    pub history_end: NaiveDate,
    /// Rows dated before this day are removed before windowing, so the first
    /// training label lies `backcandles` rows after it
    pub training_start: Option<NaiveDate>,
    pub report_start: NaiveDate,
    pub report_end: NaiveDate,
    pub backcandles: usize,
    /// Ignore persisted bundles and train every horizon again
    pub retrain: bool,
    /// Train the horizons on a rayon pool. Weight initialisation then draws
    /// from the backend's shared generator in thread order, so runs are not
    /// reproducible.
    pub parallel_horizons: bool,
    pub fetch_attempts: usize,
    pub retry_delay_ms: u64,
    pub training: TrainingConfig,
    pub fusion: Option<FusionConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbol: "NDX".to_string(),
            data_dir: PathBuf::from("data"),
            sentiment_path: PathBuf::from("data/cleaned_scores.csv"),
            model_dir: PathBuf::from(MODEL_DIR),
            experiment_dir: PathBuf::from("experiments"),
            output_path: None,
            history_start: date(2024, 9, 30),
            history_end: date(2025, 6, 2),
            training_start: Some(date(2025, 1, 1)),
            report_start: date(2025, 1, 1),
            report_end: date(2025, 6, 1),
            backcandles: DEFAULT_BACKCANDLES,
            retrain: false,
            parallel_horizons: false,
            fetch_attempts: 3,
            retry_delay_ms: 500,
            training: TrainingConfig::default(),
            fusion: None,
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON configuration, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&json).context("Failed to parse config")?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ForecastError> {
        if self.backcandles == 0 {
            return Err(ForecastError::Config("backcandles must be at least 1".into()));
        }
        if self.fetch_attempts == 0 {
            return Err(ForecastError::Config("fetch_attempts must be at least 1".into()));
        }
        if self.history_start > self.history_end {
            return Err(ForecastError::Config(format!(
                "history range {} .. {} is empty",
                self.history_start, self.history_end
            )));
        }
        if self.report_start > self.report_end {
            return Err(ForecastError::Config(format!(
                "report range {} .. {} is empty",
                self.report_start, self.report_end
            )));
        }
        if let Some(fusion) = &self.fusion {
            if fusion.start > fusion.end {
                return Err(ForecastError::Config(format!(
                    "fusion range {} .. {} is empty",
                    fusion.start, fusion.end
                )));
            }
        }
        self.training.validate()
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "prediction_summary_{}_to_{}.csv",
                self.report_start, self.report_end
            ))
        })
    }
}

/// Delay before retry `attempt` (1-based), doubling up to a cap
pub fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let capped_attempt = attempt.saturating_sub(1).min(16);
    base_ms
        .saturating_mul(1u64 << capped_attempt)
        .min(MAX_BACKOFF_MS)
}

/// Fetches price history, retrying failed attempts with exponential backoff.
/// Configuration errors and malformed data are not retried.
pub fn fetch_price_history<S: MarketDataSource + ?Sized>(
    source: &S,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    attempts: usize,
    retry_delay_ms: u64,
) -> std::result::Result<Vec<PriceRecord>, ForecastError> {
    let mut attempt = 1;
    loop {
        match source.get_price_history(symbol, start, end) {
            Ok(records) => return Ok(records),
            Err(e @ (ForecastError::Config(_) | ForecastError::DataJoin(_))) => return Err(e),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay_ms(retry_delay_ms, attempt as u32);
                warn!(
                    "Fetching {} failed (attempt {}/{}), retrying in {} ms: {}",
                    symbol, attempt, attempts, delay, e
                );
                std::thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
        }
    }
}

/// Trained or loaded model of one horizon with its walk-forward predictions
#[derive(Debug)]
pub struct HorizonOutcome {
    pub horizon: Horizon,
    pub model: HorizonModel,
    /// Joined feature frame over every row, used for inference
    pub inference_frame: DataFrame,
    pub predictions: Vec<DatedPrediction>,
    pub trained: bool,
}

fn train_horizon_model(
    config: &PipelineConfig,
    horizon: Horizon,
    labeled: &DataFrame,
    experiment_dir: Option<&Path>,
    device: &NdArrayDevice,
) -> Result<HorizonModel> {
    let data = prepare_dataset(
        labeled,
        horizon.label_column(),
        config.backcandles,
        &FEATURE_COLUMNS,
        config.training_start,
    )
    .with_context(|| format!("Failed to build {} training windows", horizon))?;
    info!(
        "{} horizon: {} windows of shape ({}, {})",
        horizon,
        data.len(),
        config.backcandles,
        FEATURE_COLUMNS.len()
    );

    let started = Instant::now();
    let trained = train_direction_classifier(&data, &config.training, device)
        .with_context(|| format!("Failed to train the {} classifier", horizon))?;

    if let Some(dir) = experiment_dir {
        let mut experiment = TrainingExperiment::from_training(
            &config.symbol,
            horizon,
            config.backcandles,
            config.training.batch_size,
            config.training.learning_rate,
            &trained,
        );
        experiment.set_training_time(started.elapsed().as_secs_f64());
        if let (Some(first), Some(last)) = (data.dates.first(), data.dates.last()) {
            experiment.add_note(&format!("label dates {} .. {}", first, last));
        }
        match experiment.save(dir) {
            Ok(path) => info!("Saved {} experiment record to {}", horizon, path.display()),
            Err(e) => warn!("Could not save {} experiment record: {}", horizon, e),
        }
    }

    let model = HorizonModel::from_trained(horizon, trained, config.backcandles, &FEATURE_COLUMNS);
    let dir = save_horizon_model(&model, &config.model_dir)
        .with_context(|| format!("Failed to persist the {} bundle", horizon))?;
    info!("Saved {} bundle to {}", horizon, dir.display());
    Ok(model)
}

/// Engineers, joins, trains or loads, and predicts one horizon
pub fn run_horizon(
    config: &PipelineConfig,
    horizon: Horizon,
    prices: &[PriceRecord],
    sentiment: &[SentimentRecord],
    experiment_dir: Option<&Path>,
    device: &NdArrayDevice,
) -> Result<HorizonOutcome> {
    let features = engineer_features_for(prices, horizon)
        .with_context(|| format!("Feature engineering failed for {}", horizon))?;
    let labeled = join_sentiment(&features.frame, sentiment)?;
    let inference_frame = join_sentiment(&features.inference_frame, sentiment)?;

    let loaded = if !config.retrain && bundle_exists(&config.model_dir, horizon) {
        match load_horizon_model(
            &config.model_dir,
            horizon,
            config.backcandles,
            &FEATURE_COLUMNS,
            device,
        ) {
            Ok(model) => {
                info!("Loaded {} bundle with threshold {:.2}", horizon, model.threshold);
                Some(model)
            }
            Err(e) => {
                warn!("Retraining {}: persisted bundle unusable: {:#}", horizon, e);
                None
            }
        }
    } else {
        None
    };

    let trained = loaded.is_none();
    let model = match loaded {
        Some(model) => model,
        None => train_horizon_model(config, horizon, &labeled, experiment_dir, device)?,
    };

    let predictions = predict_direction(&model, &inference_frame, device)?;

    Ok(HorizonOutcome {
        horizon,
        model,
        inference_frame,
        predictions,
        trained,
    })
}

/// Fits the fusion model over `[fusion.start, fusion.end]` and saves it
pub fn run_fusion(
    fusion: &FusionConfig,
    prices: &[PriceRecord],
    sentiment: &[SentimentRecord],
    device: &NdArrayDevice,
) -> Result<FusionModel> {
    let history: Vec<PriceRecord> = prices
        .iter()
        .copied()
        .filter(|p| p.date < fusion.start)
        .collect();
    let predictor = train_close_regressor(&history, &fusion.regressor, device)
        .context("Failed to train the close regressor")?
        .with_history(prices)?;

    let predictions = generate_price_predictions(&predictor, fusion.start, fusion.end);
    let sentiment_series =
        collect_sentiment_series(&CsvSentimentSource::new(sentiment), fusion.start, fusion.end);
    let true_prices: Vec<(NaiveDate, f64)> = prices
        .iter()
        .filter(|p| p.date >= fusion.start && p.date <= fusion.end)
        .map(|p| (p.date, p.close))
        .collect();

    let data = build_fusion_training_data(&true_prices, &predictions, &sentiment_series)
        .context("Failed to build fusion training data")?;
    let model = FusionModel::fit(&data.predictions, &data.sentiments, &data.true_prices)?;
    info!(
        "Fusion model: price = {:.4} + {:.6} * prediction + {:.4} * sentiment (R2 {})",
        model.intercept,
        model.prediction_weight,
        model.sentiment_weight,
        model
            .r_squared
            .map_or_else(|| "n/a".to_string(), |r| format!("{:.4}", r))
    );

    if let (Some(p), Some(s)) = (data.predictions.last(), data.sentiments.last()) {
        info!("Fused estimate for the last training day: {:.2}", model.predict(*p, *s));
    }

    model.save(&fusion.model_path)?;
    Ok(model)
}

/// Runs every horizon and writes the merged report; returns the report path
pub fn run(config: &PipelineConfig) -> Result<PathBuf> {
    config.validate()?;
    let device = NdArrayDevice::Cpu;

    let source = CsvMarketData::new(&config.data_dir);
    let prices = fetch_price_history(
        &source,
        &config.symbol,
        config.history_start,
        config.history_end,
        config.fetch_attempts,
        config.retry_delay_ms,
    )
    .with_context(|| format!("Failed to load price history for {}", config.symbol))?;
    info!("Loaded {} sessions of {}", prices.len(), config.symbol);

    let sentiment = read_sentiment_file(&config.sentiment_path).with_context(|| {
        format!("Failed to read sentiment from {}", config.sentiment_path.display())
    })?;
    info!("Loaded {} daily sentiment records", sentiment.len());

    let experiment_dir = match create_experiment_dir(&config.experiment_dir) {
        Ok(dir) => Some(dir),
        Err(e) => {
            warn!("Experiment records disabled: {}", e);
            None
        }
    };

    let run_one = |horizon: Horizon| {
        run_horizon(
            config,
            horizon,
            &prices,
            &sentiment,
            experiment_dir.as_deref(),
            &device,
        )
    };
    if config.parallel_horizons {
        warn!("Training horizons in parallel; weight initialisation is not reproducible");
    }
    let outcomes: Vec<HorizonOutcome> = if config.parallel_horizons {
        Horizon::ALL
            .par_iter()
            .map(|h| run_one(*h))
            .collect::<Result<Vec<_>>>()?
    } else {
        Horizon::ALL
            .iter()
            .map(|h| run_one(*h))
            .collect::<Result<Vec<_>>>()?
    };

    let mut daily_frame = None;
    let mut predictions = BTreeMap::new();
    for outcome in outcomes {
        info!(
            "{}: {} predictions ({})",
            outcome.horizon,
            outcome.predictions.len(),
            if outcome.trained { "trained" } else { "loaded" }
        );
        if outcome.horizon == Horizon::Daily {
            daily_frame = Some(outcome.inference_frame);
        }
        predictions.insert(outcome.horizon, outcome.predictions);
    }
    let daily_frame = daily_frame.context("Daily horizon produced no frame")?;

    let mut report = build_report(
        &daily_frame,
        &predictions,
        &sentiment,
        Some(config.report_start),
        Some(config.report_end),
    )?;
    let output_path = config.output_path();
    write_csv(&mut report, &output_path)?;
    info!(
        "Saved prediction summary with {} rows to {}",
        report.height(),
        output_path.display()
    );

    if let Some(fusion) = config.fusion.as_ref().filter(|f| f.enabled) {
        if let Err(e) = run_fusion(fusion, &prices, &sentiment, &device) {
            warn!("Fusion stage skipped: {:#}", e);
        }
    }

    Ok(output_path)
}
