// Technical indicator periods
pub const RSI_PERIOD: usize = 15;
pub const EMA_FAST_PERIOD: usize = 20;
pub const EMA_MID_PERIOD: usize = 100;
pub const EMA_SLOW_PERIOD: usize = 150;

// Raw and derived column names
pub const DATE_COLUMN: &str = "date";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];
pub const INDICATOR_COLUMNS: [&str; 4] = ["rsi", "ema_fast", "ema_mid", "ema_slow"];
pub const SENTIMENT_COLUMNS: [&str; 3] = ["avg_sentiment", "avg_score", "article_count"];

/// Ordered feature set fed to the sequence classifier, one value per column per time step
pub const FEATURE_COLUMNS: [&str; 9] = [
    "high",
    "low",
    "open",
    "volume",
    "rsi",
    "ema_fast",
    "ema_mid",
    "ema_slow",
    "avg_sentiment",
];

// Windowing
pub const DEFAULT_BACKCANDLES: usize = 15; // Number of time steps to look back

// Data splitting
pub const TEST_SPLIT_RATIO: f64 = 0.2; // 20% of windows held out for calibration
pub const VALIDATION_SPLIT_RATIO: f64 = 0.1; // carved from the training windows for early stopping
pub const SPLIT_SEED: u64 = 42;

// Threshold calibration
pub const THRESHOLD_STEPS: usize = 101;

// Sentiment used when a day has no relevant news at collection time
pub const NEUTRAL_SENTIMENT: f64 = 0.0;

// Numeric close-price regressor
pub const PRICE_LOOKBACK: usize = 60;

// Artifact layout
pub const MODEL_DIR: &str = "models";
pub const CLASSIFIER_FILE_NAME: &str = "classifier";
pub const SCALER_FILE_NAME: &str = "scaler.json";
pub const BUNDLE_META_FILE_NAME: &str = "bundle.meta.json";
pub const PRICE_FILE_SUFFIX: &str = "_daily_ohlcv.csv";
