// External imports
use chrono::{Datelike, Duration, NaiveDate, Weekday};

use polars::prelude::DataFrame;

// Internal imports
use crate::direction::TrainingConfig;
use crate::types::{Horizon, PriceRecord, SentimentRecord};
use crate::util::feature_engineering::engineer_features_for;
use crate::util::pre_processor::join_sentiment;

/// First business day of the synthetic series
pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
}

/// `n` consecutive business days starting at `start`
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(n);
    let mut current = start;
    while days.len() < n {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// Deterministic OHLCV series with a gentle trend and overlapping cycles so
/// that both label classes occur at every horizon
pub fn synthetic_prices(n: usize) -> Vec<PriceRecord> {
    business_days(base_date(), n)
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let t = i as f64;
            let close = 18_000.0 + 4.0 * t + 120.0 * (t * 0.45).sin() + 60.0 * (t * 0.13).cos();
            let open = close - 25.0 * (t * 0.9).sin();
            let high = close.max(open) + 15.0 + 5.0 * (t * 0.3).cos().abs();
            let low = close.min(open) - 15.0 - 5.0 * (t * 0.7).sin().abs();
            let volume = 4.0e9 + 5.0e8 * (t * 0.21).sin();
            PriceRecord {
                date,
                open,
                high,
                low,
                close,
                volume,
            }
        })
        .collect()
}

/// One sentiment record per calendar day from `start` for `days` days,
/// skipping every fifth day to leave gaps for forward filling
pub fn synthetic_sentiment(start: NaiveDate, days: usize) -> Vec<SentimentRecord> {
    (0..days)
        .filter(|i| i % 5 != 4)
        .map(|i| {
            let t = i as f64;
            SentimentRecord {
                date: start + Duration::days(i as i64),
                avg_sentiment: (t * 0.37).sin() * 0.6,
                avg_score: 0.5 + (t * 0.19).cos() * 0.3,
                article_count: (3 + i % 7) as f64,
            }
        })
        .collect()
}

/// Labeled and inference frames for `n` synthetic sessions, joined with
/// sentiment that starts before the first price so no row is left null
pub fn synthetic_joined_features(n: usize, horizon: Horizon) -> (DataFrame, DataFrame) {
    let sentiment = synthetic_sentiment(base_date() - Duration::days(3), n * 2);
    let features = engineer_features_for(&synthetic_prices(n), horizon).unwrap();
    (
        join_sentiment(&features.frame, &sentiment).unwrap(),
        join_sentiment(&features.inference_frame, &sentiment).unwrap(),
    )
}

/// Small network and few epochs so training tests stay fast
pub fn tiny_training_config() -> TrainingConfig {
    TrainingConfig {
        epochs: 3,
        batch_size: 16,
        patience: 2,
        hidden_sizes: [8, 6],
        dense_sizes: [8, 4],
        ..TrainingConfig::default()
    }
}
