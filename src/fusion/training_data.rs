// External crates
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use polars::prelude::*;
use std::collections::BTreeMap;

// Internal imports
use crate::constants::{DATE_COLUMN, NEUTRAL_SENTIMENT};
use crate::error::{ForecastError, Result};
use crate::types::SentimentRecord;
use crate::util::pre_processor::{column_dates, column_f64, format_date};

const TRUE_PRICE_COLUMN: &str = "true_price";
const PREDICTION_COLUMN: &str = "lstm_pred";
const SENTIMENT_SCORE_COLUMN: &str = "sentiment_score";

/// Source of one mean sentiment score per calendar day
pub trait NewsSentimentSource {
    /// Mean sentiment of the day's relevant news, `None` when there was none
    fn daily_sentiment(&self, date: NaiveDate) -> Result<Option<f64>>;
}

/// Sentiment source backed by the daily aggregated sentiment file
#[derive(Debug, Clone, Default)]
pub struct CsvSentimentSource {
    by_date: BTreeMap<NaiveDate, f64>,
}

impl CsvSentimentSource {
    pub fn new(records: &[SentimentRecord]) -> Self {
        Self {
            by_date: records.iter().map(|r| (r.date, r.avg_sentiment)).collect(),
        }
    }
}

impl NewsSentimentSource for CsvSentimentSource {
    fn daily_sentiment(&self, date: NaiveDate) -> Result<Option<f64>> {
        Ok(self.by_date.get(&date).copied().filter(|v| v.is_finite()))
    }
}

/// One sentiment score per calendar day in `[start, end]`. Days without news,
/// and days whose lookup fails, score `NEUTRAL_SENTIMENT`.
pub fn collect_sentiment_series<S: NewsSentimentSource + ?Sized>(
    source: &S,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(NaiveDate, f64)> {
    let mut series = Vec::new();
    let mut current = start;
    while current <= end {
        let score = match source.daily_sentiment(current) {
            Ok(Some(score)) => score,
            Ok(None) => NEUTRAL_SENTIMENT,
            Err(e) => {
                warn!("Sentiment lookup failed for {}, using neutral: {}", current, e);
                NEUTRAL_SENTIMENT
            }
        };
        series.push((current, score));
        current += Duration::days(1);
    }
    series
}

/// Aligned inputs for fitting the fusion model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionTrainingData {
    pub dates: Vec<NaiveDate>,
    pub predictions: Vec<f64>,
    pub sentiments: Vec<f64>,
    pub true_prices: Vec<f64>,
}

impl FusionTrainingData {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

fn dated_frame(name: &str, rows: &[(NaiveDate, Option<f64>)]) -> Result<DataFrame> {
    let dates: Vec<String> = rows.iter().map(|(d, _)| format_date(*d)).collect();
    let values: Vec<Option<f64>> = rows.iter().map(|(_, v)| *v).collect();
    Ok(DataFrame::new(vec![
        Series::new(DATE_COLUMN.into(), dates).into(),
        Series::new(name.into(), values).into(),
    ])?)
}

/// Joins true prices, numeric predictions and sentiment by date.
///
/// Prices and predictions are inner-joined, sentiment is left-joined onto
/// the result, and any row with a missing or non-finite field is dropped.
pub fn build_fusion_training_data(
    true_prices: &[(NaiveDate, f64)],
    predictions: &[(NaiveDate, Option<f64>)],
    sentiment: &[(NaiveDate, f64)],
) -> Result<FusionTrainingData> {
    let prices_df = dated_frame(
        TRUE_PRICE_COLUMN,
        &true_prices.iter().map(|(d, v)| (*d, Some(*v))).collect::<Vec<_>>(),
    )?;
    let predictions_df = dated_frame(PREDICTION_COLUMN, predictions)?;
    let sentiment_df = dated_frame(
        SENTIMENT_SCORE_COLUMN,
        &sentiment.iter().map(|(d, v)| (*d, Some(*v))).collect::<Vec<_>>(),
    )?;

    let joined = prices_df
        .lazy()
        .join(
            predictions_df.lazy(),
            [col(DATE_COLUMN)],
            [col(DATE_COLUMN)],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            sentiment_df.lazy(),
            [col(DATE_COLUMN)],
            [col(DATE_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([DATE_COLUMN], SortMultipleOptions::default())
        .collect()?;

    let dates = column_dates(&joined)?;
    let prices = column_f64(&joined, TRUE_PRICE_COLUMN)?;
    let preds = column_f64(&joined, PREDICTION_COLUMN)?;
    let scores = column_f64(&joined, SENTIMENT_SCORE_COLUMN)?;

    let mut data = FusionTrainingData::default();
    for i in 0..joined.height() {
        match (preds[i], scores[i], prices[i]) {
            (Some(p), Some(s), Some(y)) if p.is_finite() && s.is_finite() && y.is_finite() => {
                data.dates.push(dates[i]);
                data.predictions.push(p);
                data.sentiments.push(s);
                data.true_prices.push(y);
            }
            _ => debug!("Dropping incomplete fusion row for {}", dates[i]),
        }
    }

    info!(
        "Fusion training data: {} of {} joined rows usable",
        data.len(),
        joined.height()
    );
    if data.is_empty() {
        return Err(ForecastError::InsufficientHistory {
            needed: 1,
            available: 0,
        });
    }

    Ok(data)
}
