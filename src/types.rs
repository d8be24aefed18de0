//! Core record types and the forecast horizon variant

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ForecastError;

/// One trading day of OHLCV data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily aggregated news sentiment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub date: NaiveDate,
    pub avg_sentiment: f64,
    pub avg_score: f64,
    pub article_count: f64,
}

/// Forecast horizon, each carrying its own row offset and labelling rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Daily,
    Weekly,
    Monthly,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Daily, Horizon::Weekly, Horizon::Monthly];

    /// Number of rows the label looks ahead
    pub fn rows(self) -> usize {
        match self {
            Horizon::Daily => 1,
            Horizon::Weekly => 5,
            Horizon::Monthly => 20,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Horizon::Daily => "daily",
            Horizon::Weekly => "weekly",
            Horizon::Monthly => "monthly",
        }
    }

    /// Name of the label column produced for this horizon
    pub fn label_column(self) -> &'static str {
        match self {
            Horizon::Daily => "target_class",
            Horizon::Weekly => "target_week_class",
            Horizon::Monthly => "target_month_class",
        }
    }

    /// Name of this horizon's column in the merged report
    pub fn prediction_column(self) -> &'static str {
        match self {
            Horizon::Daily => "daily_direction_prediction",
            Horizon::Weekly => "weekly_direction_prediction",
            Horizon::Monthly => "monthly_direction_prediction",
        }
    }

    /// Direction label for row `t`, or `None` when the look-ahead row does not exist.
    ///
    /// Daily labels compare the next session's close against its own open.
    /// Weekly and monthly labels compare the close `rows()` sessions ahead
    /// against today's close.
    pub fn label_at(self, opens: &[f64], closes: &[f64], t: usize) -> Option<u8> {
        let ahead = t + self.rows();
        if ahead >= closes.len() {
            return None;
        }
        let delta = match self {
            Horizon::Daily => closes[ahead] - opens[ahead],
            Horizon::Weekly | Horizon::Monthly => closes[ahead] - closes[t],
        };
        Some(u8::from(delta > 0.0))
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Horizon {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Horizon::Daily),
            "weekly" => Ok(Horizon::Weekly),
            "monthly" => Ok(Horizon::Monthly),
            other => Err(ForecastError::Config(format!(
                "invalid target_type '{}', use 'daily', 'weekly' or 'monthly'",
                other
            ))),
        }
    }
}

/// Thresholded classifier output for one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub probability: f64,
    pub direction: u8,
}
