//! Merges per-horizon prediction series into the dated report table

// External crates
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;

// Internal imports
use crate::constants::DATE_COLUMN;
use crate::direction::DatedPrediction;
use crate::error::{ForecastError, Result};
use crate::types::{Horizon, SentimentRecord};
use crate::util::pre_processor::{dedup_sentiment, filter_date_range, format_date};

pub const GROUND_TRUTH_COLUMN: &str = "daily_sentiment_direction";
const REPORT_SENTIMENT_COLUMNS: [&str; 2] = ["article_count", "avg_score"];

/// Two-column frame of `date` and the horizon's thresholded direction;
/// dates without a prediction hold null
pub fn predictions_frame(horizon: Horizon, predictions: &[DatedPrediction]) -> Result<DataFrame> {
    let dates: Vec<String> = predictions.iter().map(|p| format_date(p.date)).collect();
    let directions: Vec<Option<i32>> = predictions
        .iter()
        .map(|p| p.prediction().map(|pred| i32::from(pred.direction)))
        .collect();
    Ok(DataFrame::new(vec![
        Series::new(DATE_COLUMN.into(), dates).into(),
        Series::new(horizon.prediction_column().into(), directions).into(),
    ])?)
}

/// Article count and score straight from the sentiment file, without filling
fn raw_sentiment_frame(records: &[SentimentRecord]) -> Result<DataFrame> {
    let records = dedup_sentiment(records);
    Ok(DataFrame::new(vec![
        Series::new(
            DATE_COLUMN.into(),
            records.iter().map(|r| format_date(r.date)).collect::<Vec<String>>(),
        )
        .into(),
        Series::new(
            REPORT_SENTIMENT_COLUMNS[0].into(),
            records.iter().map(|r| r.article_count).collect::<Vec<f64>>(),
        )
        .into(),
        Series::new(
            REPORT_SENTIMENT_COLUMNS[1].into(),
            records.iter().map(|r| r.avg_score).collect::<Vec<f64>>(),
        )
        .into(),
    ])?)
}

/// Builds one row per date of the daily frame inside `[start, end]` with the
/// daily ground truth, every horizon's prediction and the raw sentiment
/// counts of that date.
pub fn build_report(
    daily_frame: &DataFrame,
    predictions: &BTreeMap<Horizon, Vec<DatedPrediction>>,
    raw_sentiment: &[SentimentRecord],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DataFrame> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ForecastError::Config(format!(
                "report range starts at {} after it ends at {}",
                s, e
            )));
        }
    }

    let base = filter_date_range(daily_frame, start, end)?;
    let mut report = base
        .lazy()
        .select([
            col(DATE_COLUMN),
            col(Horizon::Daily.label_column()).alias(GROUND_TRUTH_COLUMN),
        ])
        .collect()?;

    for horizon in Horizon::ALL {
        report = match predictions.get(&horizon) {
            Some(series) => report
                .lazy()
                .join(
                    predictions_frame(horizon, series)?.lazy(),
                    [col(DATE_COLUMN)],
                    [col(DATE_COLUMN)],
                    JoinArgs::new(JoinType::Left),
                )
                .collect()?,
            None => {
                let height = report.height();
                let mut report = report;
                report.with_column(Series::full_null(
                    horizon.prediction_column().into(),
                    height,
                    &DataType::Int32,
                ))?;
                report
            }
        };
    }

    let report = report
        .lazy()
        .join(
            raw_sentiment_frame(raw_sentiment)?.lazy(),
            [col(DATE_COLUMN)],
            [col(DATE_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .select([
            col(DATE_COLUMN),
            col(GROUND_TRUTH_COLUMN),
            col(Horizon::Daily.prediction_column()),
            col(Horizon::Weekly.prediction_column()),
            col(Horizon::Monthly.prediction_column()),
            col(REPORT_SENTIMENT_COLUMNS[0]),
            col(REPORT_SENTIMENT_COLUMNS[1]),
        ])
        .sort([DATE_COLUMN], SortMultipleOptions::default())
        .collect()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prediction;
    use crate::util::pre_processor::{column_dates, column_f64};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn daily_frame(days: &[u32]) -> DataFrame {
        DataFrame::new(vec![
            Series::new(
                DATE_COLUMN.into(),
                days.iter().map(|d| format_date(day(*d))).collect::<Vec<_>>(),
            )
            .into(),
            Series::new(
                "target_class".into(),
                days.iter().map(|d| Some((d % 2) as i32)).collect::<Vec<_>>(),
            )
            .into(),
            Series::new("avg_sentiment".into(), vec![0.5; days.len()]).into(),
        ])
        .unwrap()
    }

    fn series(days: &[u32], direction: u8) -> Vec<DatedPrediction> {
        days.iter()
            .map(|d| DatedPrediction {
                date: day(*d),
                outcome: if *d == 7 {
                    Err(ForecastError::InsufficientHistory {
                        needed: 15,
                        available: 14,
                    })
                } else {
                    Ok(Prediction {
                        probability: 0.6,
                        direction,
                    })
                },
            })
            .collect()
    }

    #[test]
    fn test_report_merges_horizons_within_range() {
        let frame = daily_frame(&[2, 3, 6, 7, 8, 9]);
        let mut predictions = BTreeMap::new();
        predictions.insert(Horizon::Daily, series(&[3, 6, 7, 8, 9], 1));
        predictions.insert(Horizon::Weekly, series(&[6, 7, 8], 0));
        predictions.insert(Horizon::Monthly, series(&[9], 1));
        let sentiment = vec![SentimentRecord {
            date: day(6),
            avg_sentiment: 0.1,
            avg_score: 0.7,
            article_count: 12.0,
        }];

        let report =
            build_report(&frame, &predictions, &sentiment, Some(day(3)), Some(day(8))).unwrap();

        let names: Vec<String> = report.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "date",
                "daily_sentiment_direction",
                "daily_direction_prediction",
                "weekly_direction_prediction",
                "monthly_direction_prediction",
                "article_count",
                "avg_score",
            ]
        );
        assert_eq!(column_dates(&report).unwrap(), vec![day(3), day(6), day(7), day(8)]);

        let daily = column_f64(&report, "daily_direction_prediction").unwrap();
        assert_eq!(daily, vec![Some(1.0), Some(1.0), None, Some(1.0)]);
        let weekly = column_f64(&report, "weekly_direction_prediction").unwrap();
        assert_eq!(weekly, vec![None, Some(0.0), None, Some(0.0)]);
        let monthly = column_f64(&report, "monthly_direction_prediction").unwrap();
        assert!(monthly.iter().all(Option::is_none));

        // Raw sentiment is not forward filled
        let counts = column_f64(&report, "article_count").unwrap();
        assert_eq!(counts, vec![None, Some(12.0), None, None]);
    }

    #[test]
    fn test_inverted_range_is_config_error() {
        let frame = daily_frame(&[2, 3]);
        let err = build_report(&frame, &BTreeMap::new(), &[], Some(day(3)), Some(day(2)))
            .unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn test_missing_horizon_yields_null_column() {
        let frame = daily_frame(&[2, 3]);
        let report = build_report(&frame, &BTreeMap::new(), &[], None, None).unwrap();
        assert_eq!(report.height(), 2);
        let weekly = column_f64(&report, "weekly_direction_prediction").unwrap();
        assert_eq!(weekly, vec![None, None]);
    }
}
