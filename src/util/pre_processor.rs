// External crates
use chrono::NaiveDate;
use log::debug;
use polars::prelude::*;
use std::collections::BTreeMap;

// Local modules
use crate::constants::{DATE_COLUMN, DATE_FORMAT, SENTIMENT_COLUMNS};
use crate::error::{ForecastError, Result};
use crate::types::SentimentRecord;

/// How leading or interior gaps in a column are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStrategy {
    /// Carry the most recent prior value forward
    Forward,
    /// Copy the next valid value backward
    Backward,
}

/// Fills missing values with the given strategy. Values that have no
/// source to copy from (leading gaps for `Forward`, trailing for `Backward`)
/// stay missing.
pub fn impute(values: &[Option<f64>], strategy: FillStrategy) -> Vec<Option<f64>> {
    match strategy {
        FillStrategy::Forward => {
            let mut result = Vec::with_capacity(values.len());
            let mut last_valid = None;

            for val in values {
                if val.is_some() {
                    last_valid = *val;
                }
                result.push(last_valid);
            }

            result
        }
        FillStrategy::Backward => {
            let mut result = vec![None; values.len()];
            let mut last_valid = None;

            for (i, val) in values.iter().enumerate().rev() {
                if val.is_some() {
                    last_valid = *val;
                }
                result[i] = last_valid;
            }

            result
        }
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses an ISO date, ignoring any trailing time component
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, DATE_FORMAT)
        .map_err(|e| ForecastError::DataJoin(format!("unparseable date '{}': {}", value, e)))
}

/// True when the frame has a column with exactly this name
pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|n| n.as_str() == name)
}

/// Extracts a numeric column as nullable f64 values
pub fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    let values = column.f64()?.into_iter().collect();
    Ok(values)
}

/// Extracts the date column; every row must carry a parseable date
pub fn column_dates(df: &DataFrame) -> Result<Vec<NaiveDate>> {
    let column = df.column(DATE_COLUMN)?.cast(&DataType::String)?;
    column
        .str()?
        .into_iter()
        .map(|value| match value {
            Some(s) => parse_date(s),
            None => Err(ForecastError::DataJoin("row without a date".into())),
        })
        .collect()
}

/// Keeps rows whose date lies in the inclusive range; open bounds are unrestricted
pub fn filter_date_range(
    df: &DataFrame,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<DataFrame> {
    let dates = column_dates(df)?;
    let mask: BooleanChunked = dates
        .iter()
        .map(|d| start.map_or(true, |s| *d >= s) && end.map_or(true, |e| *d <= e))
        .collect();
    Ok(df.filter(&mask)?)
}

/// Drops rows holding a null in any of `columns`
pub fn drop_incomplete_rows(df: &DataFrame, columns: &[&str]) -> Result<DataFrame> {
    let mut complete = vec![true; df.height()];
    for &name in columns {
        for (i, value) in column_f64(df, name)?.into_iter().enumerate() {
            if value.map_or(true, |v| !v.is_finite()) {
                complete[i] = false;
            }
        }
    }

    let dropped = complete.iter().filter(|keep| !**keep).count();
    if dropped > 0 {
        debug!("Dropping {} rows with unresolved nulls", dropped);
    }

    let mask: BooleanChunked = complete.into_iter().collect();
    Ok(df.filter(&mask)?)
}

/// Orders sentiment by date and keeps the last record seen for any repeated date
pub fn dedup_sentiment(records: &[SentimentRecord]) -> Vec<SentimentRecord> {
    let by_date: BTreeMap<NaiveDate, SentimentRecord> =
        records.iter().map(|r| (r.date, *r)).collect();
    by_date.into_values().collect()
}

/// Builds a date-keyed frame from sentiment records
pub fn sentiment_frame(records: &[SentimentRecord]) -> Result<DataFrame> {
    let dates: Vec<String> = records.iter().map(|r| format_date(r.date)).collect();
    let avg_sentiment: Vec<f64> = records.iter().map(|r| r.avg_sentiment).collect();
    let avg_score: Vec<f64> = records.iter().map(|r| r.avg_score).collect();
    let article_count: Vec<f64> = records.iter().map(|r| r.article_count).collect();

    let df = DataFrame::new(vec![
        Series::new(DATE_COLUMN.into(), dates).into(),
        Series::new(SENTIMENT_COLUMNS[0].into(), avg_sentiment).into(),
        Series::new(SENTIMENT_COLUMNS[1].into(), avg_score).into(),
        Series::new(SENTIMENT_COLUMNS[2].into(), article_count).into(),
    ])?;
    Ok(df)
}

/// Left-joins daily sentiment onto a feature frame by date and forward-fills
/// the sentiment columns.
///
/// Rows dated before the first sentiment record keep nulls; the windower
/// drops them.
pub fn join_sentiment(features: &DataFrame, sentiment: &[SentimentRecord]) -> Result<DataFrame> {
    let sentiment_df = sentiment_frame(&dedup_sentiment(sentiment))?;

    // A frame that was joined before must not carry stale sentiment columns
    let mut base = features.clone();
    for name in SENTIMENT_COLUMNS {
        if has_column(&base, name) {
            base = base.drop(name)?;
        }
    }

    let joined = base
        .lazy()
        .join(
            sentiment_df.lazy(),
            [col(DATE_COLUMN)],
            [col(DATE_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    if joined.height() != features.height() {
        return Err(ForecastError::DataJoin(format!(
            "sentiment join changed row count from {} to {}",
            features.height(),
            joined.height()
        )));
    }

    let mut joined = joined.sort(vec![DATE_COLUMN], SortMultipleOptions::default())?;

    for name in SENTIMENT_COLUMNS {
        let filled = impute(&column_f64(&joined, name)?, FillStrategy::Forward);
        joined.replace(name, Series::new(name.into(), filled))?;
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn price_frame(days: &[u32]) -> DataFrame {
        let dates: Vec<String> = days.iter().map(|d| format_date(day(*d))).collect();
        let closes: Vec<f64> = days.iter().map(|d| 100.0 + *d as f64).collect();
        DataFrame::new(vec![
            Series::new(DATE_COLUMN.into(), dates).into(),
            Series::new("close".into(), closes).into(),
        ])
        .unwrap()
    }

    fn sentiment(d: u32, value: f64) -> SentimentRecord {
        SentimentRecord {
            date: day(d),
            avg_sentiment: value,
            avg_score: value * 2.0,
            article_count: 3.0,
        }
    }

    #[test]
    fn test_impute_forward_and_backward() {
        let values = [None, Some(1.0), None, Some(3.0), None];
        assert_eq!(
            impute(&values, FillStrategy::Forward),
            vec![None, Some(1.0), Some(1.0), Some(3.0), Some(3.0)]
        );
        assert_eq!(
            impute(&values, FillStrategy::Backward),
            vec![Some(1.0), Some(1.0), Some(3.0), Some(3.0), None]
        );
    }

    #[test]
    fn test_join_sentiment_forward_fills_gaps() {
        let prices = price_frame(&[2, 3, 6, 7, 8]);
        let records = vec![sentiment(3, 0.5), sentiment(7, -0.25)];

        let joined = join_sentiment(&prices, &records).unwrap();
        assert_eq!(joined.height(), 5);

        let avg = column_f64(&joined, "avg_sentiment").unwrap();
        assert_eq!(avg, vec![None, Some(0.5), Some(0.5), Some(-0.25), Some(-0.25)]);

        let dates = column_dates(&joined).unwrap();
        assert_eq!(dates, vec![day(2), day(3), day(6), day(7), day(8)]);
    }

    #[test]
    fn test_join_sentiment_replaces_previous_join() {
        let prices = price_frame(&[2, 3]);
        let first = join_sentiment(&prices, &[sentiment(2, 0.1)]).unwrap();
        let second = join_sentiment(&first, &[sentiment(2, 0.9)]).unwrap();

        assert_eq!(second.width(), first.width());
        assert_eq!(
            column_f64(&second, "avg_sentiment").unwrap(),
            vec![Some(0.9), Some(0.9)]
        );
    }

    #[test]
    fn test_filter_date_range_is_inclusive() {
        let prices = price_frame(&[2, 3, 6, 7, 8]);
        let filtered = filter_date_range(&prices, Some(day(3)), Some(day(7))).unwrap();
        assert_eq!(column_dates(&filtered).unwrap(), vec![day(3), day(6), day(7)]);
    }

    #[test]
    fn test_drop_incomplete_rows() {
        let prices = price_frame(&[2, 3, 6]);
        let joined = join_sentiment(&prices, &[sentiment(3, 0.2)]).unwrap();
        let complete = drop_incomplete_rows(&joined, &["close", "avg_sentiment"]).unwrap();
        assert_eq!(complete.height(), 2);
    }

    #[test]
    fn test_dedup_sentiment_keeps_last() {
        let records = vec![sentiment(5, 0.1), sentiment(2, 0.3), sentiment(5, 0.7)];
        let deduped = dedup_sentiment(&records);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].date, day(2));
        assert_eq!(deduped[1].avg_sentiment, 0.7);
    }
}
