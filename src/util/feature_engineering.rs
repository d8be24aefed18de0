// External crates
use log::debug;
use polars::prelude::*;
use std::str::FromStr;

// Local modules
use crate::constants::{
    DATE_COLUMN, EMA_FAST_PERIOD, EMA_MID_PERIOD, EMA_SLOW_PERIOD, INDICATOR_COLUMNS, RSI_PERIOD,
};
use crate::error::{ForecastError, Result};
use crate::types::{Horizon, PriceRecord};
use crate::util::pre_processor::{format_date, impute, FillStrategy};

/// Output of feature engineering for one horizon
#[derive(Debug, Clone)]
pub struct EngineeredFeatures {
    /// Price history with indicators and the active label, unlabeled tail removed
    pub frame: DataFrame,
    /// Every row including the unlabeled tail, for walk-forward inference
    pub inference_frame: DataFrame,
    /// Name of the label column kept in `frame`
    pub label_column: &'static str,
    pub horizon: Horizon,
}

/// Calculates an Exponential Moving Average seeded with the simple average of
/// the first `period` values.
///
/// The first `period - 1` entries are warm-up and returned as `None`. A series
/// shorter than `period` is seeded with the average of all its values, placed
/// on its last row.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut ema = vec![None; values.len()];
    if period == 0 || values.is_empty() {
        return ema;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed_len = period.min(values.len());
    let mut prev = values[..seed_len].iter().sum::<f64>() / seed_len as f64;
    ema[seed_len - 1] = Some(prev);

    for i in seed_len..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        ema[i] = Some(prev);
    }

    ema
}

/// Calculates the Relative Strength Index with Wilder smoothing.
///
/// The first `period` entries are warm-up and returned as `None`.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return rsi;
    }

    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    for i in 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    rsi[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        // gains[i - 1] holds the change from row i - 1 to row i
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i - 1]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i - 1]) / period as f64;
        rsi[i] = Some(rsi_value(avg_gain, avg_loss));
    }

    rsi
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Checks that price history is strictly ascending by date
pub fn validate_price_history(records: &[PriceRecord]) -> Result<()> {
    for pair in records.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(ForecastError::DataJoin(format!(
                "price history must be ascending with unique dates, found {} after {}",
                pair[1].date, pair[0].date
            )));
        }
    }
    Ok(())
}

/// Removes every label-like column except the active one so that other
/// horizons' labels never leak in as features
pub fn drop_foreign_targets(df: &DataFrame, label_column: &str) -> Result<DataFrame> {
    let foreign: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| name.contains("target") && name != label_column)
        .collect();

    let mut result = df.clone();
    for name in foreign {
        debug!("Dropping foreign target column {}", name);
        result = result.drop(&name)?;
    }
    Ok(result)
}

/// Derives indicators and labels for a target type given by name
pub fn engineer_features(records: &[PriceRecord], target_type: &str) -> Result<EngineeredFeatures> {
    let horizon = Horizon::from_str(target_type)?;
    engineer_features_for(records, horizon)
}

/// Derives RSI and the three EMAs over closing prices, back-fills warm-up
/// gaps, labels each row for `horizon`, and drops the tail rows whose label
/// would need prices past the end of the series.
pub fn engineer_features_for(records: &[PriceRecord], horizon: Horizon) -> Result<EngineeredFeatures> {
    validate_price_history(records)?;

    let opens: Vec<f64> = records.iter().map(|r| r.open).collect();
    let closes: Vec<f64> = records.iter().map(|r| r.close).collect();

    let rsi = impute(&calculate_rsi(&closes, RSI_PERIOD), FillStrategy::Backward);
    if rsi.iter().any(Option::is_none) {
        return Err(ForecastError::InsufficientHistory {
            needed: RSI_PERIOD + 1,
            available: records.len(),
        });
    }

    let ema_fast = impute(&calculate_ema(&closes, EMA_FAST_PERIOD), FillStrategy::Backward);
    let ema_mid = impute(&calculate_ema(&closes, EMA_MID_PERIOD), FillStrategy::Backward);
    let ema_slow = impute(&calculate_ema(&closes, EMA_SLOW_PERIOD), FillStrategy::Backward);
    if records.len() < EMA_SLOW_PERIOD {
        debug!(
            "History of {} rows is shorter than the slow EMA period {}",
            records.len(),
            EMA_SLOW_PERIOD
        );
    }

    let labeled_rows = records.len().saturating_sub(horizon.rows());
    if labeled_rows == 0 {
        return Err(ForecastError::InsufficientHistory {
            needed: horizon.rows() + 1,
            available: records.len(),
        });
    }

    let labels: Vec<Option<i32>> = (0..records.len())
        .map(|t| horizon.label_at(&opens, &closes, t).map(i32::from))
        .collect();

    let dates: Vec<String> = records.iter().map(|r| format_date(r.date)).collect();
    let label_column = horizon.label_column();

    let df = DataFrame::new(vec![
        Series::new(DATE_COLUMN.into(), dates).into(),
        Series::new("open".into(), opens).into(),
        Series::new("high".into(), records.iter().map(|r| r.high).collect::<Vec<f64>>()).into(),
        Series::new("low".into(), records.iter().map(|r| r.low).collect::<Vec<f64>>()).into(),
        Series::new("close".into(), closes.clone()).into(),
        Series::new("volume".into(), records.iter().map(|r| r.volume).collect::<Vec<f64>>()).into(),
        Series::new(INDICATOR_COLUMNS[0].into(), rsi).into(),
        Series::new(INDICATOR_COLUMNS[1].into(), ema_fast).into(),
        Series::new(INDICATOR_COLUMNS[2].into(), ema_mid).into(),
        Series::new(INDICATOR_COLUMNS[3].into(), ema_slow).into(),
        Series::new(label_column.into(), labels).into(),
    ])?;

    let inference_frame = drop_foreign_targets(&df, label_column)?;
    // Only the tail rows lack a label
    let frame = inference_frame.slice(0, labeled_rows);

    debug!(
        "Engineered {} labeled rows for {} horizon from {} price records",
        frame.height(),
        horizon,
        records.len()
    );

    Ok(EngineeredFeatures {
        frame,
        inference_frame,
        label_column,
        horizon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::pre_processor::column_f64;
    use crate::util::test_utils::synthetic_prices;

    #[test]
    fn test_ema_seeded_with_simple_average() {
        let ema = calculate_ema(&[10.0, 20.0, 30.0, 40.0], 3);
        assert_eq!(ema[0], None);
        assert_eq!(ema[1], None);
        assert_eq!(ema[2], Some(20.0));
        // alpha = 0.5
        assert_eq!(ema[3], Some(30.0));
    }

    #[test]
    fn test_ema_on_short_series_uses_available_average() {
        let ema = calculate_ema(&[10.0, 20.0], 5);
        assert_eq!(ema, vec![None, Some(15.0)]);
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn test_ema_warmup_is_back_filled_from_first_valid_value() {
        let records = synthetic_prices(200);
        let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
        let features = engineer_features(&records, "daily").unwrap();

        let slow = column_f64(&features.frame, "ema_slow").unwrap();
        let seed = closes[..EMA_SLOW_PERIOD].iter().sum::<f64>() / EMA_SLOW_PERIOD as f64;
        assert!((slow[EMA_SLOW_PERIOD - 1].unwrap() - seed).abs() < 1e-9);
        for value in &slow[..EMA_SLOW_PERIOD] {
            assert_eq!(*value, slow[EMA_SLOW_PERIOD - 1]);
        }
        assert_ne!(slow[0], Some(closes[0]));

        let fast = column_f64(&features.frame, "ema_fast").unwrap();
        assert_eq!(fast[0], fast[EMA_FAST_PERIOD - 1]);
        assert_ne!(fast[EMA_FAST_PERIOD], fast[EMA_FAST_PERIOD - 1]);
    }

    #[test]
    fn test_rsi_warmup_and_bounds() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let rsi = calculate_rsi(&closes, 15);
        assert!(rsi[..15].iter().all(Option::is_none));
        assert!(rsi[15..]
            .iter()
            .all(|v| v.map_or(false, |x| (0.0..=100.0).contains(&x))));
    }

    #[test]
    fn test_rsi_monotonic_rise_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let rsi = calculate_rsi(&closes, 5);
        assert_eq!(rsi[19], Some(100.0));
    }

    #[test]
    fn test_daily_features_drop_only_last_row() {
        let records = synthetic_prices(100);
        let features = engineer_features(&records, "daily").unwrap();

        // Warm-up gaps are back-filled, so only the unlabeled last row goes
        assert_eq!(features.frame.height(), 99);
        assert_eq!(features.label_column, "target_class");
        assert_eq!(features.horizon.rows(), 1);

        for name in INDICATOR_COLUMNS {
            let values = column_f64(&features.frame, name).unwrap();
            assert!(values.iter().all(Option::is_some), "{} has nulls", name);
        }

        // Warm-up rows copy the first valid RSI value
        let rsi = column_f64(&features.frame, "rsi").unwrap();
        assert_eq!(rsi[0], rsi[RSI_PERIOD]);
    }

    #[test]
    fn test_weekly_and_monthly_trim_horizon_rows() {
        let records = synthetic_prices(100);
        let weekly = engineer_features(&records, "weekly").unwrap();
        let monthly = engineer_features(&records, "monthly").unwrap();

        assert_eq!(weekly.frame.height(), 95);
        assert_eq!(monthly.frame.height(), 80);
        assert!(weekly.frame.column("target_week_class").is_ok());
        assert!(monthly.frame.column("target_month_class").is_ok());
        assert_eq!(monthly.inference_frame.height(), 100);
    }

    #[test]
    fn test_labels_match_horizon_rule() {
        let records = synthetic_prices(60);
        let weekly = engineer_features_for(&records, Horizon::Weekly).unwrap();
        let labels = column_f64(&weekly.frame, "target_week_class").unwrap();

        for (t, label) in labels.iter().enumerate() {
            let expected = if records[t + 5].close - records[t].close > 0.0 { 1.0 } else { 0.0 };
            assert_eq!(*label, Some(expected));
        }
    }

    #[test]
    fn test_invalid_target_type_is_config_error() {
        let records = synthetic_prices(50);
        let err = engineer_features(&records, "yearly").unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn test_short_history_is_rejected() {
        let records = synthetic_prices(10);
        let err = engineer_features(&records, "daily").unwrap_err();
        assert!(err.is_insufficient_history());
    }

    #[test]
    fn test_unordered_history_is_rejected() {
        let mut records = synthetic_prices(30);
        records.swap(3, 4);
        let err = engineer_features(&records, "daily").unwrap_err();
        assert!(matches!(err, ForecastError::DataJoin(_)));
    }

    #[test]
    fn test_foreign_targets_are_dropped() {
        let df = DataFrame::new(vec![
            Series::new("close".into(), vec![1.0, 2.0]).into(),
            Series::new("target_class".into(), vec![1, 0]).into(),
            Series::new("target_week_class".into(), vec![0, 1]).into(),
            Series::new("target_next_close".into(), vec![2.0, 3.0]).into(),
        ])
        .unwrap();

        let kept = drop_foreign_targets(&df, "target_week_class").unwrap();
        let names: Vec<String> = kept.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["close".to_string(), "target_week_class".to_string()]);
    }
}
