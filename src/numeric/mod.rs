//! Numeric close-price predictions feeding the fusion stage

pub mod close_regressor;

// External imports
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::{debug, warn};

// Internal imports
use crate::error::Result;

pub use close_regressor::{train_close_regressor, ClosePricePredictor, CloseRegressorConfig};

/// Anything that can predict a close price for a date
pub trait PricePredictor {
    fn predict_price(&self, date: NaiveDate) -> Result<f64>;
}

/// Mon-Fri dates in the inclusive range
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// One prediction attempt per business day in `[start, end]`.
///
/// A date without enough history yields `None`; any other failure is
/// logged and also yields `None` so one bad date never aborts the series.
pub fn generate_price_predictions<P: PricePredictor + ?Sized>(
    predictor: &P,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(NaiveDate, Option<f64>)> {
    business_days_between(start, end)
        .into_iter()
        .map(|date| match predictor.predict_price(date) {
            Ok(price) if price.is_finite() => (date, Some(price)),
            Ok(price) => {
                warn!("Discarding non-finite price prediction {} for {}", price, date);
                (date, None)
            }
            Err(e) if e.is_insufficient_history() => {
                debug!("No price prediction for {}: {}", date, e);
                (date, None)
            }
            Err(e) => {
                warn!("Price prediction failed for {}: {}", date, e);
                (date, None)
            }
        })
        .collect()
}
