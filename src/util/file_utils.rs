// External crates
use chrono::NaiveDate;
use log::{debug, warn};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

// Internal imports
use crate::constants::{DATE_COLUMN, PRICE_COLUMNS, PRICE_FILE_SUFFIX, SENTIMENT_COLUMNS};
use crate::error::{ForecastError, Result};
use crate::types::{PriceRecord, SentimentRecord};
use crate::util::feature_engineering::validate_price_history;
use crate::util::pre_processor::{column_dates, column_f64, has_column};

/// Source of daily OHLCV history
pub trait MarketDataSource {
    /// Ascending, date-unique price history for `symbol` within `[start, end]`
    fn get_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>>;
}

/// Market data read from `{data_dir}/{symbol}_daily_ohlcv.csv`
#[derive(Debug, Clone)]
pub struct CsvMarketData {
    pub data_dir: PathBuf,
}

impl CsvMarketData {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn price_file(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}", symbol, PRICE_FILE_SUFFIX))
    }
}

impl MarketDataSource for CsvMarketData {
    fn get_price_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>> {
        let records = read_price_history(self.price_file(symbol))?;
        Ok(records
            .into_iter()
            .filter(|r| r.date >= start && r.date <= end)
            .collect())
    }
}

/// Maps a column name to its standard lowercase form, case-insensitively
/// and accepting common abbreviations
fn standard_column_name(column_name: &str) -> Option<&'static str> {
    let standard_name = match column_name.trim().to_lowercase().as_str() {
        "open" | "o" | "op" | "openprice" | "open_price" => "open",
        "high" | "h" | "highprice" | "high_price" | "max" => "high",
        "low" | "l" | "lowprice" | "low_price" | "min" => "low",
        "close" | "c" | "cl" | "closeprice" | "close_price" => "close",
        "volume" | "vol" | "v" | "volumes" => "volume",
        "timestamp" | "time" | "date" | "t" | "datetime" | "dt" | "day" => DATE_COLUMN,
        "adj close" | "adj_close" | "adjusted close" | "adjusted_close" | "adjclose" => {
            "adjusted_close"
        }
        "avg_sentiment" | "avgsentiment" | "sentiment" => "avg_sentiment",
        "avg_score" | "avgscore" | "score" => "avg_score",
        "article_count" | "articlecount" | "articles" => "article_count",
        _ => return None,
    };
    Some(standard_name)
}

/// Renames recognised columns to their standard names. A column is left
/// alone when its standard name is already taken.
///
/// The frame is rebuilt from its renamed columns so that later lookups see
/// the new names.
pub fn normalize_column_names(df: DataFrame) -> Result<DataFrame> {
    let mut taken: HashSet<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();

    let columns: Vec<Column> = df
        .take_columns()
        .into_iter()
        .map(|mut column| {
            let name = column.name().to_string();
            if let Some(standard_name) = standard_column_name(&name) {
                if name != standard_name && !taken.contains(standard_name) {
                    debug!("Renaming column {} to {}", name, standard_name);
                    taken.remove(&name);
                    taken.insert(standard_name.to_string());
                    column.rename(standard_name.into());
                }
            }
            column
        })
        .collect();

    Ok(DataFrame::new(columns)?)
}

/// Read a CSV file with a header row into a DataFrame with standardized column names
pub fn read_csv_file<P: AsRef<Path>>(file_path: P) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(file_path.as_ref().to_path_buf()))?
        .finish()?;
    normalize_column_names(df)
}

fn require_columns(df: &DataFrame, columns: &[&str], what: &str) -> Result<()> {
    let missing: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !has_column(df, c))
        .collect();
    if !missing.is_empty() {
        return Err(ForecastError::DataJoin(format!(
            "{} is missing columns {:?}",
            what, missing
        )));
    }
    Ok(())
}

/// Reads OHLCV history, sorted by date. Rows with a missing price field are
/// skipped; repeated dates are rejected.
pub fn read_price_history<P: AsRef<Path>>(file_path: P) -> Result<Vec<PriceRecord>> {
    let df = read_csv_file(&file_path)?;
    require_columns(&df, &[DATE_COLUMN], "price file")?;
    require_columns(&df, &PRICE_COLUMNS, "price file")?;

    let dates = column_dates(&df)?;
    let mut columns = Vec::with_capacity(PRICE_COLUMNS.len());
    for name in PRICE_COLUMNS {
        columns.push(column_f64(&df, name)?);
    }

    let mut records = Vec::with_capacity(df.height());
    let mut skipped = 0;
    for (i, date) in dates.into_iter().enumerate() {
        match (columns[0][i], columns[1][i], columns[2][i], columns[3][i], columns[4][i]) {
            (Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                records.push(PriceRecord {
                    date,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(
            "Skipped {} incomplete rows in {}",
            skipped,
            file_path.as_ref().display()
        );
    }

    records.sort_by_key(|r| r.date);
    validate_price_history(&records)?;
    Ok(records)
}

/// Reads the daily sentiment file; rows without a sentiment value are skipped
pub fn read_sentiment_file<P: AsRef<Path>>(file_path: P) -> Result<Vec<SentimentRecord>> {
    let df = read_csv_file(&file_path)?;
    require_columns(&df, &[DATE_COLUMN], "sentiment file")?;
    require_columns(&df, &SENTIMENT_COLUMNS, "sentiment file")?;

    let dates = column_dates(&df)?;
    let avg_sentiment = column_f64(&df, SENTIMENT_COLUMNS[0])?;
    let avg_score = column_f64(&df, SENTIMENT_COLUMNS[1])?;
    let article_count = column_f64(&df, SENTIMENT_COLUMNS[2])?;

    let records = dates
        .into_iter()
        .enumerate()
        .filter_map(|(i, date)| {
            avg_sentiment[i].map(|sentiment| SentimentRecord {
                date,
                avg_sentiment: sentiment,
                avg_score: avg_score[i].unwrap_or(f64::NAN),
                article_count: article_count[i].unwrap_or(0.0),
            })
        })
        .collect();

    Ok(records)
}

/// Write a DataFrame to CSV with a header row, creating parent directories
pub fn write_csv<P: AsRef<Path>>(df: &mut DataFrame, file_path: P) -> Result<()> {
    if let Some(parent) = file_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(file_path.as_ref())?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}
