#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use polars::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    use crate::error::ForecastError;
    use crate::util::file_utils::{
        read_csv_file, read_price_history, read_sentiment_file, write_csv, CsvMarketData,
        MarketDataSource,
    };
    use crate::util::pre_processor::{column_dates, has_column};

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    const PRICE_CSV: &str = "\
Date,Open,High,Low,Close,Volume
2025-01-06,101.0,104.0,100.0,103.0,1200
2025-01-02,99.0,101.0,98.0,100.0,1000
2025-01-03,100.0,,99.0,101.0,1100
2025-01-07,103.0,105.0,102.0,104.5,1300
";

    #[test]
    fn test_read_price_history_sorts_and_skips_incomplete_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("NDX_daily_ohlcv.csv");
        fs::write(&path, PRICE_CSV).unwrap();

        let records = read_price_history(&path).unwrap();

        let dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1, 2), day(1, 6), day(1, 7)]);
        assert_eq!(records[0].close, 100.0);
        assert_eq!(records[1].volume, 1200.0);
    }

    #[test]
    fn test_capitalised_headers_are_renamed_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("caps.csv");
        fs::write(&path, PRICE_CSV).unwrap();

        let df = read_csv_file(&path).unwrap();

        for name in ["date", "open", "high", "low", "close", "volume"] {
            assert!(has_column(&df, name), "missing {}", name);
            assert!(df.schema().contains(name), "schema lacks {}", name);
            assert!(df.column(name).is_ok());
        }
        assert!(!has_column(&df, "Date"));
        assert_eq!(column_dates(&df).unwrap().len(), 4);
    }

    #[test]
    fn test_standard_name_already_present_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("both.csv");
        fs::write(&path, "date,Date,close\n2025-01-02,x,1.0\n").unwrap();

        let df = read_csv_file(&path).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["date", "Date", "close"]);
    }

    #[test]
    fn test_duplicate_price_dates_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(
            &path,
            "date,open,high,low,close,volume\n\
             2025-01-02,1,2,0.5,1.5,10\n\
             2025-01-02,1,2,0.5,1.5,10\n",
        )
        .unwrap();

        let err = read_price_history(&path).unwrap_err();
        assert!(matches!(err, ForecastError::DataJoin(_)));
    }

    #[test]
    fn test_missing_price_column_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.csv");
        fs::write(&path, "date,open,close\n2025-01-02,1,2\n").unwrap();

        match read_price_history(&path) {
            Err(ForecastError::DataJoin(msg)) => assert!(msg.contains("high")),
            other => panic!("expected a DataJoin error, got {:?}", other),
        }
    }

    #[test]
    fn test_market_data_filters_inclusive_range() {
        let dir = tempdir().unwrap();
        let source = CsvMarketData::new(dir.path());
        fs::write(source.price_file("NDX"), PRICE_CSV).unwrap();

        let records = source
            .get_price_history("NDX", day(1, 3), day(1, 6))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, day(1, 6));

        assert!(source.get_price_history("SPX", day(1, 1), day(1, 31)).is_err());
    }

    #[test]
    fn test_read_sentiment_file_skips_rows_without_sentiment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cleaned_scores.csv");
        fs::write(
            &path,
            "date,avg_sentiment,avg_score,article_count\n\
             2025-01-02,0.25,0.8,12\n\
             2025-01-03,,0.6,4\n\
             2025-01-04,-0.5,,3\n",
        )
        .unwrap();

        let records = read_sentiment_file(&path).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, day(1, 2));
        assert_eq!(records[0].article_count, 12.0);
        assert_eq!(records[1].avg_sentiment, -0.5);
        assert!(records[1].avg_score.is_nan());
    }

    #[test]
    fn test_write_csv_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("summary.csv");
        let mut df = df!(
            "Date" => ["2025-01-02", "2025-01-03"],
            "Close" => [100.0, 101.0]
        )
        .unwrap();

        write_csv(&mut df, &path).unwrap();
        let read_back = read_csv_file(&path).unwrap();

        // Column names come back normalized
        assert!(has_column(&read_back, "date"));
        assert!(has_column(&read_back, "close"));
        assert_eq!(read_back.height(), 2);
    }
}
