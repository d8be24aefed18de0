// External crates
use burn::tensor::{backend::Backend, Tensor, TensorData};
use chrono::NaiveDate;
use ndarray::{Array3, Axis};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

// Internal modules
use crate::error::{ForecastError, Result};
use crate::util::pre_processor::{
    column_dates, column_f64, drop_incomplete_rows, filter_date_range, has_column,
};

/// Labeled lookback windows for training and evaluation
#[derive(Debug, Clone)]
pub struct LabeledWindows {
    /// Shape `(num_windows, backcandles, num_features)`
    pub windows: Array3<f64>,
    pub labels: Vec<u8>,
    /// Frame row each label was read from; window `i` covers rows
    /// `label_rows[i] - backcandles .. label_rows[i]`
    pub label_rows: Vec<usize>,
    pub dates: Vec<NaiveDate>,
}

impl LabeledWindows {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Subset of windows by index, in the given order
    pub fn select(&self, indices: &[usize]) -> LabeledWindows {
        LabeledWindows {
            windows: self.windows.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            label_rows: indices.iter().map(|&i| self.label_rows[i]).collect(),
            dates: indices.iter().map(|&i| self.dates[i]).collect(),
        }
    }
}

/// One inference date produced by the full-dataset mode
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSlot {
    pub date: NaiveDate,
    pub row: usize,
    /// Index into `PredictionWindows::windows`, `None` when the lookback holds incomplete rows
    pub window: Option<usize>,
    /// Complete rows among the preceding `backcandles`
    pub valid_rows: usize,
}

/// Unlabeled windows for every row that has `backcandles` rows before it
#[derive(Debug, Clone)]
pub struct PredictionWindows {
    pub windows: Array3<f64>,
    pub slots: Vec<WindowSlot>,
    pub backcandles: usize,
}

/// Reads feature columns row by row
fn feature_rows(df: &DataFrame, feature_columns: &[&str]) -> Result<Vec<Vec<Option<f64>>>> {
    let mut columns = Vec::with_capacity(feature_columns.len());
    for &name in feature_columns {
        if !has_column(df, name) {
            return Err(ForecastError::DataJoin(format!(
                "feature column '{}' not found",
                name
            )));
        }
        columns.push(column_f64(df, name)?);
    }

    Ok((0..df.height())
        .map(|row| columns.iter().map(|c| c[row].filter(|v| v.is_finite())).collect())
        .collect())
}

fn check_backcandles(backcandles: usize) -> Result<()> {
    if backcandles == 0 {
        return Err(ForecastError::Config("backcandles must be at least 1".into()));
    }
    Ok(())
}

/// Slices a labeled frame into lookback windows.
///
/// Rows before `training_start` are excluded, as are rows with a missing
/// feature or label (the leading rows that predate any sentiment). The
/// frame is expected to have lost its unlabeled tail already, so window
/// `i` covers rows `[i, i + backcandles)` and takes the label of row
/// `i + backcandles`.
pub fn prepare_dataset(
    df: &DataFrame,
    label_column: &str,
    backcandles: usize,
    feature_columns: &[&str],
    training_start: Option<NaiveDate>,
) -> Result<LabeledWindows> {
    check_backcandles(backcandles)?;

    let df = filter_date_range(df, training_start, None)?;
    let mut required: Vec<&str> = feature_columns.to_vec();
    required.push(label_column);
    let df = drop_incomplete_rows(&df, &required)?;

    let n_rows = df.height();
    if n_rows <= backcandles {
        return Err(ForecastError::InsufficientHistory {
            needed: backcandles + 1,
            available: n_rows,
        });
    }

    let rows = feature_rows(&df, feature_columns)?;
    let label_values = column_f64(&df, label_column)?;
    let dates = column_dates(&df)?;

    let num_windows = n_rows - backcandles;
    let num_features = feature_columns.len();
    let windows = Array3::from_shape_fn((num_windows, backcandles, num_features), |(i, t, j)| {
        rows[i + t][j].unwrap_or(f64::NAN)
    });

    let label_rows: Vec<usize> = (backcandles..n_rows).collect();
    let labels = label_rows
        .iter()
        .map(|&row| match label_values[row] {
            Some(v) if v == 0.0 || v == 1.0 => Ok(v as u8),
            other => Err(ForecastError::InvalidTrainingData(format!(
                "label {:?} at row {} is not binary",
                other, row
            ))),
        })
        .collect::<Result<Vec<u8>>>()?;
    let label_dates = label_rows.iter().map(|&row| dates[row]).collect();

    Ok(LabeledWindows {
        windows,
        labels,
        label_rows,
        dates: label_dates,
    })
}

/// Builds one window per row index `>= backcandles` over the whole frame,
/// without labels or tail trimming, for walk-forward inference.
///
/// Rows outside any training range are accepted so that early reporting
/// dates can draw on earlier history. A slot whose lookback contains an
/// incomplete row gets no window.
pub fn prepare_full_dataset_for_prediction(
    df: &DataFrame,
    backcandles: usize,
    feature_columns: &[&str],
) -> Result<PredictionWindows> {
    check_backcandles(backcandles)?;

    let rows = feature_rows(df, feature_columns)?;
    let dates = column_dates(df)?;
    let complete: Vec<bool> = rows
        .iter()
        .map(|r| r.iter().all(Option::is_some))
        .collect();

    let mut slots = Vec::new();
    let mut starts = Vec::new();
    for row in backcandles..df.height() {
        let valid_rows = complete[row - backcandles..row].iter().filter(|c| **c).count();
        let window = if valid_rows == backcandles {
            starts.push(row - backcandles);
            Some(starts.len() - 1)
        } else {
            None
        };
        slots.push(WindowSlot {
            date: dates[row],
            row,
            window,
            valid_rows,
        });
    }

    let num_features = feature_columns.len();
    let windows = Array3::from_shape_fn((starts.len(), backcandles, num_features), |(i, t, j)| {
        rows[starts[i] + t][j].unwrap_or(f64::NAN)
    });

    Ok(PredictionWindows {
        windows,
        slots,
        backcandles,
    })
}

/// Train/test index split stratified on the label
#[derive(Debug, Clone, PartialEq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits indices so each class keeps its share in the test set.
///
/// Every class needs at least two members; each contributes
/// `round(count * test_fraction)` samples (at least one, at most all but
/// one) to the test set. The same seed always yields the same split.
pub fn stratified_split(labels: &[u8], test_fraction: f64, seed: u64) -> Result<SplitIndices> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ForecastError::Config(format!(
            "test fraction {} must lie in (0, 1)",
            test_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        if members.len() < 2 {
            return Err(ForecastError::InvalidTrainingData(format!(
                "class {} has {} members, stratification needs at least 2",
                class,
                members.len()
            )));
        }

        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64 * test_fraction).round() as usize)
            .clamp(1, members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.shuffle(&mut rng);
    test.sort_unstable();

    Ok(SplitIndices { train, test })
}

/// Converts a window array into a `[num_windows, backcandles, num_features]` tensor
pub fn windows_to_tensor<B: Backend>(windows: &Array3<f64>, device: &B::Device) -> Tensor<B, 3> {
    let (n, k, f) = windows.dim();
    let data: Vec<f32> = windows.iter().map(|v| *v as f32).collect();
    Tensor::<B, 3>::from_data(TensorData::new(data, [n, k, f]), device)
}

/// Converts values into a `[n, 1]` tensor
pub fn targets_to_tensor<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::<B, 2>::from_data(TensorData::new(values.to_vec(), [values.len(), 1]), device)
}
