//! Decision threshold calibration and binary classification diagnostics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::THRESHOLD_STEPS;
use crate::error::{ForecastError, Result};

/// Confusion matrix for binary direction labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(labels: &[u8], predictions: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in labels.iter().zip(predictions.iter()) {
            match (t == 1, p == 1) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.tp + self.tn + self.fp + self.fn_)
    }

    /// F1 of the positive class; 0 when there are no true positives
    pub fn f1(&self) -> f64 {
        let denom = 2 * self.tp + self.fp + self.fn_;
        ratio(2 * self.tp, denom)
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Applies `probability >= threshold`
pub fn apply_threshold(probabilities: &[f64], threshold: f64) -> Vec<u8> {
    probabilities
        .iter()
        .map(|p| u8::from(*p >= threshold))
        .collect()
}

pub fn f1_score(labels: &[u8], predictions: &[u8]) -> f64 {
    ConfusionMatrix::from_predictions(labels, predictions).f1()
}

/// Outcome of a threshold sweep plus diagnostics that do not influence the choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub threshold: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
    /// Points `(false positive rate, true positive rate)`
    pub roc_curve: Vec<(f64, f64)>,
    pub roc_auc: Option<f64>,
    /// Points `(recall, precision)`
    pub pr_curve: Vec<(f64, f64)>,
    pub average_precision: Option<f64>,
    pub label_distribution: BTreeMap<u8, usize>,
}

/// Sweeps `THRESHOLD_STEPS` evenly spaced thresholds over [0, 1] in
/// ascending order and keeps the first one reaching the maximum F1
pub fn best_threshold(probabilities: &[f64], labels: &[u8]) -> (f64, f64) {
    let mut best = (0.0, f64::NEG_INFINITY);
    for i in 0..THRESHOLD_STEPS {
        let threshold = i as f64 / (THRESHOLD_STEPS - 1) as f64;
        let f1 = f1_score(labels, &apply_threshold(probabilities, threshold));
        if f1 > best.1 {
            best = (threshold, f1);
        }
    }
    best
}

/// Picks the F1-maximizing threshold on held-out probabilities and computes
/// the diagnostic curves
pub fn calibrate_threshold(probabilities: &[f64], labels: &[u8]) -> Result<CalibrationReport> {
    if probabilities.len() != labels.len() {
        return Err(ForecastError::InvalidTrainingData(format!(
            "{} probabilities for {} labels",
            probabilities.len(),
            labels.len()
        )));
    }
    if probabilities.is_empty() {
        return Err(ForecastError::InvalidTrainingData(
            "cannot calibrate a threshold without held-out samples".into(),
        ));
    }

    let (threshold, f1) = best_threshold(probabilities, labels);
    let confusion =
        ConfusionMatrix::from_predictions(labels, &apply_threshold(probabilities, threshold));

    let roc_curve = roc_curve(probabilities, labels);
    let roc_auc = auc(&roc_curve);
    let (pr_curve, average_precision) = precision_recall(probabilities, labels);

    let mut label_distribution = BTreeMap::new();
    for &label in labels {
        *label_distribution.entry(label).or_insert(0) += 1;
    }

    Ok(CalibrationReport {
        threshold,
        f1,
        confusion,
        roc_curve,
        roc_auc,
        pr_curve,
        average_precision,
        label_distribution,
    })
}

/// Scores sorted descending, grouped by distinct value
fn ranked(probabilities: &[f64], labels: &[u8]) -> Vec<(f64, usize, usize)> {
    let mut pairs: Vec<(f64, u8)> = probabilities
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    // (score, positives, negatives) per distinct score
    let mut groups: Vec<(f64, usize, usize)> = Vec::new();
    for (score, label) in pairs {
        match groups.last_mut() {
            Some(group) if group.0 == score => {
                if label == 1 {
                    group.1 += 1;
                } else {
                    group.2 += 1;
                }
            }
            _ => groups.push((score, usize::from(label == 1), usize::from(label != 1))),
        }
    }
    groups
}

/// ROC points from the strictest to the loosest cut, starting at (0, 0).
/// Empty when either class is absent.
pub fn roc_curve(probabilities: &[f64], labels: &[u8]) -> Vec<(f64, f64)> {
    let positives = labels.iter().filter(|l| **l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Vec::new();
    }

    let mut points = vec![(0.0, 0.0)];
    let (mut tp, mut fp) = (0, 0);
    for (_, pos, neg) in ranked(probabilities, labels) {
        tp += pos;
        fp += neg;
        points.push((fp as f64 / negatives as f64, tp as f64 / positives as f64));
    }
    points
}

/// Trapezoidal area under a curve of `(x, y)` points ordered by x
pub fn auc(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let area = points
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[1].1 + w[0].1) / 2.0)
        .sum();
    Some(area)
}

/// Precision-recall points and average precision
/// (`sum_n (R_n - R_{n-1}) * P_n` over distinct score cuts)
pub fn precision_recall(probabilities: &[f64], labels: &[u8]) -> (Vec<(f64, f64)>, Option<f64>) {
    let positives = labels.iter().filter(|l| **l == 1).count();
    if positives == 0 {
        return (Vec::new(), None);
    }

    let mut points = Vec::new();
    let mut ap = 0.0;
    let mut prev_recall = 0.0;
    let (mut tp, mut fp) = (0, 0);
    for (_, pos, neg) in ranked(probabilities, labels) {
        tp += pos;
        fp += neg;
        let precision = tp as f64 / (tp + fp) as f64;
        let recall = tp as f64 / positives as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        points.push((recall, precision));
    }
    (points, Some(ap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_separation_reaches_f1_one() {
        let probs = [0.1, 0.4, 0.6, 0.9];
        let labels = [0, 0, 1, 1];
        let report = calibrate_threshold(&probs, &labels).unwrap();

        assert_eq!(report.f1, 1.0);
        assert!(report.threshold > 0.4 && report.threshold <= 0.6);
        assert_eq!(
            apply_threshold(&probs, report.threshold),
            vec![0, 0, 1, 1]
        );
        assert_eq!(report.roc_auc, Some(1.0));
        assert_eq!(report.average_precision, Some(1.0));
    }

    #[test]
    fn test_ties_keep_lowest_threshold() {
        // Any cut in (0.4, 0.6] separates perfectly; the first in the sweep is 0.41
        let (threshold, f1) = best_threshold(&[0.1, 0.4, 0.6, 0.9], &[0, 0, 1, 1]);
        assert_eq!(f1, 1.0);
        assert!((threshold - 0.41).abs() < 1e-12);
    }

    #[test]
    fn test_sweep_is_deterministic() {
        let probs: Vec<f64> = (0..50).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        let labels: Vec<u8> = (0..50).map(|i| ((i * 7) % 3 == 0) as u8).collect();
        let first = calibrate_threshold(&probs, &labels).unwrap();
        let second = calibrate_threshold(&probs, &labels).unwrap();
        assert_eq!(first.threshold, second.threshold);
        assert_eq!(first.f1, second.f1);
    }

    #[test]
    fn test_all_negative_labels_pick_threshold_zero() {
        // F1 is 0 everywhere, so the first threshold wins
        let report = calibrate_threshold(&[0.2, 0.7], &[0, 0]).unwrap();
        assert_eq!(report.threshold, 0.0);
        assert_eq!(report.f1, 0.0);
        assert_eq!(report.roc_auc, None);
        assert_eq!(report.average_precision, None);
        assert_eq!(report.label_distribution.get(&0), Some(&2));
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let cm = ConfusionMatrix::from_predictions(&[1, 1, 0, 0, 1], &[1, 0, 1, 0, 1]);
        assert_eq!((cm.tp, cm.tn, cm.fp, cm.fn_), (2, 1, 1, 1));
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.f1() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_of_reversed_scores_is_zero() {
        let curve = roc_curve(&[0.9, 0.8, 0.2, 0.1], &[0, 0, 1, 1]);
        assert_eq!(auc(&curve), Some(0.0));
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        assert!(calibrate_threshold(&[0.5], &[1, 0]).is_err());
        assert!(calibrate_threshold(&[], &[]).is_err());
    }
}
