use ndarray::{ArrayView1, ArrayView2};
use std::cmp::Ordering;

const PROBABILITY_CLIP: f64 = 1e-15;

/// Mean squared error
pub fn mse(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    (&truth - &predicted).mapv(|error| error * error).mean().unwrap_or(f64::NAN)
}

/// Coefficient of determination (R²)
pub fn cod(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    let Some(mean) = truth.mean() else {
        return f64::NAN;
    };

    let total: f64 = truth.iter().map(|value| (value - mean).powi(2)).sum();
    let residuals: f64 = truth
        .iter()
        .zip(predicted)
        .map(|(value, prediction)| (value - prediction).powi(2))
        .sum();

    1.0 - residuals / total
}

/// Area under the ROC curve from the rank sum of the positive labels, tied scores
/// share their average rank. 0.5 when only one class is present.
pub fn auc(truth: ArrayView1<f64>, scores: ArrayView1<f64>) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut positive_ranks = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }

        // ranks are 1-based
        let rank = (start + end + 1) as f64 / 2.0;
        for &index in &order[start..end] {
            if truth[index] > 0.5 {
                positive_ranks += rank;
            }
        }

        start = end;
    }

    let positives = truth.iter().filter(|&&label| label > 0.5).count() as f64;
    let negatives = truth.len() as f64 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return 0.5;
    }

    (positive_ranks - positives * (positives + 1.0) / 2.0) / (positives * negatives)
}

/// Class weighted multi-class log loss. `truth` holds class indices into the
/// columns of `probabilities` and into `weights`. Classes without samples are
/// left out of both the loss and the weight sum.
pub fn multi_weighted_logloss(
    truth: ArrayView1<f64>,
    probabilities: ArrayView2<f64>,
    weights: &[f64],
) -> f64 {
    let classes = probabilities.ncols();
    let mut log_sums = vec![0.0; classes];
    let mut counts = vec![0usize; classes];

    for (label, row) in truth.iter().zip(probabilities.rows()) {
        let class = *label as usize;
        if class >= classes {
            continue;
        }

        let probability = row[class].clamp(PROBABILITY_CLIP, 1.0 - PROBABILITY_CLIP);
        log_sums[class] += probability.ln();
        counts[class] += 1;
    }

    let (mut loss, mut weight_sum) = (0.0, 0.0);
    for class in 0..classes {
        if counts[class] == 0 {
            continue;
        }

        let weight = weights.get(class).copied().unwrap_or(1.0);
        loss += weight * log_sums[class] / counts[class] as f64;
        weight_sum += weight;
    }

    -loss / weight_sum
}
