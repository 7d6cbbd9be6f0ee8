//! Classification losses and metrics.

use ndarray::{Array2, ArrayView2, Axis};

/// Row-wise softmax with the usual max-shift for numerical stability.
pub fn softmax_rows(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    probs
}

/// Mean cross-entropy over the batch, plus the gradient with respect to the
/// logits (already averaged over the batch).
pub fn cross_entropy_loss(logits: &Array2<f32>, labels: &[usize]) -> (f32, Array2<f32>) {
    let batch = logits.nrows();
    debug_assert_eq!(batch, labels.len());

    let probs = softmax_rows(logits.view());
    let mut grad = probs.clone();
    let mut loss = 0.0f32;

    for (i, &label) in labels.iter().enumerate() {
        loss -= probs[[i, label]].max(1e-12).ln();
        grad[[i, label]] -= 1.0;
    }

    let scale = 1.0 / batch.max(1) as f32;
    grad.mapv_inplace(|v| v * scale);
    (loss * scale, grad)
}

/// Fraction of rows whose arg-max logit matches the label.
pub fn accuracy(logits: &Array2<f32>, labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = logits
        .axis_iter(Axis(0))
        .zip(labels.iter())
        .filter(|(row, label)| {
            let mut best = 0usize;
            let mut best_val = f32::NEG_INFINITY;
            for (j, &v) in row.iter().enumerate() {
                if v > best_val {
                    best_val = v;
                    best = j;
                }
            }
            best == **label
        })
        .count();
    correct as f32 / labels.len() as f32
}
