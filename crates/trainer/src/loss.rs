//! Token-level cross-entropy

use runtime_core::{Error, Logits, Result};

/// Mean cross-entropy over every position, with its gradient.
///
/// `labels` holds one target class per row of `logits`. The returned
/// gradient has the same shape as `logits` and is already divided by the
/// number of positions, ready for `Model::backward`.
pub fn cross_entropy(logits: &Logits, labels: &[u32]) -> Result<(f64, Logits)> {
    let positions = logits.num_positions();
    if positions != labels.len() {
        return Err(Error::ShapeMismatch {
            expected: format!("{} labels", positions),
            actual: format!("{} labels", labels.len()),
        });
    }
    if positions == 0 {
        return Err(Error::ShapeMismatch {
            expected: "at least one position".to_string(),
            actual: "empty logits".to_string(),
        });
    }

    let vocab = logits.vocab_size;
    let scale = 1.0 / positions as f64;
    let mut grad = vec![0f32; logits.data.len()];
    let mut total = 0.0;

    for (position, &label) in labels.iter().enumerate() {
        let target = label as usize;
        if target >= vocab {
            return Err(Error::ShapeMismatch {
                expected: format!("label below vocab size {}", vocab),
                actual: format!("label {} at position {}", label, position),
            });
        }

        let row = logits.row(position);
        let max = row.iter().fold(f64::NEG_INFINITY, |m, &x| m.max(x as f64));
        let sum_exp: f64 = row.iter().map(|&x| (x as f64 - max).exp()).sum();
        let log_sum_exp = max + sum_exp.ln();
        total += log_sum_exp - row[target] as f64;

        let grad_row = &mut grad[position * vocab..(position + 1) * vocab];
        for (g, &x) in grad_row.iter_mut().zip(row) {
            *g = ((x as f64 - log_sum_exp).exp() * scale) as f32;
        }
        grad_row[target] -= scale as f32;
    }

    Ok((total * scale, Logits::new(grad, vocab)?))
}
