//! Classification metrics.

use crate::error::{NetError, Result};
use crate::tensor::Blob;

/// Fraction of samples whose predicted class matches the label class.
///
/// labels: [N, classes, ...] one-hot
/// predictions: same shape (logits or probabilities)
///
/// The class of a sample is its max-index; an empty batch scores 0.0.
pub fn accuracy(labels: &Blob, predictions: &Blob) -> Result<f64> {
    if labels.shape() != predictions.shape() {
        return Err(NetError::shape("accuracy", labels.shape(), predictions.shape()));
    }
    let n = labels.n();
    if n == 0 {
        return Ok(0.0);
    }
    let correct = (0..n)
        .filter(|&i| labels.sample_max_index(i) == predictions.sample_max_index(i))
        .count();
    Ok(correct as f64 / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Fill, Shape};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_identical_sets_score_one() {
        let mut rng = StdRng::seed_from_u64(12);
        let y = Blob::new(Shape::new(7, 4, 1, 1), Fill::RandomNormal, &mut rng);
        assert_eq!(accuracy(&y, &y).unwrap(), 1.0);
    }

    #[test]
    fn test_partial_accuracy() {
        let labels = Blob::from_vec(Shape::new(4, 2, 1, 1), vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
        let preds = Blob::from_vec(Shape::new(4, 2, 1, 1), vec![0.9, 0.1, 0.2, 0.8, 0.3, 0.7, 0.6, 0.4]).unwrap();
        assert_eq!(accuracy(&labels, &preds).unwrap(), 0.5);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let empty = Blob::zeros(Shape::new(0, 3, 1, 1));
        assert_eq!(accuracy(&empty, &empty).unwrap(), 0.0);
        let other = Blob::zeros(Shape::new(1, 3, 1, 1));
        assert!(accuracy(&empty, &other).is_err());
    }
}
