use ndarray::Array2;

use crate::error::CellstackError;

/// Black-box doublet classifier: a continuous score and a predicted-doublet
/// flag per cell.
pub trait DoubletDetector: Send + Sync {
    fn detect(&self, matrix: &Array2<f64>) -> Result<(Vec<f64>, Vec<bool>), CellstackError>;
}

// Zero scores, nothing flagged; real deployments inject their own detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl DoubletDetector for NoopDetector {
    fn detect(&self, matrix: &Array2<f64>) -> Result<(Vec<f64>, Vec<bool>), CellstackError> {
        let cells = matrix.nrows();
        Ok((vec![0.0; cells], vec![false; cells]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_detector_flags_nothing() {
        let matrix = Array2::<f64>::zeros((4, 2));
        let (scores, flags) = NoopDetector.detect(&matrix).unwrap();
        assert_eq!(scores, vec![0.0; 4]);
        assert_eq!(flags, vec![false; 4]);
    }
}
