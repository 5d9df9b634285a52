use ndarray::Array2;

use crate::dataset::Dataset;
use crate::error::CellstackError;

#[derive(Debug, Clone)]
pub struct DecodedMatrix {
    pub values: Array2<f64>,
    pub row_names: Vec<String>,
    pub col_names: Vec<String>,
}

/// Deserializer for serialized R objects. The bridge to the R runtime is a
/// collaborator; no reader is shipped with this crate.
pub trait LegacyDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedMatrix, CellstackError>;
}

// With no bridge wired, every legacy object parses as a typed error, which
// the catalog walker records as a skip.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedLegacyDecoder;

impl LegacyDecoder for UnsupportedLegacyDecoder {
    fn decode(&self, _bytes: &[u8]) -> Result<DecodedMatrix, CellstackError> {
        Err(CellstackError::Parse(
            "no legacy deserializer configured".to_string(),
        ))
    }
}

pub fn into_dataset(decoded: DecodedMatrix) -> Result<Dataset, CellstackError> {
    Dataset::new(decoded.values, decoded.row_names, decoded.col_names)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ndarray::arr2;

    use super::*;

    #[test]
    fn conversion_preserves_shape() {
        let decoded = DecodedMatrix {
            values: arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]),
            row_names: vec!["c1".into(), "c2".into(), "c3".into()],
            col_names: vec!["GeneA".into(), "GeneB".into()],
        };
        let dataset = into_dataset(decoded).unwrap();
        assert_eq!(dataset.n_obs(), 3);
        assert_eq!(dataset.n_vars(), 2);
        assert_eq!(dataset.var.ids(), ["GeneA".to_string(), "GeneB".into()]);
    }

    #[test]
    fn name_count_mismatch_is_parse_error() {
        let decoded = DecodedMatrix {
            values: arr2(&[[1.0, 2.0]]),
            row_names: vec!["c1".into()],
            col_names: vec!["GeneA".into()],
        };
        assert_matches!(into_dataset(decoded), Err(CellstackError::Parse(_)));
    }

    #[test]
    fn unsupported_decoder_yields_parse_error() {
        let err = UnsupportedLegacyDecoder.decode(b"X\n").unwrap_err();
        assert_matches!(err, CellstackError::Parse(_));
    }
}
