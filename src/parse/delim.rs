use csv::ReaderBuilder;
use ndarray::Array2;

use crate::dataset::{Dataset, Table};
use crate::error::CellstackError;

// Header row holds feature identifiers, first column holds cell identifiers.
pub fn read_expression(bytes: &[u8], delimiter: u8) -> Result<Dataset, CellstackError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| CellstackError::Parse(err.to_string()))?;
    if headers.len() < 2 {
        return Err(CellstackError::Parse(
            "expression table needs a cell-id column and at least one feature".to_string(),
        ));
    }
    let var_ids: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut obs_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| CellstackError::Parse(err.to_string()))?;
        if record.len() != var_ids.len() + 1 {
            return Err(CellstackError::Parse(format!(
                "row {} has {} fields, expected {}",
                obs_ids.len() + 1,
                record.len(),
                var_ids.len() + 1
            )));
        }
        let cell_id = record
            .get(0)
            .ok_or_else(|| CellstackError::Parse("missing cell identifier".to_string()))?;
        obs_ids.push(cell_id.to_string());
        for field in record.iter().skip(1) {
            let value = field.trim().parse::<f64>().map_err(|_| {
                CellstackError::Parse(format!("non-numeric value {field:?} for cell {cell_id}"))
            })?;
            values.push(value);
        }
    }

    let matrix = Array2::from_shape_vec((obs_ids.len(), var_ids.len()), values)
        .map_err(|err| CellstackError::Parse(err.to_string()))?;
    Dataset::new(matrix, obs_ids, var_ids)
}

pub fn read_table(bytes: &[u8], delimiter: u8) -> Result<Table, CellstackError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|err| CellstackError::Parse(err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err(CellstackError::Parse("table has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| CellstackError::Parse(err.to_string()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table { headers, rows })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn read_csv_expression() {
        let bytes = b"cell,GeneA,GeneB\nc1,1,0\nc2,3.5,2\n";
        let dataset = read_expression(bytes, b',').unwrap();
        assert_eq!(dataset.n_obs(), 2);
        assert_eq!(dataset.n_vars(), 2);
        assert_eq!(dataset.obs.ids(), ["c1".to_string(), "c2".into()]);
        assert_eq!(dataset.matrix[[1, 0]], 3.5);
    }

    #[test]
    fn read_tsv_expression() {
        let bytes = b"cell\tGeneA\nc1\t7\n";
        let dataset = read_expression(bytes, b'\t').unwrap();
        assert_eq!(dataset.matrix[[0, 0]], 7.0);
    }

    #[test]
    fn non_numeric_value_is_parse_error() {
        let bytes = b"cell,GeneA\nc1,abc\n";
        assert_matches!(read_expression(bytes, b','), Err(CellstackError::Parse(_)));
    }

    #[test]
    fn ragged_row_is_parse_error() {
        let bytes = b"cell,GeneA,GeneB\nc1,1\n";
        assert_matches!(read_expression(bytes, b','), Err(CellstackError::Parse(_)));
    }

    #[test]
    fn read_cluster_table() {
        let bytes = b"NAME,X,Y,cluster\nc1,0.1,0.2,T cells\nc2,0.5,0.9,B cells\n";
        let table = read_table(bytes, b',').unwrap();
        assert_eq!(table.n_cols(), 4);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.rows[1][3], "B cells");
    }
}
