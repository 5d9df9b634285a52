use std::path::Path;

use ndarray::Array2;

use crate::dataset::{Column, Dataset};
use crate::error::CellstackError;
use crate::parse::h5::{check_indptr, h5err, read_string_dataset, stage_bytes};
use crate::sniff;

const MATRIX_GROUP: &str = "matrix";
const FEATURES_GROUP: &str = "features";
const DATASET_DATA: &str = "data";
const DATASET_INDICES: &str = "indices";
const DATASET_INDPTR: &str = "indptr";
const DATASET_SHAPE: &str = "shape";
const DATASET_BARCODES: &str = "barcodes";

// 10x layout: a CSC sparse matrix (features × barcodes, one column per
// barcode) plus barcode and feature vectors under the `matrix` group.
pub fn read_10x_h5(bytes: &[u8]) -> Result<Dataset, CellstackError> {
    let (_dir, path) = stage_bytes(bytes)?;
    read_10x_h5_file(&path)
}

pub fn read_10x_h5_file(path: &Path) -> Result<Dataset, CellstackError> {
    let file = hdf5::File::open(path).map_err(h5err)?;
    let matrix_group = file.group(MATRIX_GROUP).map_err(h5err)?;

    let shape = matrix_group
        .dataset(DATASET_SHAPE)
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;
    let [n_features, n_barcodes] = shape.as_slice() else {
        return Err(CellstackError::Parse(format!(
            "matrix shape has {} entries, expected 2",
            shape.len()
        )));
    };
    let (n_features, n_barcodes) = (*n_features as usize, *n_barcodes as usize);

    let data = matrix_group
        .dataset(DATASET_DATA)
        .map_err(h5err)?
        .read_1d::<f64>()
        .map_err(h5err)?;
    let indices = matrix_group
        .dataset(DATASET_INDICES)
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;
    let indptr = matrix_group
        .dataset(DATASET_INDPTR)
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;
    if indptr.len() != n_barcodes + 1 || data.len() != indices.len() {
        return Err(CellstackError::Parse(
            "CSC matrix arrays are inconsistent with the declared shape".to_string(),
        ));
    }
    check_indptr(&indptr, data.len())?;

    let barcodes = read_string_dataset(&matrix_group, DATASET_BARCODES)?;
    let features = matrix_group.group(FEATURES_GROUP).map_err(h5err)?;
    let symbols = read_string_dataset(&features, "name")?;
    let gene_ids = if features.link_exists("id") {
        Some(read_string_dataset(&features, "id")?)
    } else {
        None
    };
    if barcodes.len() != n_barcodes || symbols.len() != n_features {
        return Err(CellstackError::Parse(format!(
            "bundle names ({} barcodes, {} features) disagree with shape {n_barcodes}×{n_features}",
            barcodes.len(),
            symbols.len()
        )));
    }

    // Expand barcode-major CSC into the dense cells × features orientation.
    let mut matrix = Array2::<f64>::zeros((n_barcodes, n_features));
    for barcode in 0..n_barcodes {
        let start = indptr[barcode] as usize;
        let end = indptr[barcode + 1] as usize;
        for k in start..end {
            let feature = indices[k] as usize;
            if feature >= n_features {
                return Err(CellstackError::Parse(format!(
                    "feature index {feature} out of range for {n_features} features"
                )));
            }
            matrix[[barcode, feature]] = data[k];
        }
    }

    let mut dataset = Dataset::new(matrix, barcodes, symbols)?;
    if let Some(ids) = gene_ids {
        dataset.var.set_column("gene_ids", Column::Text(ids))?;
    }
    dataset.make_var_names_unique();
    Ok(dataset)
}

// Expects the canonical triplet; vendor-named bundles go through
// bundle::normalize_bundle_dir first.
pub fn read_mtx_dir(dir: &Path) -> Result<Dataset, CellstackError> {
    let matrix_bytes = read_member(dir, "matrix.mtx")?;
    let genes_bytes = read_member(dir, "genes.tsv")?;
    let barcodes_bytes = read_member(dir, "barcodes.tsv")?;

    let (symbols, gene_ids) = parse_genes(&genes_bytes)?;
    let barcodes = parse_lines(&barcodes_bytes);
    let matrix = parse_matrix_market(&matrix_bytes, symbols.len(), barcodes.len())?;

    let mut dataset = Dataset::new(matrix, barcodes, symbols)?;
    if let Some(ids) = gene_ids {
        dataset.var.set_column("gene_ids", Column::Text(ids))?;
    }
    dataset.make_var_names_unique();
    Ok(dataset)
}

fn read_member(dir: &Path, name: &str) -> Result<Vec<u8>, CellstackError> {
    let plain = dir.join(name);
    let gz = dir.join(format!("{name}.gz"));
    if plain.exists() {
        return std::fs::read(&plain).map_err(|err| CellstackError::Filesystem(err.to_string()));
    }
    if gz.exists() {
        let bytes =
            std::fs::read(&gz).map_err(|err| CellstackError::Filesystem(err.to_string()))?;
        return sniff::decompress(&bytes)
            .map_err(|err| CellstackError::Parse(format!("gzip {name}: {err}")));
    }
    Err(CellstackError::NotFound(format!(
        "{} in bundle {}",
        name,
        dir.display()
    )))
}

// genes.tsv carries `<ensembl-id>\t<symbol>` per line; symbol-only files
// have a single column.
fn parse_genes(bytes: &[u8]) -> Result<(Vec<String>, Option<Vec<String>>), CellstackError> {
    let text = String::from_utf8_lossy(bytes);
    let mut symbols = Vec::new();
    let mut ids = Vec::new();
    let mut has_ids = false;
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((id, symbol)) => {
                has_ids = true;
                ids.push(id.to_string());
                symbols.push(symbol.split('\t').next().unwrap_or(symbol).to_string());
            }
            None => symbols.push(line.to_string()),
        }
    }
    if symbols.is_empty() {
        return Err(CellstackError::Parse("genes file is empty".to_string()));
    }
    if has_ids && ids.len() != symbols.len() {
        return Err(CellstackError::Parse(
            "genes file mixes one- and two-column rows".to_string(),
        ));
    }
    Ok((symbols, has_ids.then_some(ids)))
}

fn parse_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').next().unwrap_or(line).to_string())
        .collect()
}

// MatrixMarket coordinate format, genes × cells with 1-based indices,
// transposed into the cells × features orientation on the fly.
fn parse_matrix_market(
    bytes: &[u8],
    n_genes: usize,
    n_cells: usize,
) -> Result<Array2<f64>, CellstackError> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().filter(|line| !line.starts_with('%'));
    let dims = lines
        .next()
        .ok_or_else(|| CellstackError::Parse("matrix file has no dimension line".to_string()))?;
    let dims = dims
        .split_whitespace()
        .map(|field| field.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| CellstackError::Parse(format!("matrix dimension line: {err}")))?;
    let [rows, cols, nnz] = dims.as_slice() else {
        return Err(CellstackError::Parse(
            "matrix dimension line needs rows, cols, entries".to_string(),
        ));
    };
    if *rows != n_genes || *cols != n_cells {
        return Err(CellstackError::Parse(format!(
            "matrix is {rows}×{cols} but bundle lists {n_genes} genes and {n_cells} barcodes"
        )));
    }

    let mut matrix = Array2::<f64>::zeros((n_cells, n_genes));
    let mut seen = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(gene), Some(cell), Some(value)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(CellstackError::Parse(format!(
                "malformed matrix entry: {line:?}"
            )));
        };
        let gene = gene
            .parse::<usize>()
            .map_err(|err| CellstackError::Parse(err.to_string()))?;
        let cell = cell
            .parse::<usize>()
            .map_err(|err| CellstackError::Parse(err.to_string()))?;
        let value = value
            .parse::<f64>()
            .map_err(|err| CellstackError::Parse(err.to_string()))?;
        if gene == 0 || gene > n_genes || cell == 0 || cell > n_cells {
            return Err(CellstackError::Parse(format!(
                "matrix entry ({gene}, {cell}) out of range"
            )));
        }
        matrix[[cell - 1, gene - 1]] = value;
        seen += 1;
    }
    if seen != *nnz {
        return Err(CellstackError::Parse(format!(
            "matrix lists {nnz} entries but {seen} were present"
        )));
    }
    Ok(matrix)
}
