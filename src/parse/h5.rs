use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use hdf5::types::{VarLenAscii, VarLenUnicode};
use hdf5::Group;
use ndarray::Array2;
use tempfile::TempDir;

use crate::dataset::Dataset;
use crate::error::CellstackError;

const X_DATASET: &str = "X";
const OBS_GROUP: &str = "obs";
const VAR_GROUP: &str = "var";
const LAYERS_GROUP: &str = "layers";
const INDEX_DATASET: &str = "_index";
const SHAPE_ATTR: &str = "shape";

pub(crate) fn h5err(err: hdf5::Error) -> CellstackError {
    CellstackError::Parse(err.to_string())
}

// Stages an in-memory container to a temp file; the HDF5 library opens
// paths, not buffers. The TempDir must outlive the open file handle.
pub(crate) fn stage_bytes(bytes: &[u8]) -> Result<(TempDir, PathBuf), CellstackError> {
    let dir = tempfile::Builder::new()
        .prefix("cellstack-h5")
        .tempdir()
        .map_err(|err| CellstackError::Filesystem(err.to_string()))?;
    let path = dir.path().join("object.h5");
    std::fs::write(&path, bytes).map_err(|err| CellstackError::Filesystem(err.to_string()))?;
    Ok((dir, path))
}

// Index pointers come straight from the container and are used as slice
// bounds: they must start at 0, never decrease, and end exactly at the
// stored-entry count.
pub(crate) fn check_indptr(indptr: &[i64], nnz: usize) -> Result<(), CellstackError> {
    if indptr.first() != Some(&0) {
        return Err(CellstackError::Parse(
            "sparse index pointer must start at 0".to_string(),
        ));
    }
    if indptr.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(CellstackError::Parse(
            "sparse index pointer decreases".to_string(),
        ));
    }
    let last = indptr.last().copied().unwrap_or(0);
    if last != nnz as i64 {
        return Err(CellstackError::Parse(format!(
            "sparse index pointer ends at {last} but {nnz} entries are stored"
        )));
    }
    Ok(())
}

pub(crate) fn read_string_dataset(
    group: &Group,
    name: &str,
) -> Result<Vec<String>, CellstackError> {
    let dataset = group.dataset(name).map_err(h5err)?;
    if let Ok(values) = dataset.read_1d::<VarLenUnicode>() {
        return Ok(values.iter().map(|value| value.to_string()).collect());
    }
    let values = dataset.read_1d::<VarLenAscii>().map_err(h5err)?;
    Ok(values.iter().map(|value| value.to_string()).collect())
}

pub(crate) fn write_string_dataset(
    group: &Group,
    name: &str,
    values: &[String],
) -> Result<(), CellstackError> {
    let data = values
        .iter()
        .map(|value| {
            value
                .parse::<VarLenUnicode>()
                .map_err(|err| CellstackError::Parse(err.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    group
        .new_dataset_builder()
        .with_data(&data)
        .create(name)
        .map_err(h5err)?;
    Ok(())
}

pub fn read_h5ad(bytes: &[u8]) -> Result<Dataset, CellstackError> {
    let (_dir, path) = stage_bytes(bytes)?;
    read_h5ad_file(&path)
}

// Container layout: `X` (dense 2-D or CSR group with a `shape` attribute),
// `obs/_index`, `var/_index`, any `layers/*`.
pub fn read_h5ad_file(path: &Path) -> Result<Dataset, CellstackError> {
    let file = hdf5::File::open(path).map_err(h5err)?;

    let matrix = read_x(&file)?;

    let obs = file.group(OBS_GROUP).map_err(h5err)?;
    let obs_ids = read_string_dataset(&obs, INDEX_DATASET)?;
    let var = file.group(VAR_GROUP).map_err(h5err)?;
    let var_ids = read_string_dataset(&var, INDEX_DATASET)?;

    let mut layers = BTreeMap::new();
    if file.link_exists(LAYERS_GROUP) {
        let group = file.group(LAYERS_GROUP).map_err(h5err)?;
        for name in group.member_names().map_err(h5err)? {
            let layer = group
                .dataset(&name)
                .map_err(h5err)?
                .read_2d::<f64>()
                .map_err(h5err)?;
            layers.insert(name, layer);
        }
    }

    let mut dataset = Dataset::new(matrix, obs_ids, var_ids)?;
    dataset.layers = layers;
    dataset.validate()?;
    Ok(dataset)
}

fn read_x(file: &hdf5::File) -> Result<Array2<f64>, CellstackError> {
    if let Ok(dataset) = file.dataset(X_DATASET) {
        return dataset.read_2d::<f64>().map_err(h5err);
    }
    // CSR-encoded X: data/indices/indptr plus a shape attribute.
    let group = file.group(X_DATASET).map_err(h5err)?;
    let shape = group
        .attr(SHAPE_ATTR)
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;
    let [n_obs, n_vars] = shape.as_slice() else {
        return Err(CellstackError::Parse(format!(
            "X shape attribute has {} entries, expected 2",
            shape.len()
        )));
    };
    let data = group
        .dataset("data")
        .map_err(h5err)?
        .read_1d::<f64>()
        .map_err(h5err)?;
    let indices = group
        .dataset("indices")
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;
    let indptr = group
        .dataset("indptr")
        .map_err(h5err)?
        .read_raw::<i64>()
        .map_err(h5err)?;

    let (n_obs, n_vars) = (*n_obs as usize, *n_vars as usize);
    if indptr.len() != n_obs + 1 || data.len() != indices.len() {
        return Err(CellstackError::Parse(
            "CSR X arrays are inconsistent with the declared shape".to_string(),
        ));
    }
    check_indptr(&indptr, data.len())?;
    let mut matrix = Array2::<f64>::zeros((n_obs, n_vars));
    for row in 0..n_obs {
        let start = indptr[row] as usize;
        let end = indptr[row + 1] as usize;
        for k in start..end {
            let col = indices[k] as usize;
            if col >= n_vars {
                return Err(CellstackError::Parse(format!(
                    "CSR column index {col} out of range for {n_vars} features"
                )));
            }
            matrix[[row, col]] = data[k];
        }
    }
    Ok(matrix)
}

/// Writes a dense container readable by `read_h5ad_file`. The raw snapshot
/// is not persisted.
pub fn write_h5ad(dataset: &Dataset, path: &Path) -> Result<(), CellstackError> {
    dataset.validate()?;
    let file = hdf5::File::create(path).map_err(h5err)?;
    file.new_dataset_builder()
        .with_data(&dataset.matrix)
        .create(X_DATASET)
        .map_err(h5err)?;

    let obs = file.create_group(OBS_GROUP).map_err(h5err)?;
    write_string_dataset(&obs, INDEX_DATASET, dataset.obs.ids())?;
    let var = file.create_group(VAR_GROUP).map_err(h5err)?;
    write_string_dataset(&var, INDEX_DATASET, dataset.var.ids())?;

    if !dataset.layers.is_empty() {
        let layers = file.create_group(LAYERS_GROUP).map_err(h5err)?;
        for (name, layer) in &dataset.layers {
            layers
                .new_dataset_builder()
                .with_data(layer)
                .create(name.as_str())
                .map_err(h5err)?;
        }
    }
    Ok(())
}
