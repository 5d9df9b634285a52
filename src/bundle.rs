use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::CellstackError;
use crate::parse::tenx;

// Role table: `.mtx(.gz)` is the matrix, a `.tsv(.gz)` containing "genes" is
// the features file, any other `.tsv` the barcodes file. `None` means the
// file plays no role and is left alone.
pub fn canonical_name(file_name: &str) -> Option<&'static str> {
    if file_name.ends_with(".mtx") {
        return Some("matrix.mtx");
    }
    if file_name.ends_with(".mtx.gz") {
        return Some("matrix.mtx.gz");
    }
    if file_name.ends_with(".tsv") {
        return Some(if file_name.contains("genes") {
            "genes.tsv"
        } else {
            "barcodes.tsv"
        });
    }
    if file_name.ends_with(".tsv.gz") {
        return Some(if file_name.contains("genes") {
            "genes.tsv.gz"
        } else {
            "barcodes.tsv.gz"
        });
    }
    None
}

/// Renames a staged bundle's files to the canonical matrix/genes/barcodes
/// triplet. A file already holding a canonical name is never overwritten;
/// the rename is skipped with a warning since a stale file from an earlier
/// bundle can shadow the fresh one. Not safe to run concurrently against
/// the same directory.
pub fn normalize_bundle_dir(dir: &Path) -> Result<(), CellstackError> {
    let entries =
        fs::read_dir(dir).map_err(|err| CellstackError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| CellstackError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();

        let Some(new_name) = canonical_name(&file_name) else {
            debug!(file = %file_name, "no rename needed");
            continue;
        };
        if file_name == new_name {
            continue;
        }
        let destination = dir.join(new_name);
        if destination.exists() {
            warn!(
                file = %file_name,
                existing = new_name,
                "skipping rename: canonical file already present, possibly stale"
            );
            continue;
        }
        fs::rename(&path, &destination)
            .map_err(|err| CellstackError::Filesystem(err.to_string()))?;
        debug!(from = %file_name, to = new_name, "renamed bundle file");
    }
    Ok(())
}

pub fn normalize_and_read(dir: &Path) -> Result<Dataset, CellstackError> {
    normalize_bundle_dir(dir)?;
    tenx::read_mtx_dir(dir)
}
