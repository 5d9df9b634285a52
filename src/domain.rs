use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CellstackError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatKind {
    DelimitedCsv,
    DelimitedTsv,
    // 10x-style container, top-level `matrix` group
    Hdf5MatrixBundle,
    // h5ad-style container, top-level `X`
    Hdf5AnnotatedMatrix,
    LegacySerialized,
    GzipWrapped(Box<FormatKind>),
    DirectoryBundle,
    Unrecognized,
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatKind::DelimitedCsv => write!(f, "delimited-csv"),
            FormatKind::DelimitedTsv => write!(f, "delimited-tsv"),
            FormatKind::Hdf5MatrixBundle => write!(f, "hdf5-matrix-bundle"),
            FormatKind::Hdf5AnnotatedMatrix => write!(f, "hdf5-annotated-matrix"),
            FormatKind::LegacySerialized => write!(f, "legacy-serialized"),
            FormatKind::GzipWrapped(inner) => write!(f, "gzip-wrapped({inner})"),
            FormatKind::DirectoryBundle => write!(f, "directory-bundle"),
            FormatKind::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Expression,
    Cluster,
    Annotation,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Expression => write!(f, "expression"),
            Category::Cluster => write!(f, "cluster"),
            Category::Annotation => write!(f, "annotation"),
        }
    }
}

impl FromStr for Category {
    type Err = CellstackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "expression" => Ok(Category::Expression),
            "cluster" => Ok(Category::Cluster),
            "annotation" => Ok(Category::Annotation),
            other => Err(CellstackError::InvalidCategory(other.to_string())),
        }
    }
}

/// A store key split into `<root>/<study>/<category>/<filename>` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub study: String,
    pub category: Category,
    pub file_name: String,
    pub is_directory: bool,
}

impl ObjectKey {
    pub fn parse(key: &str) -> Result<Self, CellstackError> {
        let is_directory = key.ends_with('/');
        let trimmed = key.trim_end_matches('/');
        let parts = trimmed.split('/').collect::<Vec<_>>();
        if parts.len() < 4 || parts.iter().any(|part| part.is_empty()) {
            return Err(CellstackError::ContractViolation(key.to_string()));
        }
        let category = parts[2].parse::<Category>()?;
        Ok(Self {
            study: parts[1].to_string(),
            category,
            // Directory bundles nest deeper; the segment right under the
            // category names the bundle.
            file_name: parts[3].to_string(),
            is_directory: is_directory || parts.len() > 4,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QcThresholds {
    pub min_counts: f64,
    pub min_genes: usize,
    pub max_genes: usize,
    pub max_pct_mito: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            min_counts: 500.0,
            min_genes: 200,
            max_genes: 6000,
            max_pct_mito: 10.0,
        }
    }
}

impl QcThresholds {
    pub fn validate(&self) -> Result<(), CellstackError> {
        if self.min_genes > self.max_genes {
            return Err(CellstackError::InvalidThresholds(format!(
                "min_genes {} exceeds max_genes {}",
                self.min_genes, self.max_genes
            )));
        }
        if !(0.0..=100.0).contains(&self.max_pct_mito) {
            return Err(CellstackError::InvalidThresholds(format!(
                "max_pct_mito {} outside 0..=100",
                self.max_pct_mito
            )));
        }
        Ok(())
    }
}
