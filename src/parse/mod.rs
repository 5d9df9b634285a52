pub mod delim;
pub mod h5;
pub mod tenx;

use crate::dataset::{Dataset, Table};
use crate::domain::FormatKind;
use crate::error::CellstackError;
use crate::legacy::{self, LegacyDecoder};
use crate::sniff;

#[derive(Debug, Clone)]
pub enum ParsedData {
    Expression(Dataset),
    Table(Table),
}

impl ParsedData {
    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            ParsedData::Expression(dataset) => Some(dataset),
            ParsedData::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            ParsedData::Table(table) => Some(table),
            ParsedData::Expression(_) => None,
        }
    }
}

// Directory bundles operate on staged files, not byte buffers, and go
// through bundle::normalize_and_read instead.
pub fn parse_expression(
    kind: &FormatKind,
    key: &str,
    bytes: &[u8],
    legacy_decoder: &dyn LegacyDecoder,
) -> Result<Dataset, CellstackError> {
    match kind {
        FormatKind::DelimitedCsv => delim::read_expression(bytes, b','),
        FormatKind::DelimitedTsv => delim::read_expression(bytes, b'\t'),
        FormatKind::Hdf5MatrixBundle => tenx::read_10x_h5(bytes),
        FormatKind::Hdf5AnnotatedMatrix => h5::read_h5ad(bytes),
        FormatKind::LegacySerialized => legacy::into_dataset(legacy_decoder.decode(bytes)?),
        FormatKind::GzipWrapped(inner) => {
            let decompressed = sniff::decompress(bytes)
                .map_err(|err| CellstackError::Parse(format!("gzip {key}: {err}")))?;
            parse_expression(inner, key, &decompressed, legacy_decoder)
        }
        FormatKind::DirectoryBundle => Err(CellstackError::Parse(format!(
            "directory bundle {key} must be staged before parsing"
        ))),
        FormatKind::Unrecognized => Err(CellstackError::FormatUnrecognized(key.to_string())),
    }
}

pub fn parse_table(
    kind: &FormatKind,
    key: &str,
    bytes: &[u8],
) -> Result<Table, CellstackError> {
    match kind {
        FormatKind::DelimitedCsv => delim::read_table(bytes, b','),
        FormatKind::DelimitedTsv => delim::read_table(bytes, b'\t'),
        FormatKind::GzipWrapped(inner) => {
            let decompressed = sniff::decompress(bytes)
                .map_err(|err| CellstackError::Parse(format!("gzip {key}: {err}")))?;
            parse_table(inner, key, &decompressed)
        }
        _ => Err(CellstackError::FormatUnrecognized(format!(
            "{key}: {kind} is not tabular"
        ))),
    }
}
