use std::io::{self, Write};

use serde::Serialize;

use crate::catalog::Manifest;
use crate::parse::ParsedData;
use crate::pipeline::PipelineOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub walked_at: String,
    pub entries: Vec<WalkEntryReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkEntryReport {
    pub study: String,
    pub category: String,
    pub file_name: String,
    pub kind: String,
    pub rows: usize,
    pub columns: usize,
}

impl WalkReport {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let entries = manifest
            .iter()
            .map(|entry| {
                let (kind, rows, columns) = match &entry.data {
                    ParsedData::Expression(dataset) => {
                        ("dataset".to_string(), dataset.n_obs(), dataset.n_vars())
                    }
                    ParsedData::Table(table) => {
                        ("table".to_string(), table.n_rows(), table.n_cols())
                    }
                };
                WalkEntryReport {
                    study: entry.study.clone(),
                    category: entry.category.to_string(),
                    file_name: entry.file_name.clone(),
                    kind,
                    rows,
                    columns,
                }
            })
            .collect();
        Self {
            walked_at: chrono::Utc::now().to_rfc3339(),
            entries,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QcReport {
    pub cells_before: usize,
    pub cells_after: usize,
    pub features: usize,
    pub predicted_doublets: usize,
    pub highly_variable: usize,
}

impl QcReport {
    pub fn new(cells_before: usize, outcome: &PipelineOutcome) -> Self {
        let result = &outcome.dataset;
        let highly_variable = result
            .var
            .bool_column("highly_variable")
            .map(|flags| flags.iter().filter(|&&flag| flag).count())
            .unwrap_or(0);
        Self {
            cells_before,
            cells_after: result.n_obs(),
            features: result.n_vars(),
            predicted_doublets: outcome.predicted_doublets,
            highly_variable,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_walk(report: &WalkReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_qc(report: &QcReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
