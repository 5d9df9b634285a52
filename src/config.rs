use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::QcThresholds;
use crate::error::CellstackError;
use crate::store::StoreConfig;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub store: StoreConfig,
    #[serde(default)]
    pub studies: Vec<StudyEntry>,
    #[serde(default)]
    pub thresholds: Option<QcThresholds>,
    #[serde(default)]
    pub staging_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StudyEntry {
    Shorthand(String),
    Detailed(StudyEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StudyEntryObject {
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: StoreConfig,
    pub studies: Vec<String>,
    pub thresholds: QcThresholds,
    pub staging_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CellstackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("cellstack.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CellstackError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CellstackError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CellstackError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CellstackError> {
        let thresholds = config.thresholds.unwrap_or_default();
        thresholds.validate()?;

        let studies = config
            .studies
            .into_iter()
            .map(|entry| match entry {
                StudyEntry::Shorthand(prefix) => prefix,
                StudyEntry::Detailed(obj) => obj.prefix,
            })
            .map(|prefix| prefix.trim_matches('/').to_string())
            .collect::<Vec<_>>();
        if studies.iter().any(|prefix| prefix.is_empty()) {
            return Err(CellstackError::ConfigParse(
                "empty study prefix".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            store: config.store,
            studies,
            thresholds,
            staging_dir: config.staging_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            schema_version: None,
            store: StoreConfig {
                endpoint: "https://objects.example.com".to_string(),
                bucket: "cells".to_string(),
                region: None,
            },
            studies: vec![
                StudyEntry::Shorthand("scp/study1/".to_string()),
                StudyEntry::Detailed(StudyEntryObject {
                    prefix: "panglao/study2".to_string(),
                }),
            ],
            thresholds: None,
            staging_dir: None,
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.studies, ["scp/study1", "panglao/study2"]);
        assert_eq!(resolved.thresholds, QcThresholds::default());
    }

    #[test]
    fn invalid_thresholds_rejected() {
        let config = Config {
            schema_version: Some(1),
            store: StoreConfig {
                endpoint: "https://objects.example.com".to_string(),
                bucket: "cells".to_string(),
                region: None,
            },
            studies: Vec::new(),
            thresholds: Some(QcThresholds {
                max_pct_mito: 250.0,
                ..QcThresholds::default()
            }),
            staging_dir: None,
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(CellstackError::InvalidThresholds(_))
        );
    }
}
