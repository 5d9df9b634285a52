use std::collections::HashSet;

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::bundle;
use crate::domain::{Category, ObjectKey};
use crate::error::CellstackError;
use crate::legacy::LegacyDecoder;
use crate::parse::{self, ParsedData};
use crate::sniff;
use crate::store::BlobStore;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub study: String,
    pub category: Category,
    pub file_name: String,
    pub data: ParsedData,
}

pub type Manifest = Vec<CatalogEntry>;

/// Per-object failures become skip + log entries; walk-level failures
/// (transport, auth) propagate.
pub struct CatalogWalker<S: BlobStore, L: LegacyDecoder> {
    store: S,
    legacy_decoder: L,
    staging_root: Option<Utf8PathBuf>,
}

impl<S: BlobStore, L: LegacyDecoder> CatalogWalker<S, L> {
    pub fn new(store: S, legacy_decoder: L) -> Self {
        Self {
            store,
            legacy_decoder,
            staging_root: None,
        }
    }

    // Two concurrent walks must not share one staging root.
    pub fn with_staging_root(mut self, root: Utf8PathBuf) -> Self {
        self.staging_root = Some(root);
        self
    }

    // Expression entries come first, then cluster entries.
    pub fn walk_study(&self, root_prefix: &str) -> Result<Manifest, CellstackError> {
        let root = root_prefix.trim_end_matches('/');
        let mut manifest = self.walk_prefix(&format!("{root}/expression"), None)?;
        manifest.extend(self.walk_prefix(&format!("{root}/cluster"), None)?);
        Ok(manifest)
    }

    /// A missing prefix yields an empty manifest; a transport failure aborts
    /// the walk.
    pub fn walk_prefix(
        &self,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Manifest, CellstackError> {
        let objects = match self.store.list(prefix, delimiter) {
            Ok(objects) => objects,
            Err(CellstackError::NotFound(_)) => {
                debug!(prefix, "prefix not found; empty manifest");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut manifest = Vec::new();
        let mut handled_bundles = HashSet::new();
        for object in objects {
            match self.ingest_object(&object.key, &mut handled_bundles) {
                Ok(Some(entry)) => manifest.push(entry),
                Ok(None) => {}
                Err(err) if err.is_skippable() => {
                    warn!(key = %object.key, error = %err, "skipping object");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(manifest)
    }

    fn ingest_object(
        &self,
        key: &str,
        handled_bundles: &mut HashSet<String>,
    ) -> Result<Option<CatalogEntry>, CellstackError> {
        let object = ObjectKey::parse(key)?;

        if object.is_directory {
            let bundle_prefix = bundle_prefix(key)?;
            if !handled_bundles.insert(bundle_prefix.clone()) {
                return Ok(None);
            }
            return self.ingest_bundle(&object, &bundle_prefix).map(Some);
        }

        let bytes = self.store.get(key)?;
        let kind = sniff::sniff_object(key, &bytes);
        debug!(key, %kind, "classified object");

        let data = match object.category {
            Category::Expression => ParsedData::Expression(parse::parse_expression(
                &kind,
                key,
                &bytes,
                &self.legacy_decoder,
            )?),
            Category::Cluster | Category::Annotation => {
                ParsedData::Table(parse::parse_table(&kind, key, &bytes)?)
            }
        };

        Ok(Some(CatalogEntry {
            study: object.study,
            category: object.category,
            file_name: object.file_name,
            data,
        }))
    }

    fn ingest_bundle(
        &self,
        object: &ObjectKey,
        bundle_prefix: &str,
    ) -> Result<CatalogEntry, CellstackError> {
        let members = self.store.list(bundle_prefix, None)?;
        if members.is_empty() {
            return Err(CellstackError::NotFound(bundle_prefix.to_string()));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("cellstack-bundle");
        let staging = match &self.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root.as_std_path())
                    .map_err(|err| CellstackError::Filesystem(err.to_string()))?;
                builder
                    .tempdir_in(root.as_std_path())
                    .map_err(|err| CellstackError::Filesystem(err.to_string()))?
            }
            None => builder
                .tempdir()
                .map_err(|err| CellstackError::Filesystem(err.to_string()))?,
        };

        for member in &members {
            if member.key.ends_with('/') {
                continue;
            }
            let name = member
                .key
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| CellstackError::ContractViolation(member.key.clone()))?;
            self.store
                .download(&member.key, &staging.path().join(name))?;
        }

        let dataset = bundle::normalize_and_read(staging.path())?;
        Ok(CatalogEntry {
            study: object.study.clone(),
            category: object.category,
            file_name: object.file_name.clone(),
            data: ParsedData::Expression(dataset),
        })
    }
}

// The first four segments of a member key name its bundle.
fn bundle_prefix(key: &str) -> Result<String, CellstackError> {
    let parts = key.trim_end_matches('/').split('/').collect::<Vec<_>>();
    if parts.len() < 4 {
        return Err(CellstackError::ContractViolation(key.to_string()));
    }
    Ok(format!("{}/", parts[..4].join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_prefix_from_member_key() {
        let prefix = bundle_prefix("root/study1/expression/sample1/matrix.mtx.gz").unwrap();
        assert_eq!(prefix, "root/study1/expression/sample1/");
        let prefix = bundle_prefix("root/study1/expression/sample1/").unwrap();
        assert_eq!(prefix, "root/study1/expression/sample1/");
    }
}
