use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::write::GzEncoder;
use flate2::Compression;

use cellstack::catalog::CatalogWalker;
use cellstack::domain::Category;
use cellstack::error::CellstackError;
use cellstack::legacy::UnsupportedLegacyDecoder;
use cellstack::store::{BlobStore, ObjectInfo};

#[derive(Default)]
struct MemoryStore {
    objects: BTreeMap<String, Vec<u8>>,
    fail_transport: bool,
    missing_prefixes: Vec<String>,
}

impl MemoryStore {
    fn insert(&mut self, key: &str, bytes: &[u8]) {
        self.objects.insert(key.to_string(), bytes.to_vec());
    }
}

impl BlobStore for MemoryStore {
    fn list(
        &self,
        prefix: &str,
        _delimiter: Option<char>,
    ) -> Result<Vec<ObjectInfo>, CellstackError> {
        if self.fail_transport {
            return Err(CellstackError::Transport("connection refused".to_string()));
        }
        if self.missing_prefixes.iter().any(|p| prefix.starts_with(p)) {
            return Err(CellstackError::NotFound(prefix.to_string()));
        }
        Ok(self
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, bytes)| ObjectInfo {
                key: key.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, CellstackError> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| CellstackError::NotFound(key.to_string()))
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), CellstackError> {
        let bytes = self.get(key)?;
        std::fs::write(destination, bytes)
            .map_err(|err| CellstackError::Filesystem(err.to_string()))
    }
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn missing_prefix_yields_empty_manifest() {
    let store = MemoryStore {
        missing_prefixes: vec!["root/ghost".to_string()],
        ..MemoryStore::default()
    };
    let walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    let manifest = walker.walk_study("root/ghost").unwrap();
    assert!(manifest.is_empty());
}

#[test]
fn empty_listing_yields_empty_manifest() {
    let walker = CatalogWalker::new(MemoryStore::default(), UnsupportedLegacyDecoder);
    let manifest = walker.walk_study("root/study9").unwrap();
    assert!(manifest.is_empty());
}

#[test]
fn transport_failure_aborts_the_walk() {
    let store = MemoryStore {
        fail_transport: true,
        ..MemoryStore::default()
    };
    let walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    assert_matches!(
        walker.walk_study("root/study1"),
        Err(CellstackError::Transport(_))
    );
}

#[test]
fn dual_category_walk_orders_expression_before_cluster() {
    let mut store = MemoryStore::default();
    // BTreeMap iteration would put cluster first; the sub-walk order must win.
    store.insert(
        "root/study1/cluster/clusters.csv",
        b"NAME,X,Y\nc1,0.1,0.2\n",
    );
    store.insert(
        "root/study1/expression/counts.csv",
        b"cell,GeneA,GeneB\nc1,1,2\nc2,3,4\n",
    );

    let walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    let manifest = walker.walk_study("root/study1").unwrap();

    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest[0].category, Category::Expression);
    assert_eq!(manifest[0].file_name, "counts.csv");
    assert_eq!(manifest[1].category, Category::Cluster);
    let dataset = manifest[0].data.as_dataset().unwrap();
    assert_eq!(dataset.n_obs(), 2);
    assert_eq!(dataset.n_vars(), 2);
    let table = manifest[1].data.as_table().unwrap();
    assert_eq!(table.n_rows(), 1);
}

#[test]
fn gzipped_expression_object_is_unwrapped_and_parsed() {
    let mut store = MemoryStore::default();
    store.insert(
        "root/study1/expression/data.csv.gz",
        &gzip(b"cell,GeneA\nc1,7\n"),
    );

    let walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    let manifest = walker.walk_study("root/study1").unwrap();

    assert_eq!(manifest.len(), 1);
    let dataset = manifest[0].data.as_dataset().unwrap();
    assert_eq!(dataset.matrix[[0, 0]], 7.0);
}

#[test]
fn malformed_objects_are_skipped_not_fatal() {
    let mut store = MemoryStore::default();
    store.insert(
        "root/study1/expression/good.csv",
        b"cell,GeneA\nc1,1\nc2,2\n",
    );
    store.insert("root/study1/expression/bad.csv", b"cell,GeneA\nc1,oops\n");
    // No legacy decoder wired, so this parses as a typed error and is skipped.
    store.insert("root/study1/expression/legacy.rds", b"\x58\x0a");
    // Key with too few segments.
    store.insert("root/study1/orphan.csv", b"cell,GeneA\nc1,1\n");

    let walker = CatalogWalker::new(store, UnsupportedLegacyDecoder);
    let manifest = walker.walk_prefix("root/study1", None).unwrap();

    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].file_name, "good.csv");
}

#[test]
fn directory_bundle_is_staged_normalized_and_parsed() {
    let genes = b"ENSG01\tGeneA\nENSG02\tGeneB\n";
    let barcodes = b"AAAC-1\nAAAG-1\n";
    let mtx = b"%%MatrixMarket matrix coordinate real general\n2 2 3\n1 1 5\n2 1 1\n2 2 4\n";

    let mut store = MemoryStore::default();
    store.insert(
        "root/study1/expression/sample1/sample_matrix.mtx.gz",
        &gzip(mtx),
    );
    store.insert(
        "root/study1/expression/sample1/sample_genes.tsv.gz",
        &gzip(genes),
    );
    store.insert(
        "root/study1/expression/sample1/sample_barcodes.tsv.gz",
        &gzip(barcodes),
    );

    let staging = tempfile::tempdir().unwrap();
    let staging_root = camino::Utf8PathBuf::from_path_buf(staging.path().to_path_buf()).unwrap();
    let walker =
        CatalogWalker::new(store, UnsupportedLegacyDecoder).with_staging_root(staging_root);
    let manifest = walker.walk_study("root/study1").unwrap();

    assert_eq!(manifest.len(), 1, "three members collapse into one entry");
    assert_eq!(manifest[0].file_name, "sample1");
    let dataset = manifest[0].data.as_dataset().unwrap();
    // Feature count equals the genes-file line count.
    assert_eq!(dataset.n_vars(), 2);
    assert_eq!(dataset.n_obs(), 2);
    assert_eq!(dataset.matrix[[0, 0]], 5.0);
    assert_eq!(dataset.matrix[[0, 1]], 1.0);
    assert_eq!(dataset.matrix[[1, 1]], 4.0);
    assert_eq!(
        dataset.var.ids(),
        ["GeneA".to_string(), "GeneB".to_string()]
    );
}
