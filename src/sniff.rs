use std::io::Read;

use flate2::read::GzDecoder;

use crate::domain::FormatKind;

const HDF5_MAGIC: [u8; 4] = [0x89, b'H', b'D', b'F'];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TEXT_SNIFF_LEN: usize = 1024;

// Serialized R objects are classified by name alone; the payload is opaque.
const LEGACY_SUFFIXES: [&str; 4] = [".rds", ".Rds", ".RData", ".rdata"];

/// Never fails: unreadable or corrupt input classifies as `Unrecognized` so
/// batch callers can skip and continue. Deterministic for fixed input.
pub fn sniff_object(key: &str, bytes: &[u8]) -> FormatKind {
    if key.ends_with('/') {
        return FormatKind::DirectoryBundle;
    }
    if LEGACY_SUFFIXES.iter().any(|suffix| key.ends_with(suffix)) {
        return FormatKind::LegacySerialized;
    }
    if key.ends_with(".gz") || bytes.starts_with(&GZIP_MAGIC) {
        let inner_key = key.strip_suffix(".gz").unwrap_or(key);
        return match decompress(bytes) {
            Ok(inner) => FormatKind::GzipWrapped(Box::new(sniff_object(inner_key, &inner))),
            Err(_) => FormatKind::Unrecognized,
        };
    }
    if bytes.starts_with(&HDF5_MAGIC) {
        return sniff_hdf5(bytes);
    }
    if bytes.is_empty() {
        return FormatKind::Unrecognized;
    }
    sniff_delimited(key, bytes)
}

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(bytes);
    let mut inner = Vec::new();
    decoder.read_to_end(&mut inner)?;
    Ok(inner)
}

// The container is staged to a temp file because the HDF5 library opens
// paths, not buffers.
fn sniff_hdf5(bytes: &[u8]) -> FormatKind {
    let Ok(dir) = tempfile::Builder::new().prefix("cellstack-sniff").tempdir() else {
        return FormatKind::Unrecognized;
    };
    let path = dir.path().join("probe.h5");
    if std::fs::write(&path, bytes).is_err() {
        return FormatKind::Unrecognized;
    }
    let Ok(file) = hdf5::File::open(&path) else {
        return FormatKind::Unrecognized;
    };
    if file.link_exists("matrix") {
        FormatKind::Hdf5MatrixBundle
    } else if file.link_exists("X") {
        FormatKind::Hdf5AnnotatedMatrix
    } else {
        FormatKind::Unrecognized
    }
}

fn sniff_delimited(key: &str, bytes: &[u8]) -> FormatKind {
    let prefix_len = bytes.len().min(TEXT_SNIFF_LEN);
    let snippet = String::from_utf8_lossy(&bytes[..prefix_len]);
    if snippet.contains('\u{0}') {
        return FormatKind::Unrecognized;
    }
    let comma = snippet.find(',');
    let tab = snippet.find('\t');
    match (comma, tab) {
        (Some(c), Some(t)) if c < t => FormatKind::DelimitedCsv,
        (Some(_), None) => FormatKind::DelimitedCsv,
        (None, None) if key.ends_with(".csv") => FormatKind::DelimitedCsv,
        _ => FormatKind::DelimitedTsv,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn hdf5_magic_wins_over_text() {
        // 0x89 'H' 'D' 'F' prefix is HDF5-based even though it decodes as text-ish.
        let bytes = [0x89, 0x48, 0x44, 0x46, 0x0d, 0x0a];
        let kind = sniff_object("root/s/expression/data.txt", &bytes);
        assert!(!matches!(
            kind,
            FormatKind::DelimitedCsv | FormatKind::DelimitedTsv
        ));
    }

    #[test]
    fn comma_before_tab_is_csv() {
        let kind = sniff_object("root/s/expression/data.txt", b"id,GeneA,GeneB\nc1,1,2\n");
        assert_eq!(kind, FormatKind::DelimitedCsv);
    }

    #[test]
    fn tab_first_is_tsv() {
        let kind = sniff_object("root/s/expression/data.txt", b"id\tGeneA,GeneB\n");
        assert_eq!(kind, FormatKind::DelimitedTsv);
    }

    #[test]
    fn plain_text_defaults_to_tsv() {
        let kind = sniff_object("root/s/expression/data.txt", b"justonecolumn\nvalue\n");
        assert_eq!(kind, FormatKind::DelimitedTsv);
    }

    #[test]
    fn gz_key_composes_inner_classification() {
        let payload = gzip(b"id,GeneA\nc1,5\n");
        let kind = sniff_object("root/study1/expression/data.csv.gz", &payload);
        assert_eq!(
            kind,
            FormatKind::GzipWrapped(Box::new(FormatKind::DelimitedCsv))
        );
    }

    #[test]
    fn directory_marker_is_bundle() {
        let kind = sniff_object("root/s/expression/sample1/", b"");
        assert_eq!(kind, FormatKind::DirectoryBundle);
    }

    #[test]
    fn legacy_suffix_wins_regardless_of_content() {
        let kind = sniff_object("root/s/expression/obj.rds", b"id,GeneA\nc1,5\n");
        assert_eq!(kind, FormatKind::LegacySerialized);
    }

    #[test]
    fn corrupt_gzip_is_unrecognized() {
        let kind = sniff_object("root/s/expression/data.csv.gz", &[0x1f, 0x8b, 0x00]);
        assert_eq!(kind, FormatKind::Unrecognized);
    }

    #[test]
    fn sniff_is_deterministic() {
        let payload = gzip(b"a\tb\nc\td\n");
        let first = sniff_object("root/s/expression/t.tsv.gz", &payload);
        let second = sniff_object("root/s/expression/t.tsv.gz", &payload);
        assert_eq!(first, second);
    }
}
