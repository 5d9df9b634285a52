use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::error::CellstackError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Object-store gateway. A successful empty listing means "nothing under
/// this prefix" and is distinct from a transport failure.
pub trait BlobStore: Send + Sync {
    fn list(
        &self,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Vec<ObjectInfo>, CellstackError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, CellstackError>;
    fn download(&self, key: &str, destination: &Path) -> Result<(), CellstackError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// S3-compatible store over plain HTTP. Requests are unsigned; credentialed
/// deployments inject their own [`BlobStore`] implementation.
#[derive(Clone)]
pub struct S3HttpStore {
    client: Client,
    endpoint: String,
    bucket: String,
}

impl S3HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self, CellstackError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cellstack/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CellstackError::Transport(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn list_url(&self, prefix: &str, delimiter: Option<char>) -> String {
        let mut url = format!(
            "{}/{}?list-type=2&prefix={}",
            self.endpoint, self.bucket, prefix
        );
        if let Some(delimiter) = delimiter {
            url.push_str(&format!("&delimiter={delimiter}"));
        }
        url
    }

    fn check_status(
        response: reqwest::blocking::Response,
        key: &str,
    ) -> Result<reqwest::blocking::Response, CellstackError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CellstackError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "store request failed".to_string());
            return Err(CellstackError::StoreStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

impl BlobStore for S3HttpStore {
    fn list(
        &self,
        prefix: &str,
        delimiter: Option<char>,
    ) -> Result<Vec<ObjectInfo>, CellstackError> {
        let url = self.list_url(prefix, delimiter);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        let response = Self::check_status(response, prefix)?;
        let body = response
            .text()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        Ok(parse_list_response(&body))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, CellstackError> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        let response = Self::check_status(response, key)?;
        let bytes = response
            .bytes()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), CellstackError> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .map_err(|err| CellstackError::Transport(err.to_string()))?;
        let mut response = Self::check_status(response, key)?;
        let mut file =
            File::create(destination).map_err(|err| CellstackError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| CellstackError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

// Extracts <Contents> entries from a ListObjectsV2 body by tag scanning;
// listing bodies are small and flat.
pub fn parse_list_response(body: &str) -> Vec<ObjectInfo> {
    let mut objects = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<Contents>") {
        let Some(end) = rest[start..].find("</Contents>") else {
            break;
        };
        let block = &rest[start..start + end];
        if let Some(key) = extract_tag(block, "Key") {
            let size = extract_tag(block, "Size")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0);
            objects.push(ObjectInfo {
                key: key.to_string(),
                size,
            });
        }
        rest = &rest[start + end + "</Contents>".len()..];
    }
    objects
}

fn extract_tag<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_listing_extracts_keys_and_sizes() {
        let body = "<?xml version=\"1.0\"?><ListBucketResult>\
            <KeyCount>2</KeyCount>\
            <Contents><Key>root/study1/expression/data.csv</Key><Size>1204</Size></Contents>\
            <Contents><Key>root/study1/cluster/meta.txt</Key><Size>88</Size></Contents>\
            </ListBucketResult>";
        let objects = parse_list_response(body);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "root/study1/expression/data.csv");
        assert_eq!(objects[0].size, 1204);
        assert_eq!(objects[1].key, "root/study1/cluster/meta.txt");
    }

    #[test]
    fn empty_listing_is_empty_vec() {
        let body = "<?xml version=\"1.0\"?><ListBucketResult><KeyCount>0</KeyCount></ListBucketResult>";
        assert!(parse_list_response(body).is_empty());
    }

    #[test]
    fn truncated_listing_stops_cleanly() {
        let body = "<Contents><Key>a/b/expression/x.csv</Key><Size>3</Size>";
        assert!(parse_list_response(body).is_empty());
    }

    #[test]
    fn list_url_carries_delimiter() {
        let store = S3HttpStore::new(&StoreConfig {
            endpoint: "https://objects.example.com/".to_string(),
            bucket: "cells".to_string(),
            region: None,
        })
        .unwrap();
        let url = store.list_url("root/study1", Some('/'));
        assert_eq!(
            url,
            "https://objects.example.com/cells?list-type=2&prefix=root/study1&delimiter=/"
        );
    }
}
