//! Boundary types: what a caller asks for and what it gets back.

use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use ferry_objectstore::{Key, MIN_PART_SIZE};

use crate::errors::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = MIN_PART_SIZE;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    1
}

/// One remote resource to copy into one object.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransferRequest {
    pub source: Url,
    pub bucket: String,
    /// Falls back to the percent-decoded last path segment of `source`.
    #[serde(default)]
    pub key: Option<String>,
    /// Part size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum number of parts in flight at once; 1 uploads strictly in stream order.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TransferRequest {
    pub fn new(source: Url, bucket: impl Into<String>) -> Self {
        Self {
            source,
            bucket: bucket.into(),
            key: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: default_concurrency(),
            timeout_secs: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Resolve the destination key, deriving it from the source URL when none was given.
    ///
    /// An explicit key must pass [`Key`] validation. A derived key only has to be a name the
    /// backend accepts, so file names with spaces or other encoded characters still transfer.
    pub fn destination_key(&self) -> Result<Key> {
        match &self.key {
            Some(key) => Key::try_from(key.as_str())
                .map_err(|e| Error::InvalidRequest(format!("invalid object key {key:?}: {e}"))),
            None => {
                let segment = self
                    .source
                    .path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .ok_or_else(|| {
                        Error::InvalidRequest(format!(
                            "cannot derive an object key from {}",
                            self.source
                        ))
                    })?;
                let name = percent_decode_str(segment).decode_utf8().map_err(|e| {
                    Error::InvalidRequest(format!("object key {segment:?} is not utf-8: {e}"))
                })?;
                Key::from_name(&name).map_err(|e| {
                    Error::InvalidRequest(format!("invalid object key {name:?}: {e}"))
                })
            }
        }
    }

    /// Check the request before any network traffic happens.
    ///
    /// A chunk size under the backend minimum is accepted with a warning: the backend only
    /// rejects it when more than one part gets uploaded, and then only at completion.
    pub fn validate(&self) -> Result<Key> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidRequest(String::from(
                "chunk size must be positive",
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidRequest(String::from(
                "concurrency must be positive",
            )));
        }
        if self.bucket.is_empty() {
            return Err(Error::InvalidRequest(String::from(
                "destination bucket must not be empty",
            )));
        }
        if self.chunk_size < MIN_PART_SIZE {
            tracing::warn!(
                chunk_size = self.chunk_size,
                minimum = MIN_PART_SIZE,
                "chunk size is below the backend minimum part size; completion will fail if the \
                 source spans more than one chunk"
            );
        }
        self.destination_key()
    }
}

/// The payload a serverless trigger hands over.
///
/// Unlike [`TransferRequest`], `chunk_size` here is in MiB.
#[derive(Clone, Debug, Deserialize)]
pub struct TransferEvent {
    pub url: Url,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl TransferEvent {
    /// The requested part size in bytes, if the event asked for one.
    pub fn chunk_size_bytes(&self) -> Result<Option<usize>> {
        self.chunk_size
            .map(|mib| {
                mib.checked_mul(1024 * 1024).ok_or_else(|| {
                    Error::InvalidRequest(format!("chunk size of {mib} MiB is too large"))
                })
            })
            .transpose()
    }
}

/// Where the finished object ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    pub parts: usize,
    pub bytes: u64,
}
