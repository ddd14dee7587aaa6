use std::sync::Arc;

use bytes::Bytes;

use ferry_objectstore::{Key, ObjectStore, Part, MAX_PART_NUMBER};

use crate::errors::{Error, Result};

/// A part the backend has acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    pub part_number: i32,
    pub e_tag: Option<String>,
    pub size: usize,
}

impl From<&PartRecord> for Part {
    fn from(record: &PartRecord) -> Part {
        Part {
            e_tag: record.e_tag.clone(),
            part_number: record.part_number,
        }
    }
}

/// Uploads chunks as numbered parts of one open multipart upload.
///
/// Cloning is cheap, so several uploads for the same session may run at once.
#[derive(Clone)]
pub struct PartUploader {
    objects: Arc<dyn ObjectStore>,
    bucket: Arc<str>,
    key: Arc<Key>,
    upload_id: Arc<str>,
}

impl PartUploader {
    pub(crate) fn new(
        objects: Arc<dyn ObjectStore>,
        bucket: &str,
        key: &Key,
        upload_id: &str,
    ) -> PartUploader {
        PartUploader {
            objects,
            bucket: Arc::from(bucket),
            key: Arc::new(key.clone()),
            upload_id: Arc::from(upload_id),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Upload `chunk` as part `part_number`.
    ///
    /// Uploading the same part number again replaces the earlier upload of that part.
    #[tracing::instrument(skip(self, chunk), fields(upload_id = %self.upload_id, size = chunk.len()))]
    pub async fn upload_part(&self, part_number: i32, chunk: Bytes) -> Result<PartRecord> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(Error::InvalidPart {
                part_number,
                reason: "part numbers must be between 1 and 10000",
            });
        }
        if chunk.is_empty() {
            return Err(Error::InvalidPart {
                part_number,
                reason: "parts must not be empty",
            });
        }

        let size = chunk.len();
        let part = self
            .objects
            .upload_part(&self.bucket, &self.key, &self.upload_id, part_number, chunk)
            .await
            .map_err(|source| Error::PartUploadFailure {
                part_number,
                source,
            })?;
        tracing::debug!(e_tag = ?part.e_tag, "part uploaded");

        Ok(PartRecord {
            part_number: part.part_number,
            e_tag: part.e_tag,
            size,
        })
    }
}
