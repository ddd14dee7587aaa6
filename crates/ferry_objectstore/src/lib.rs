use std::path::Component;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

mod config;
pub use config::Config;
mod errors;
pub use errors::{Error, KeyError, Result};
pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3;

/// Smallest size S3 accepts for any part but the last one of a multipart upload.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Highest part number S3 accepts in a single multipart upload.
pub const MAX_PART_NUMBER: i32 = 10_000;

/// Longest object key S3 accepts, in bytes of UTF-8.
pub const MAX_KEY_LENGTH: usize = 1024;

/// An uploaded part as acknowledged by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub e_tag: Option<String>,
    pub part_number: i32,
}

/// Outcome of assembling a multipart upload (or of a single-shot put) into a durable object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedObject {
    pub location: String,
    pub e_tag: Option<String>,
}

/// A wrapper around [`std::path::PathBuf`] that rejects unsavory key names.
///
/// The following rules applied during the [`TryFrom<PathBuf>`] implementation:
///
/// * paths must not start with `/`
/// * paths are delimited by `/`
/// * paths are normalized (`//` are replaced with `/` and never end in `/`)
/// * paths must not contain relative segments (ie `.` or `..`)
/// * only characters explicitly documented as safe [in the S3
///   docs](https://docs.aws.amazon.com/AmazonS3/latest/userguide/object-keys.html) are allowed in
///   path segments
///
/// Users are allowed to break these rules at their own risk by using the less restrictive
/// [`Key::from_pathbuf()`] method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    key: PathBuf,
}

impl Key {
    /// For users who know the keys they will be passing to [`ObjectStore`] methods are safe for
    /// their intended backend.
    ///
    /// This method skips all validation checks and so may result in backend API errors.
    pub fn from_pathbuf(key: PathBuf) -> Key {
        Key { key }
    }

    /// Accepts any name S3 itself accepts as an object key: non-empty UTF-8 of at most
    /// [`MAX_KEY_LENGTH`] bytes that is not `.` or `..`.
    ///
    /// Meant for names taken from elsewhere, such as a file name in a URL, which may contain
    /// spaces or other characters [`Key::try_from`] rejects. Such keys can need URL-encoding in
    /// some clients.
    pub fn from_name(name: &str) -> Result<Key> {
        if name.is_empty() {
            return Err(KeyError::Empty.into());
        }
        if name.len() > MAX_KEY_LENGTH {
            return Err(KeyError::TooLong(name.len()).into());
        }
        match name {
            "." => Err(KeyError::CurDirNotAllowed.into()),
            ".." => Err(KeyError::ParentDirNotAllowed.into()),
            _ => Ok(Key {
                key: PathBuf::from(name),
            }),
        }
    }
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        format!("{}", k.key.display())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.key.display())
    }
}

impl TryFrom<PathBuf> for Key {
    type Error = Error;

    fn try_from(pb: PathBuf) -> Result<Key> {
        let key = pb
            .components()
            .try_fold(PathBuf::new(), validate_component)?;
        if key.as_os_str().is_empty() {
            return Err(KeyError::Empty.into());
        }
        Ok(Key { key })
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(s: &str) -> Result<Key> {
        Key::try_from(PathBuf::from(s))
    }
}

fn validate_component(mut pb: PathBuf, c: Component<'_>) -> std::result::Result<PathBuf, KeyError> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[a-zA-Z0-9!_.*'()-]+$").expect("key regex is valid"));
    match c {
        Component::Prefix(_) => return Err(KeyError::PrefixNotAllowed),
        Component::RootDir => return Err(KeyError::RootDirNotAllowed),
        Component::CurDir => return Err(KeyError::CurDirNotAllowed),
        Component::ParentDir => return Err(KeyError::ParentDirNotAllowed),
        Component::Normal(s) => {
            if let Some(s) = s.to_str() {
                if !RE.is_match(s) {
                    return Err(KeyError::PathComponentsMustMatchRegex(
                        RE.as_str().to_string(),
                    ));
                }
            } else {
                return Err(KeyError::PathComponentsMustBeValidUnicode);
            }
        }
    }
    pb.push(c);
    Ok(pb)
}

/// Provides a common interface for multipart uploads against different kinds of backend object
/// stores.
///
/// Every method names its destination explicitly with a bucket and a [`Key`], so a single
/// instance can serve transfers into any bucket the configured credentials can write to.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Upload `body` as a complete object in a single request.
    async fn put(&self, bucket: &str, key: &Key, body: Bytes) -> Result<CompletedObject>;

    /// Open a multipart upload and return the backend's upload id.
    async fn initiate_multipart_upload(&self, bucket: &str, key: &Key) -> Result<String>;

    /// Upload a single part. Uploading the same part number twice replaces the earlier part.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part>;

    /// Assemble `parts`, which must be sorted by part number, into the final object.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompletedObject>;

    /// Discard the upload and any parts stored for it so far.
    async fn abort_multipart_upload(&self, bucket: &str, key: &Key, upload_id: &str)
        -> Result<()>;
}
