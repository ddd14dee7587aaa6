//! Utilities for testing transfers
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use ferry_objectstore::{CompletedObject, Error, Key, ObjectStore, Part, Result};

/// Event logger, used to log events from various places and then assert on them.
#[derive(Default, Clone)]
pub(crate) struct Logger {
    logged: Arc<Mutex<Vec<String>>>,
}

impl Logger {
    pub(crate) fn log<S: Into<String>>(&self, message: S) {
        self.logged.lock().unwrap().push(message.into())
    }

    pub(crate) fn assert(&self, expected: Vec<String>) {
        assert_eq!(*self.logged.lock().unwrap(), expected);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.logged.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.logged
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.starts_with(prefix))
            .count()
    }
}

#[derive(Default)]
pub(crate) struct FakeState {
    next_upload: u32,
    uploads: HashMap<String, BTreeMap<i32, Bytes>>,
    objects: HashMap<String, Bytes>,
    in_flight: usize,
    max_in_flight: usize,
    bytes_in_flight: usize,
    max_bytes_in_flight: usize,
}

/// In-memory object store that records every call and can be told to fail.
///
/// Completion enforces what S3 enforces: parts must be listed in ascending order without gaps,
/// every ETag must match the stored part, and all parts but the last must be at least
/// `min_part_size` bytes.
#[derive(Default)]
pub(crate) struct FakeStore {
    pub(crate) logger: Logger,
    pub(crate) fail_open: bool,
    pub(crate) fail_part: Option<i32>,
    pub(crate) fail_complete: bool,
    pub(crate) fail_abort: bool,
    pub(crate) fail_put: bool,
    pub(crate) min_part_size: usize,
    /// Artificial latency per part number, used to shuffle completion order.
    pub(crate) part_delays: HashMap<i32, Duration>,
    pub(crate) state: Mutex<FakeState>,
}

impl FakeStore {
    pub(crate) fn e_tag_for(bytes: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        format!("\"{:016x}\"", hasher.finish())
    }

    fn location(bucket: &str, key: &Key) -> String {
        format!("memory://{bucket}/{key}")
    }

    pub(crate) fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        state.objects.get(&format!("{bucket}/{key}")).cloned()
    }

    pub(crate) fn stored_parts(&self, upload_id: &str) -> Vec<(i32, usize)> {
        let state = self.state.lock().unwrap();
        state
            .uploads
            .get(upload_id)
            .map(|parts| parts.iter().map(|(n, b)| (*n, b.len())).collect())
            .unwrap_or_default()
    }

    pub(crate) fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub(crate) fn max_bytes_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_bytes_in_flight
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn put(&self, bucket: &str, key: &Key, body: Bytes) -> Result<CompletedObject> {
        self.logger
            .log(format!("put {bucket} {key} {}", body.len()));
        if self.fail_put {
            return Err(Error::Backend(String::from("put rejected")));
        }
        let e_tag = Self::e_tag_for(&body);
        let mut state = self.state.lock().unwrap();
        state.objects.insert(format!("{bucket}/{key}"), body);
        Ok(CompletedObject {
            location: Self::location(bucket, key),
            e_tag: Some(e_tag),
        })
    }

    async fn initiate_multipart_upload(&self, bucket: &str, key: &Key) -> Result<String> {
        self.logger.log(format!("initiate {bucket} {key}"));
        if self.fail_open {
            return Err(Error::Backend(String::from("access denied")));
        }
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(upload_id.clone(), BTreeMap::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part> {
        self.logger.log(format!(
            "upload_part {bucket} {key} {upload_id} {part_number} {}",
            body.len()
        ));
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.bytes_in_flight += body.len();
            state.max_bytes_in_flight = state.max_bytes_in_flight.max(state.bytes_in_flight);
        }

        if let Some(delay) = self.part_delays.get(&part_number) {
            tokio::time::sleep(*delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        state.bytes_in_flight -= body.len();

        if self.fail_part == Some(part_number) {
            return Err(Error::Backend(String::from("connection reset")));
        }
        let e_tag = Self::e_tag_for(&body);
        let parts = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Error::Backend(format!("no such upload {upload_id}")))?;
        parts.insert(part_number, body);

        Ok(Part {
            e_tag: Some(e_tag),
            part_number,
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompletedObject> {
        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        self.logger
            .log(format!("complete {bucket} {key} {upload_id} {numbers:?}"));
        if self.fail_complete {
            return Err(Error::Backend(String::from("internal error")));
        }

        let mut state = self.state.lock().unwrap();
        let stored = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| Error::Backend(format!("no such upload {upload_id}")))?;

        if numbers.is_empty() || numbers.iter().zip(1..).any(|(n, expected)| *n != expected) {
            return Err(Error::Backend(String::from("InvalidPartOrder")));
        }

        let mut object = BytesMut::new();
        for (i, part) in parts.iter().enumerate() {
            let body = stored
                .get(&part.part_number)
                .ok_or_else(|| Error::Backend(String::from("InvalidPart")))?;
            if part.e_tag.as_deref() != Some(Self::e_tag_for(body).as_str()) {
                return Err(Error::Backend(String::from("InvalidPart")));
            }
            if i + 1 < parts.len() && body.len() < self.min_part_size {
                return Err(Error::Backend(String::from("EntityTooSmall")));
            }
            object.extend_from_slice(body);
        }

        let object = object.freeze();
        let e_tag = Self::e_tag_for(&object);
        state.uploads.remove(upload_id);
        state.objects.insert(format!("{bucket}/{key}"), object);

        Ok(CompletedObject {
            location: Self::location(bucket, key),
            e_tag: Some(e_tag),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &Key, upload_id: &str) -> Result<()> {
        self.logger
            .log(format!("abort {bucket} {key} {upload_id}"));
        if self.fail_abort {
            return Err(Error::Backend(String::from("abort rejected")));
        }
        self.state.lock().unwrap().uploads.remove(upload_id);
        Ok(())
    }
}
