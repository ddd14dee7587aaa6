//! # Transfer sessions
//!
//! A [`TransferSession`] owns exactly one backend multipart upload from the moment it is opened
//! until it is either completed or aborted. Its lifecycle:
//!
//! ```text
//! Idle -> Opened -> Streaming -> Finalizing -> Completed
//!           |           |            |
//!           +-----------+------------+--> Aborting -> Aborted
//! ```
//!
//! Every fatal error on the way issues exactly one abort against the backend before it is
//! returned, so parts uploaded so far do not linger. An empty source never opens a multipart
//! upload at all; it is written with a single put instead.
use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::{pin, Pin};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use ferry_objectstore::{Key, ObjectStore, Part};

use crate::errors::{Error, Result};
use crate::request::TransferResult;
use crate::uploader::{PartRecord, PartUploader};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opened,
    Streaming,
    Finalizing,
    Completed,
    Aborting,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }

    /// Whether a backend upload exists that has been neither completed nor aborted.
    fn holds_upload(&self) -> bool {
        matches!(
            self,
            SessionState::Opened | SessionState::Streaming | SessionState::Finalizing
        )
    }
}

pub struct TransferSession {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    key: Key,
    upload_id: Option<String>,
    state: SessionState,
    parts: BTreeMap<i32, PartRecord>,
}

impl TransferSession {
    pub fn new(objects: Arc<dyn ObjectStore>, bucket: impl Into<String>, key: Key) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            key,
            upload_id: None,
            state: SessionState::Idle,
            parts: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Acknowledged parts in ascending part number order.
    pub fn parts(&self) -> impl Iterator<Item = &PartRecord> {
        self.parts.values()
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidSessionState {
            operation,
            state: self.state,
        }
    }

    /// Open the backend multipart upload.
    ///
    /// Nothing exists on the backend if this fails, so the session goes straight to
    /// [`SessionState::Aborted`] without an abort call.
    pub async fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("open"));
        }

        match self
            .objects
            .initiate_multipart_upload(&self.bucket, &self.key)
            .await
        {
            Ok(upload_id) => {
                tracing::info!(bucket = %self.bucket, key = %self.key, %upload_id, "multipart upload created");
                self.upload_id = Some(upload_id);
                self.state = SessionState::Opened;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                Err(Error::SessionOpenFailure(e))
            }
        }
    }

    /// A handle for uploading parts of the open upload, possibly several at once.
    ///
    /// Parts it uploads only count towards the final object once passed to
    /// [`TransferSession::record_part`].
    pub fn uploader(&self) -> Result<PartUploader> {
        match (&self.upload_id, self.state) {
            (Some(upload_id), SessionState::Opened | SessionState::Streaming) => Ok(
                PartUploader::new(self.objects.clone(), &self.bucket, &self.key, upload_id),
            ),
            _ => Err(self.invalid("upload parts for")),
        }
    }

    /// Record an acknowledged part. A later record for the same part number replaces the
    /// earlier one, just as the backend replaces the part itself.
    pub fn record_part(&mut self, record: PartRecord) -> Result<()> {
        if !matches!(self.state, SessionState::Opened | SessionState::Streaming) {
            return Err(self.invalid("record a part for"));
        }
        self.state = SessionState::Streaming;
        tracing::debug!(
            part_number = record.part_number,
            size = record.size,
            "part recorded"
        );
        self.parts.insert(record.part_number, record);
        Ok(())
    }

    /// Upload and record a single part; a failed upload aborts the session.
    pub async fn upload_part(&mut self, part_number: i32, chunk: Bytes) -> Result<()> {
        let uploader = self.uploader()?;
        match uploader.upload_part(part_number, chunk).await {
            Ok(record) => self.record_part(record),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Assemble the recorded parts into the final object.
    ///
    /// The recorded parts must run from 1 without gaps. Any failure here aborts the session.
    pub async fn finalize(&mut self) -> Result<TransferResult> {
        let upload_id = match (&self.upload_id, self.state) {
            (Some(upload_id), SessionState::Opened | SessionState::Streaming) => upload_id.clone(),
            _ => return Err(self.invalid("finalize")),
        };

        if let Some(missing) = first_missing_part(&self.parts) {
            let e = Error::InvalidPart {
                part_number: missing,
                reason: "part was never uploaded",
            };
            return Err(self.fail(e).await);
        }

        self.state = SessionState::Finalizing;
        let parts: Vec<Part> = self.parts.values().map(Part::from).collect();
        tracing::debug!(%upload_id, parts = parts.len(), "completing multipart upload");

        match self
            .objects
            .complete_multipart_upload(&self.bucket, &self.key, &upload_id, parts)
            .await
        {
            Ok(completed) => {
                self.state = SessionState::Completed;
                let result = TransferResult {
                    location: completed.location,
                    e_tag: completed.e_tag,
                    parts: self.parts.len(),
                    bytes: self.parts.values().map(|p| p.size as u64).sum(),
                };
                tracing::info!(location = %result.location, e_tag = ?result.e_tag, "multipart upload completed");
                Ok(result)
            }
            Err(e) => Err(self.fail(Error::FinalizeFailure(e)).await),
        }
    }

    /// Release the backend upload and every part stored for it.
    pub async fn abort(&mut self) -> Result<()> {
        let upload_id = match (&self.upload_id, self.state) {
            (Some(upload_id), state) if state.holds_upload() => upload_id.clone(),
            _ => return Err(self.invalid("abort")),
        };

        self.state = SessionState::Aborting;
        tracing::warn!(%upload_id, "aborting multipart upload");
        let outcome = self
            .objects
            .abort_multipart_upload(&self.bucket, &self.key, &upload_id)
            .await;
        self.state = SessionState::Aborted;

        outcome.map_err(|source| Error::AbortFailure { upload_id, source })
    }

    /// Move to a terminal failure state, aborting the backend upload if one is open, and hand
    /// back the error that caused it. A failing abort is logged but never replaces `cause`.
    async fn fail(&mut self, cause: Error) -> Error {
        if self.state.holds_upload() {
            if let Err(abort_error) = self.abort().await {
                tracing::error!(error = %abort_error, cause = %cause, "abort failed; upload may be left dangling");
            }
        } else if !self.state.is_terminal() {
            self.state = SessionState::Aborted;
        }
        cause
    }

    /// Write an empty source as a regular object; multipart uploads need at least one part.
    async fn direct_upload(&mut self, body: Bytes) -> Result<TransferResult> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("directly upload"));
        }
        let bytes = body.len() as u64;
        tracing::info!(bucket = %self.bucket, key = %self.key, "source is empty; uploading object directly");
        match self.objects.put(&self.bucket, &self.key, body).await {
            Ok(completed) => {
                self.state = SessionState::Completed;
                Ok(TransferResult {
                    location: completed.location,
                    e_tag: completed.e_tag,
                    parts: 0,
                    bytes,
                })
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                Err(Error::DirectUploadFailure(e))
            }
        }
    }

    /// Drive a whole transfer: upload every chunk as a part, then complete the upload.
    ///
    /// At most `concurrency` parts are in flight at once and chunks are only pulled from
    /// `chunks` when there is room for another upload, so no more than `concurrency` chunks are
    /// held in memory. Parts are numbered in stream order regardless of the order in which their
    /// uploads finish.
    ///
    /// If `interrupt` resolves before the last part is acknowledged, the upload is aborted and
    /// [`Error::Cancelled`] returned.
    pub async fn run<S, I>(
        &mut self,
        chunks: S,
        concurrency: NonZeroUsize,
        interrupt: I,
    ) -> Result<TransferResult>
    where
        S: Stream<Item = Result<Bytes>>,
        I: Future<Output = ()>,
    {
        if self.state != SessionState::Idle {
            return Err(self.invalid("run"));
        }

        let mut chunks = pin!(chunks);
        let mut interrupt = pin!(interrupt);

        let first = tokio::select! {
            biased;
            _ = interrupt.as_mut() => None,
            first = chunks.next() => Some(first),
        };
        let first = match first {
            None => return Err(self.fail(Error::Cancelled).await),
            Some(None) => return self.direct_upload(Bytes::new()).await,
            Some(Some(Err(e))) => return Err(self.fail(e).await),
            Some(Some(Ok(chunk))) => chunk,
        };

        self.open().await?;

        if let Err(e) = self
            .stream_parts(first, chunks, concurrency, interrupt)
            .await
        {
            return Err(self.fail(e).await);
        }

        self.finalize().await
    }

    async fn stream_parts<S, I>(
        &mut self,
        first: Bytes,
        chunks: Pin<&mut S>,
        concurrency: NonZeroUsize,
        mut interrupt: Pin<&mut I>,
    ) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>>,
        I: Future<Output = ()>,
    {
        let uploader = self.uploader()?;
        self.state = SessionState::Streaming;

        let uploads = stream::once(async move { Ok(first) })
            .chain(chunks)
            .zip(stream::iter(1i32..))
            .map(|(chunk, part_number)| {
                let uploader = uploader.clone();
                async move { uploader.upload_part(part_number, chunk?).await }
            })
            .buffer_unordered(concurrency.get());
        let mut uploads = pin!(uploads);

        loop {
            tokio::select! {
                biased;
                _ = interrupt.as_mut() => {
                    tracing::warn!("transfer interrupted");
                    return Err(Error::Cancelled);
                }
                next = uploads.next() => match next {
                    Some(record) => self.record_part(record?)?,
                    None => return Ok(()),
                },
            }
        }
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if !self.state.holds_upload() {
            return;
        }
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };

        tracing::warn!(%upload_id, "transfer session dropped with an open upload; aborting it in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let objects = self.objects.clone();
                let bucket = std::mem::take(&mut self.bucket);
                let key = self.key.clone();
                handle.spawn(async move {
                    if let Err(e) = objects
                        .abort_multipart_upload(&bucket, &key, &upload_id)
                        .await
                    {
                        tracing::error!(%upload_id, error = %e, "background abort failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(%upload_id, "no async runtime available to abort dropped upload");
            }
        }
    }
}

/// The lowest part number that is missing from `parts`, treating `1..=max` as required.
fn first_missing_part(parts: &BTreeMap<i32, PartRecord>) -> Option<i32> {
    if parts.is_empty() {
        return Some(1);
    }
    parts
        .keys()
        .zip(1..)
        .find(|(actual, expected)| **actual != *expected)
        .map(|(_, expected)| expected)
}
