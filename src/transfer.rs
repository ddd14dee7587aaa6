use std::num::NonZeroUsize;
use std::pin::pin;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ferry_objectstore::ObjectStore;

use crate::chunks::ChunkReader;
use crate::errors::{Error, Result};
use crate::request::{TransferRequest, TransferResult};
use crate::session::TransferSession;
use crate::source::Source;

/// Copies remote resources into object storage.
///
/// Holds no per-transfer state; one instance can run any number of transfers, concurrently or
/// not, each with its own [`TransferSession`].
#[derive(Clone)]
pub struct Transfer {
    source: Arc<dyn Source>,
    objects: Arc<dyn ObjectStore>,
}

impl Transfer {
    pub fn new(source: Arc<dyn Source>, objects: Arc<dyn ObjectStore>) -> Transfer {
        Transfer { source, objects }
    }

    /// Run one transfer to completion.
    ///
    /// Cancelling `cancel`, or reaching the request's timeout, stops the transfer and aborts
    /// its multipart upload before this returns [`Error::Cancelled`].
    #[tracing::instrument(skip_all, fields(url = %request.source, bucket = %request.bucket))]
    pub async fn execute(
        &self,
        request: &TransferRequest,
        cancel: CancellationToken,
    ) -> Result<TransferResult> {
        let key = request.validate()?;
        let chunk_size = NonZeroUsize::new(request.chunk_size)
            .ok_or_else(|| Error::InvalidRequest(String::from("chunk size must be positive")))?;
        let concurrency = NonZeroUsize::new(request.concurrency)
            .ok_or_else(|| Error::InvalidRequest(String::from("concurrency must be positive")))?;

        tracing::info!(
            %key,
            chunk_size = request.chunk_size,
            concurrency = request.concurrency,
            "starting transfer"
        );

        let deadline = request.timeout().map(|timeout| Instant::now() + timeout);
        let mut interrupt = pin!(interrupted(cancel, deadline));

        let opened = tokio::select! {
            biased;
            _ = interrupt.as_mut() => return Err(Error::Cancelled),
            opened = self.source.open(&request.source) => opened?,
        };
        if let Some(content_length) = opened.content_length {
            tracing::debug!(content_length, "source size known");
        }

        let chunks = ChunkReader::new(opened.body, chunk_size);
        let mut session = TransferSession::new(self.objects.clone(), &request.bucket, key);
        session.run(chunks, concurrency, interrupt).await
    }
}

/// Resolves once the transfer should stop early.
async fn interrupted(cancel: CancellationToken, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("transfer deadline reached");
                }
            }
        }
        None => cancel.cancelled().await,
    }
}
