use core::pin::Pin;
use core::task::{Context, Poll};
use std::num::NonZeroUsize;

use bytes::{Bytes, BytesMut};
use futures::ready;
use futures::stream::{FusedStream, Stream};
use pin_project::pin_project;

use crate::errors::{Error, Result};

/// Turn a stream of arbitrarily sized [`bytes::Bytes`] frames into a stream of fixed-size
/// chunks.
///
/// Every chunk is exactly `chunk_size` bytes long except the last one, which holds whatever is
/// left over. An empty source yields no chunks at all. At most one chunk (plus the tail of the
/// frame that completed it) is buffered at a time.
///
/// The reader consumes its source: once it has returned `None` or an error it stays exhausted.
#[pin_project]
pub struct ChunkReader<S> {
    #[pin]
    body: S,
    buffer: BytesMut,
    chunk_size: usize,
    bytes_read: u64,
    done: bool,
}

impl<S> ChunkReader<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    pub fn new(body: S, chunk_size: NonZeroUsize) -> ChunkReader<S> {
        ChunkReader {
            body,
            buffer: BytesMut::with_capacity(chunk_size.get()),
            chunk_size: chunk_size.get(),
            bytes_read: 0,
            done: false,
        }
    }

    /// Total bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<S> Stream for ChunkReader<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        loop {
            if this.buffer.len() >= *this.chunk_size {
                let chunk = this.buffer.split_to(*this.chunk_size);
                return Poll::Ready(Some(Ok(chunk.freeze())));
            }

            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => {
                    *this.bytes_read += bytes.len() as u64;
                    this.buffer.extend_from_slice(&bytes);
                }
                Some(Err(e)) => {
                    *this.done = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(Error::SourceReadFailure {
                        bytes_read: *this.bytes_read,
                        source: e,
                    })));
                }
                None => {
                    *this.done = true;
                    if !this.buffer.is_empty() {
                        return Poll::Ready(Some(Ok(this.buffer.split().freeze())));
                    }
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl<S> FusedStream for ChunkReader<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    fn is_terminated(&self) -> bool {
        self.done && self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::{self, StreamExt};
    use rstest::*;

    use super::*;

    fn frames(total: usize, frame_size: usize) -> Vec<std::io::Result<Bytes>> {
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        data.chunks(frame_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    fn chunk_size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[rstest]
    #[case::empty(0, 5, 3, vec![])]
    #[case::shorter_than_chunk(3, 5, 2, vec![3])]
    #[case::exact_multiple(10, 5, 3, vec![5, 5])]
    #[case::remainder(12, 5, 4, vec![5, 5, 2])]
    #[case::frames_larger_than_chunks(12, 5, 12, vec![5, 5, 2])]
    #[case::single_byte_frames(7, 3, 1, vec![3, 3, 1])]
    #[tokio::test]
    async fn splits_into_fixed_size_chunks(
        #[case] total: usize,
        #[case] size: usize,
        #[case] frame_size: usize,
        #[case] expected: Vec<usize>,
    ) {
        let input = frames(total, frame_size.max(1));
        let original: Vec<u8> = input
            .iter()
            .flat_map(|f| f.as_ref().unwrap().to_vec())
            .collect();

        let reader = ChunkReader::new(stream::iter(input), chunk_size(size));
        let chunks: Vec<Bytes> = reader.map(|c| c.unwrap()).collect().await;

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, expected);

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(reassembled, original);
    }

    #[tokio::test]
    async fn surfaces_source_errors_and_stops() {
        let input = vec![
            Ok(Bytes::from_static(b"abcdef")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer went away",
            )),
            Ok(Bytes::from_static(b"never read")),
        ];
        let mut reader = ChunkReader::new(stream::iter(input), chunk_size(4));

        assert_eq!(reader.next().await.unwrap().unwrap(), "abcd");
        match reader.next().await {
            Some(Err(Error::SourceReadFailure { bytes_read, .. })) => assert_eq!(bytes_read, 6),
            other => panic!("expected a source read failure, got {other:?}"),
        }
        assert!(reader.next().await.is_none());
        assert!(reader.is_terminated());
    }

    #[tokio::test]
    async fn exhausted_reader_stays_exhausted() {
        let mut reader = ChunkReader::new(stream::iter(frames(4, 4)), chunk_size(4));
        assert_eq!(reader.next().await.unwrap().unwrap().len(), 4);
        assert!(reader.next().await.is_none());
        assert!(reader.next().await.is_none());
        assert_eq!(reader.bytes_read(), 4);
    }

    #[tokio::test]
    async fn waits_for_slow_sources() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<std::io::Result<Bytes>>();
        let producer = tokio::spawn(async move {
            for frame in [&b"ab"[..], b"cd", b"e"] {
                tokio::task::yield_now().await;
                tx.unbounded_send(Ok(Bytes::copy_from_slice(frame))).unwrap();
            }
        });

        let reader = ChunkReader::new(rx, chunk_size(3));
        let chunks: Vec<Bytes> = reader.map(|c| c.unwrap()).collect().await;
        producer.await.unwrap();

        assert_eq!(chunks, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]);
    }
}
