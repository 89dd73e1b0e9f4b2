use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, Iter};
use pin_project_lite::pin_project;
use std::vec::IntoIter;
use crate::core::ProgressSink;

pin_project! {
    /// Request body stream that reports bytes handed to the transport
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        sink: ProgressSink,
        bytes_sent: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, sink: ProgressSink) -> Self {
        Self {
            inner,
            sink,
            bytes_sent: 0,
        }
    }
}

type ChunkIter = Iter<IntoIter<std::io::Result<Bytes>>>;

impl ProgressStream<ChunkIter> {
    /// Split `data` into `chunk_size` pieces; `Bytes` slices share the buffer
    pub fn chunked(data: Bytes, chunk_size: usize, sink: ProgressSink) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();

        Self::new(stream::iter(chunks), sink)
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    this.sink.update(*this.bytes_sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_reports_progress_per_chunk() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            ProgressSink::new(100, move |p| seen.lock().unwrap().push(p))
        };

        let stream = ProgressStream::chunked(Bytes::from(vec![1u8; 100]), 30, sink);
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 100);
        assert_eq!(*seen.lock().unwrap(), vec![30, 60, 90, 100]);
    }

    #[tokio::test]
    async fn test_empty_payload_yields_nothing() {
        let stream = ProgressStream::chunked(Bytes::new(), 16, ProgressSink::discard(0));
        assert_eq!(stream.count().await, 0);
    }
}
