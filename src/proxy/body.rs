//! Response body that counts the bytes it forwards.

use crate::backend::Backend;
use crate::metrics::MetricsCollector;
use crate::proxy::BoxError;
use crate::state::PoolState;
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Instant, Sleep};
use tracing::{debug, warn};

/// The response body was still streaming when the deadline passed.
#[derive(Debug, thiserror::Error)]
#[error("response body copy exceeded the request deadline")]
pub struct CopyTimeout;

pin_project! {
    /// Wraps a backend response body and adds the bytes copied to the
    /// backend's traffic counter once the stream is finished.
    ///
    /// The counter is updated exactly once: on end of stream, on a body
    /// error, when the deadline passes, or when the body is dropped early
    /// because the caller went away.
    pub struct CountingBody<B> {
        #[pin]
        inner: B,
        #[pin]
        deadline: Sleep,
        recorder: TrafficRecorder,
    }
}

impl<B> CountingBody<B> {
    /// Wrap `inner`, counting against `backend` until `deadline`.
    pub fn new(
        inner: B,
        backend: Backend,
        deadline: Instant,
        state: Arc<PoolState>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            inner,
            deadline: tokio::time::sleep_until(deadline),
            recorder: TrafficRecorder {
                backend,
                state,
                metrics,
                bytes: 0,
                finished: false,
            },
        }
    }

    #[cfg(test)]
    fn bytes_copied(&self) -> u64 {
        self.recorder.bytes
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        if this.recorder.finished {
            return Poll::Ready(None);
        }

        // Checked before the inner body so a stream that always has data
        // ready still stops at the deadline
        if this.deadline.as_mut().poll(cx).is_ready() {
            warn!(
                backend = %this.recorder.backend,
                bytes = this.recorder.bytes,
                "response body copy timed out"
            );
            this.recorder.finish();
            return Poll::Ready(Some(Err(Box::new(CopyTimeout))));
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.recorder.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let e: BoxError = e.into();
                warn!(
                    backend = %this.recorder.backend,
                    bytes = this.recorder.bytes,
                    error = %e,
                    "response body copy failed"
                );
                this.recorder.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.recorder.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.recorder.finished || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Adds the copied byte count to the traffic counter, once.
struct TrafficRecorder {
    backend: Backend,
    state: Arc<PoolState>,
    metrics: MetricsCollector,
    bytes: u64,
    finished: bool,
}

impl TrafficRecorder {
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let total = self.state.record_traffic(&self.backend, self.bytes);
        self.metrics.record_bytes(self.backend.as_str(), self.bytes);

        debug!(
            backend = %self.backend,
            bytes = self.bytes,
            total = total,
            "recorded backend traffic"
        );
    }
}

impl Drop for TrafficRecorder {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;

    /// Body that yields a fixed list of frames, then ends or stalls.
    struct ScriptedBody {
        frames: VecDeque<Result<Frame<Bytes>, io::Error>>,
        stall: bool,
    }

    impl ScriptedBody {
        fn new(frames: Vec<Result<&'static [u8], io::Error>>, stall: bool) -> Self {
            Self {
                frames: frames
                    .into_iter()
                    .map(|f| f.map(|data| Frame::data(Bytes::from_static(data))))
                    .collect(),
                stall,
            }
        }
    }

    impl Body for ScriptedBody {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
            match self.frames.pop_front() {
                Some(frame) => Poll::Ready(Some(frame)),
                None if self.stall => Poll::Pending,
                None => Poll::Ready(None),
            }
        }
    }

    /// Body that always has another chunk ready.
    struct EndlessBody;

    impl Body for EndlessBody {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"chunk")))))
        }
    }

    fn backend() -> Backend {
        "server1:8080".parse().unwrap()
    }

    fn wrap<B>(inner: B, state: &Arc<PoolState>, timeout: Duration) -> CountingBody<B> {
        CountingBody::new(
            inner,
            backend(),
            Instant::now() + timeout,
            Arc::clone(state),
            MetricsCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_counts_full_body() {
        let state = Arc::new(PoolState::new());
        let body = wrap(
            Full::new(Bytes::from(vec![b'A'; 150])),
            &state,
            Duration::from_secs(5),
        );

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.len(), 150);
        assert_eq!(state.traffic(&backend()), 150);
    }

    #[tokio::test]
    async fn test_counts_chunked_body_once() {
        let state = Arc::new(PoolState::new());
        let inner = ScriptedBody::new(vec![Ok(&b"hello "[..]), Ok(&b"world"[..])], false);
        let body = wrap(inner, &state, Duration::from_secs(5));

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"hello world");
        // The body was dropped by collect(); it must not count twice
        assert_eq!(state.traffic(&backend()), 11);
    }

    #[tokio::test]
    async fn test_partial_copy_is_counted_on_error() {
        let state = Arc::new(PoolState::new());
        let inner = ScriptedBody::new(
            vec![
                Ok(&b"partial"[..]),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            ],
            false,
        );
        let mut body = Box::pin(wrap(inner, &state, Duration::from_secs(5)));

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap().len(), 7);

        let second = body.frame().await.unwrap();
        assert!(second.is_err());
        assert_eq!(state.traffic(&backend()), 7);

        drop(body);
        assert_eq!(state.traffic(&backend()), 7);
    }

    #[tokio::test]
    async fn test_dropped_body_is_counted() {
        let state = Arc::new(PoolState::new());
        let inner = ScriptedBody::new(vec![Ok(&b"abc"[..]), Ok(&b"def"[..])], false);
        let mut body = Box::pin(wrap(inner, &state, Duration::from_secs(5)));

        body.frame().await.unwrap().unwrap();
        assert_eq!(body.bytes_copied(), 3);
        assert_eq!(state.traffic(&backend()), 0);

        drop(body);
        assert_eq!(state.traffic(&backend()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_body_times_out() {
        let state = Arc::new(PoolState::new());
        let inner = ScriptedBody::new(vec![Ok(&b"slow"[..])], true);
        let mut body = Box::pin(wrap(inner, &state, Duration::from_millis(200)));

        body.frame().await.unwrap().unwrap();

        let result = body.frame().await.unwrap();
        assert!(result.unwrap_err().is::<CopyTimeout>());
        assert!(body.is_end_stream());
        assert_eq!(state.traffic(&backend()), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_body_stops_at_deadline() {
        let state = Arc::new(PoolState::new());
        let mut body = Box::pin(wrap(EndlessBody, &state, Duration::from_millis(200)));

        body.frame().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let mut delivered = 0;
        let err = loop {
            match body.frame().await {
                Some(Ok(_)) => delivered += 1,
                Some(Err(e)) => break e,
                None => panic!("stream ended without a timeout error"),
            }
            assert!(delivered < 100, "body kept streaming past the deadline");
        };

        assert_eq!(delivered, 0);
        assert!(err.is::<CopyTimeout>());
        assert!(body.is_end_stream());
        assert_eq!(state.traffic(&backend()), 5);
        assert!(body.frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_body_flows_before_deadline() {
        let state = Arc::new(PoolState::new());
        let mut body = Box::pin(wrap(EndlessBody, &state, Duration::from_secs(1)));

        for _ in 0..10 {
            body.frame().await.unwrap().unwrap();
        }
        assert_eq!(body.bytes_copied(), 50);

        drop(body);
        assert_eq!(state.traffic(&backend()), 50);
    }
}
