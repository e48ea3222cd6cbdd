//! Connection activity tracking
//!
//! The inactivity timeout counts from the last byte moved, not from
//! accept: a keep-alive connection that stays busy lives as long as it
//! likes, while one that goes quiet is cut once the idle limit passes.
//! The tracker records when the connection last moved a byte; the
//! watcher sleeps until that mark plus the limit could have expired.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// When the connection last moved a byte, stored as milliseconds since
/// the tracker was created so it fits in an atomic.
pub(crate) struct ActivityTracker {
    started: Instant,
    last_activity_millis: AtomicU64,
}

impl ActivityTracker {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_millis: AtomicU64::new(0),
        }
    }

    /// Mark the connection active now.
    pub(crate) fn touch(&self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_millis.store(elapsed, Ordering::Relaxed);
    }

    /// How long the connection has been quiet.
    pub(crate) fn idle_for(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        self.started
            .elapsed()
            .saturating_sub(Duration::from_millis(last))
    }
}

/// Marks the tracker on every byte read or written, so handshake and
/// request traffic alike count as activity.
pub(crate) struct TrackedStream<S> {
    inner: S,
    tracker: Arc<ActivityTracker>,
}

impl<S> TrackedStream<S> {
    pub(crate) fn new(inner: S, tracker: Arc<ActivityTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TrackedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.tracker.touch();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        match &poll {
            Poll::Ready(Ok(written)) if *written > 0 => this.tracker.touch(),
            _ => {}
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Resolves once the tracker has been quiet for `limit`. Each pass
/// sleeps until the earliest instant the limit could expire.
pub(crate) async fn idle_watch(tracker: &ActivityTracker, limit: Duration) {
    loop {
        let idle = tracker.idle_for();
        if idle >= limit {
            return;
        }
        tokio::time::sleep(limit - idle).await;
    }
}
