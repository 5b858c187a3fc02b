//! # contract: the seams between the delivery pipeline and the outside world
//!
//! This module defines the [`Transport`] trait the pipeline sends everything
//! through, the plain data types that travel across it, the progress observer
//! hooks and the cancellation signal.
//!
//! ## Transport
//! - Implementors own the network protocol. The core never builds a request.
//! - Every failure is mapped to a [`TransportError`] variant; the variant alone
//!   decides whether the orchestrator waits, retries or aborts.
//! - A [`Destination`] is opaque to the core: it is resolved by the binary crate
//!   and handed back unchanged on every call.
//!
//! ## Mocking & Testing
//! - `Transport` is annotated for `mockall`; enable the `test-export-mocks`
//!   feature to use `MockTransport` from other crates' tests.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;

pub use crate::error::TransportError;
use crate::media::VideoMeta;

/// Where units are delivered. Built by the transport crate after verifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    id: String,
    title: Option<String>,
}

impl Destination {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

/// How a unit is presented by the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaKind {
    Document,
    Video(VideoMeta),
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video(_))
    }
}

/// Streamed file contents of one unit.
pub struct UploadPayload {
    pub file_name: String,
    pub size: u64,
    pub body: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPayload")
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// One media message: a file plus its caption.
#[derive(Debug)]
pub struct UnitMessage {
    pub destination: Destination,
    /// HTML subset caption.
    pub caption: String,
    pub kind: MediaKind,
    pub payload: UploadPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Remote messaging endpoint.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload one file as a document or video message.
    async fn send_unit(&self, message: UnitMessage) -> Result<SentMessage, TransportError>;

    /// Send an HTML text message.
    async fn send_text(&self, destination: &Destination, html: &str) -> Result<SentMessage, TransportError>;

    async fn pin_message(&self, destination: &Destination, message_id: i64) -> Result<(), TransportError>;

    async fn export_invite_link(&self, destination: &Destination) -> Result<String, TransportError>;

    async fn set_description(&self, destination: &Destination, text: &str) -> Result<(), TransportError>;
}

/// Byte progress of a single upload attempt.
pub trait UploadProgress: Send + Sync {
    fn advance(&self, bytes: u64);
    fn finish(&self);
    fn abandon(&self, reason: &str);
}

/// Receives a fresh [`UploadProgress`] for every upload attempt.
pub trait ProgressObserver: Send + Sync {
    fn unit_started(&self, label: &str, total_bytes: u64) -> Arc<dyn UploadProgress>;
}

/// Observer that discards everything; used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {
    fn unit_started(&self, _label: &str, _total_bytes: u64) -> Arc<dyn UploadProgress> {
        Arc::new(SilentObserver)
    }
}

impl UploadProgress for SilentObserver {
    fn advance(&self, _bytes: u64) {}
    fn finish(&self) {}
    fn abandon(&self, _reason: &str) {}
}

/// Reader adapter reporting every chunk read to an [`UploadProgress`].
pub struct ProgressReader<R> {
    inner: R,
    progress: Arc<dyn UploadProgress>,
    read: u64,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, progress: Arc<dyn UploadProgress>) -> Self {
        Self {
            inner,
            progress,
            read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = (buf.filled().len() - before) as u64;
                if n > 0 {
                    this.read += n;
                    this.progress.advance(n);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Cooperative cancellation shared by every wait in the pipeline.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Triggers the paired [`CancelSignal`]s.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Fails only when every signal is gone, in which case nobody is waiting.
        let _ = self.tx.send(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl UploadProgress for Counter {
        fn advance(&self, bytes: u64) {
            self.0.fetch_add(bytes, Ordering::SeqCst);
        }
        fn finish(&self) {}
        fn abandon(&self, _reason: &str) {}
    }

    #[tokio::test]
    async fn progress_reader_counts_every_byte() {
        let counter = Arc::new(Counter::default());
        let data = vec![1u8; 10_000];
        let mut reader = ProgressReader::new(&data[..], counter.clone());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, data);
        assert_eq!(reader.bytes_read(), 10_000);
        assert_eq!(counter.0.load(Ordering::SeqCst), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_does_not_fire() {
        let signal = CancelSignal::never();
        assert!(!signal.is_cancelled());
        let fired = tokio::time::timeout(Duration::from_secs(3600), signal.cancelled()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn cancel_wakes_every_clone() {
        let (handle, signal) = cancel_pair();
        let other = signal.clone();
        let waiter = tokio::spawn(async move { other.cancelled().await });
        handle.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[test]
    fn destination_is_opaque() {
        let dest = Destination::new("-100987").with_title("Rust Course");
        assert_eq!(dest.id(), "-100987");
        assert_eq!(dest.title(), Some("Rust Course"));
    }
}
