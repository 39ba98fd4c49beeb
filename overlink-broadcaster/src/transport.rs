//! Connection handles that sit behind a registered id.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Span};

use crate::codec::Frame;
use crate::error::{TransportError, TrySendError};

/// Transport state as observed at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// The write side of one console connection.
///
/// Implementations must tolerate `state` being queried while a `send` is in
/// flight, and must serialize concurrent sends themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    fn state(&self) -> ConnectionState;

    /// Resolves once the transport has accepted the frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Accept the frame without waiting, or hand it back.
    ///
    /// Frames accepted here keep the order of the calls. The default never
    /// accepts synchronously, so every frame goes through [`send`](Self::send).
    fn try_send(&self, frame: Frame) -> Result<(), TrySendError> {
        Err(TrySendError::Full(frame))
    }

    /// Stop accepting frames. Called when the connection is evicted.
    fn close(&self) {}
}

/// Shared handle stored in the registry.
pub type ConnectionHandle = Arc<dyn Transport>;

/// Transport backed by a bounded per-connection queue.
///
/// A single consumer drains the queue, so writes to the underlying stream
/// never overlap. `send` is cancel-safe: a cancelled send enqueues nothing.
#[derive(Debug, Clone)]
pub struct QueuedTransport {
    tx: mpsc::Sender<Frame>,
    closing: CancellationToken,
}

/// Consumer half of a [`QueuedTransport`].
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
    closing: CancellationToken,
}

impl QueuedTransport {
    pub fn channel(capacity: usize) -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closing = CancellationToken::new();
        (
            Self {
                tx,
                closing: closing.clone(),
            },
            FrameReceiver { rx, closing },
        )
    }

    /// Resolves once the transport stops accepting frames, either because
    /// it was closed or because the consumer went away.
    pub async fn closed(&self) {
        tokio::select! {
            () = self.closing.cancelled() => {}
            () = self.tx.closed() => {}
        }
    }
}

#[async_trait]
impl Transport for QueuedTransport {
    fn state(&self) -> ConnectionState {
        if self.tx.is_closed() {
            ConnectionState::Closed
        } else if self.closing.is_cancelled() {
            ConnectionState::Closing
        } else {
            ConnectionState::Open
        }
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closing.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    fn try_send(&self, frame: Frame) -> Result<(), TrySendError> {
        if self.closing.is_cancelled() {
            return Err(TrySendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(frame) => TrySendError::Full(frame),
            mpsc::error::TrySendError::Closed(_) => TrySendError::Closed,
        })
    }

    /// Already queued frames are still drained.
    fn close(&self) {
        self.closing.cancel();
    }
}

impl FrameReceiver {
    /// Next queued frame; `None` once the transport is closed and drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            () = self.closing.cancelled() => {
                self.rx.close();
                self.rx.recv().await
            }
        }
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

/// Drain a [`QueuedTransport`] into `writer` as newline-delimited frames.
///
/// The first write error ends the task and leaves the transport `Closed`.
pub fn spawn_line_writer<W>(
    writer: W,
    capacity: usize,
    span: Span,
) -> (QueuedTransport, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (transport, mut frames) = QueuedTransport::channel(capacity);

    let task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = frames.recv().await {
            if let Err(e) = write_line(&mut writer, &frame).await {
                warn!(parent: &span, error = %e, "console write failed");
                break;
            }
        }
        drop(frames);
        let _ = writer.shutdown().await;
        debug!(parent: &span, "line writer stopped");
    });

    (transport, task)
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
