use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn, Span};

use crate::codec::{self, Frame};
use crate::error::{TransportError, TrySendError};
use crate::events::Payload;
use crate::registry::{ConnectionId, Registry};
use crate::transport::{ConnectionHandle, ConnectionState};

/// Why one client missed a broadcast.
#[derive(Error, Debug)]
enum DeliveryFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("send not accepted within {0:?}")]
    TimedOut(Duration),
}

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sends started (connections open at snapshot time)
    pub attempted: usize,
    pub delivered: usize,
    /// Connections not open at snapshot time
    pub skipped: usize,
    /// Connections whose send failed, timed out or panicked
    pub failed: Vec<ConnectionId>,
    /// Registry entries actually removed after the pass
    pub removed: usize,
}

/// Handle on an in-flight broadcast. Dropping it does not stop delivery.
#[derive(Debug)]
pub struct BroadcastTask {
    inner: Option<JoinHandle<DeliveryReport>>,
}

impl BroadcastTask {
    fn noop() -> Self {
        Self { inner: None }
    }

    /// True when nothing was sent because encoding failed.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Wait for every send and the removal pass to finish.
    pub async fn wait(self) -> DeliveryReport {
        match self.inner {
            Some(task) => task.await.unwrap_or_default(),
            None => DeliveryReport::default(),
        }
    }
}

/// Best-effort fan-out of one envelope to every registered connection.
pub struct Broadcaster {
    registry: Arc<Registry>,
    runtime: Handle,
    send_timeout: Duration,
    span: Span,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, runtime: Handle, send_timeout: Duration, span: Span) -> Self {
        Self {
            registry,
            runtime,
            send_timeout,
            span,
        }
    }

    /// Encode once and deliver to every open connection.
    ///
    /// Frames a connection can take without waiting are handed over before
    /// this returns, so back-to-back broadcasts reach each connection in call
    /// order. Only connections with a full queue get a spawned send bounded
    /// by the send timeout. An encoding failure is logged and nothing is sent.
    pub fn broadcast(&self, event_type: &str, payload: &Payload) -> BroadcastTask {
        match codec::encode(event_type, payload) {
            Ok(frame) => self.broadcast_frame(event_type, frame),
            Err(e) => {
                warn!(parent: &self.span, event_type, error = %e, "dropping broadcast, encode failed");
                BroadcastTask::noop()
            }
        }
    }

    fn broadcast_frame(&self, event_type: &str, frame: Frame) -> BroadcastTask {
        let mut report = DeliveryReport::default();
        let mut dead: Vec<(ConnectionId, ConnectionHandle)> = Vec::new();
        let mut in_flight: HashMap<ConnectionId, ConnectionHandle> = HashMap::new();
        let mut sends = JoinSet::new();

        for (id, handle) in self.registry.snapshot() {
            if handle.state() != ConnectionState::Open {
                report.skipped += 1;
                dead.push((id, handle));
                continue;
            }

            report.attempted += 1;
            let frame = match handle.try_send(frame.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    continue;
                }
                Err(TrySendError::Closed) => {
                    warn!(parent: &self.span, conn_id = %id, "client closed before send");
                    report.failed.push(id);
                    dead.push((id, handle));
                    continue;
                }
                Err(TrySendError::Full(frame)) => frame,
            };

            let _ = in_flight.insert(id, Arc::clone(&handle));
            let send_timeout = self.send_timeout;
            let _ = sends.spawn_on(
                async move {
                    let outcome = match tokio::time::timeout(send_timeout, handle.send(frame)).await {
                        Ok(result) => result.map_err(DeliveryFailure::from),
                        Err(_) => Err(DeliveryFailure::TimedOut(send_timeout)),
                    };
                    (id, outcome)
                },
                &self.runtime,
            );
        }

        debug!(
            parent: &self.span,
            event_type,
            recipients = report.attempted,
            queued = sends.len(),
            skipped = report.skipped,
            "broadcast event"
        );

        let registry = Arc::clone(&self.registry);
        let span = self.span.clone();
        let supervisor = self.runtime.spawn(async move {
            while let Some(joined) = sends.join_next().await {
                match joined {
                    Ok((id, Ok(()))) => {
                        report.delivered += 1;
                        let _ = in_flight.remove(&id);
                    }
                    Ok((id, Err(e))) => {
                        warn!(parent: &span, conn_id = %id, error = %e, "failed to send event to client");
                        if let Some(handle) = in_flight.remove(&id) {
                            report.failed.push(id);
                            dead.push((id, handle));
                        }
                    }
                    Err(e) => {
                        error!(parent: &span, error = %e, "client send task aborted");
                    }
                }
            }

            // Whatever is still in flight belongs to a task that panicked
            for (id, handle) in in_flight {
                report.failed.push(id);
                dead.push((id, handle));
            }

            for (id, handle) in dead {
                if registry.remove_if_same(id, &handle) {
                    handle.close();
                    report.removed += 1;
                }
            }
            report
        });

        BroadcastTask {
            inner: Some(supervisor),
        }
    }
}
