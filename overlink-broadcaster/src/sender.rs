use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Span};

use crate::codec;
use crate::error::SendError;
use crate::events::Payload;
use crate::registry::{ConnectionId, Registry};

/// Delivers one envelope to exactly one connection and reports the outcome.
///
/// Never changes registry membership; on failure the caller decides
/// whether to unregister.
pub struct DirectedSender {
    registry: Arc<Registry>,
    span: Span,
}

impl DirectedSender {
    pub fn new(registry: Arc<Registry>, span: Span) -> Self {
        Self { registry, span }
    }

    /// Send to `id`, giving up with `Cancelled` once `cancel` fires.
    pub async fn send_to(
        &self,
        id: ConnectionId,
        event_type: &str,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let handle = self.registry.get(id).ok_or(SendError::NotFound { id })?;
        let frame = codec::encode(event_type, payload)?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(parent: &self.span, conn_id = %id, event_type, "directed send cancelled");
                Err(SendError::Cancelled { id })
            }
            result = handle.send(frame) => result.map_err(|source| {
                warn!(parent: &self.span, conn_id = %id, event_type, error = %source, "directed send failed");
                SendError::Transport { id, source }
            }),
        }
    }

    /// [`send_to`](Self::send_to) bounded by a timeout; expiry reports `Cancelled`.
    pub async fn send_to_within(
        &self,
        id: ConnectionId,
        event_type: &str,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<(), SendError> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(timeout, self.send_to(id, event_type, payload, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(parent: &self.span, conn_id = %id, event_type, ?timeout, "directed send timed out");
                Err(SendError::Cancelled { id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::tests::{Behavior, MockTransport};
    use crate::events::{FieldList, FieldValue};
    use crate::transport::{ConnectionState, QueuedTransport, Transport};

    fn sender(registry: &Arc<Registry>) -> DirectedSender {
        DirectedSender::new(Arc::clone(registry), Span::none())
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found_without_transport_activity() {
        let registry = Arc::new(Registry::default());
        let bystander = MockTransport::new(ConnectionState::Open, Behavior::Accept);
        registry.register(ConnectionId::random(), bystander.clone());

        let missing = ConnectionId::random();
        let err = sender(&registry)
            .send_to(missing, "status", &Payload::Empty, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::NotFound { id } if id == missing));
        assert_eq!(bystander.attempts(), 0);
    }

    #[tokio::test]
    async fn test_send_reaches_only_target() {
        let registry = Arc::new(Registry::default());
        let target = MockTransport::new(ConnectionState::Open, Behavior::Accept);
        let other = MockTransport::new(ConnectionState::Open, Behavior::Accept);
        let target_id = ConnectionId::random();
        registry.register(target_id, target.clone());
        registry.register(ConnectionId::random(), other.clone());

        let payload = Payload::Record(FieldList::new().field("id", target_id.to_string()));
        sender(&registry)
            .send_to(target_id, "connected", &payload, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(target.frames.lock().len(), 1);
        assert_eq!(other.attempts(), 0);
    }

    #[tokio::test]
    async fn test_encoding_failure_attempts_no_send() {
        let registry = Arc::new(Registry::default());
        let target = MockTransport::new(ConnectionState::Open, Behavior::Accept);
        let id = ConnectionId::random();
        registry.register(id, target.clone());

        let payload = Payload::Value(FieldValue::Float(f64::NEG_INFINITY));
        let err = sender(&registry)
            .send_to(id, "metrics", &payload, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Encoding(_)));
        assert_eq!(target.attempts(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_registry_alone() {
        let registry = Arc::new(Registry::default());
        let id = ConnectionId::random();
        registry.register(id, MockTransport::new(ConnectionState::Open, Behavior::Fail));

        let err = sender(&registry)
            .send_to(id, "status", &Payload::Empty, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Transport { .. }));
        assert!(registry.contains(id));
    }

    #[tokio::test]
    async fn test_cancel_before_accept_keeps_registration() {
        let registry = Arc::new(Registry::default());
        let (transport, mut frames) = QueuedTransport::channel(1);
        transport.send(codec::encode("status", &Payload::Empty).unwrap()).await.unwrap();
        let id = ConnectionId::random();
        registry.register(id, Arc::new(transport));

        let sender = sender(&registry);
        let cancel = CancellationToken::new();
        let mut pending = tokio_test::task::spawn(sender.send_to(id, "log", &Payload::Empty, &cancel));
        tokio_test::assert_pending!(pending.poll());

        cancel.cancel();
        let result = tokio_test::assert_ready!(pending.poll());
        assert!(matches!(result, Err(SendError::Cancelled { id: cancelled }) if cancelled == id));
        assert!(registry.contains(id));

        // Only the frame queued before the cancelled send is there
        drop(pending);
        assert!(frames.recv().await.is_some());
        assert!(frames.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let registry = Arc::new(Registry::default());
        let target = MockTransport::new(ConnectionState::Open, Behavior::Hang);
        let id = ConnectionId::random();
        registry.register(id, target.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sender(&registry)
            .send_to(id, "status", &Payload::Empty, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Cancelled { .. }));
        assert_eq!(target.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_cancelled() {
        let registry = Arc::new(Registry::default());
        let id = ConnectionId::random();
        registry.register(id, MockTransport::new(ConnectionState::Open, Behavior::Hang));

        let err = sender(&registry)
            .send_to_within(id, "status", &Payload::Empty, Duration::from_millis(250))
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Cancelled { .. }));
        assert!(registry.contains(id));
    }
}
