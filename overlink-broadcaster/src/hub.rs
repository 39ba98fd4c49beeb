use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};

use crate::broadcaster::{BroadcastTask, Broadcaster};
use crate::config::HubConfig;
use crate::error::SendError;
use crate::events::{Event, LogRecord, Payload};
use crate::registry::{ConnectionId, Registry};
use crate::sender::DirectedSender;
use crate::transport::ConnectionHandle;

/// Entry point for upgrade handlers (connection lifecycle) and domain
/// services (publish / reply).
pub struct EventHub {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    sender: DirectedSender,
    config: HubConfig,
    span: Span,
}

impl EventHub {
    /// Build a hub bound to the current Tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime; use
    /// [`with_runtime`](Self::with_runtime) there.
    pub fn new(config: HubConfig) -> Self {
        Self::with_runtime(config, Handle::current(), info_span!("event_hub"))
    }

    /// Build a hub whose sends run on `runtime`, logging under `span`.
    pub fn with_runtime(config: HubConfig, runtime: Handle, span: Span) -> Self {
        let registry = Arc::new(Registry::new(info_span!(parent: &span, "registry")));
        let broadcaster = Broadcaster::new(
            Arc::clone(&registry),
            runtime,
            config.send_timeout(),
            info_span!(parent: &span, "broadcast"),
        );
        let sender = DirectedSender::new(Arc::clone(&registry), info_span!(parent: &span, "reply"));

        Self {
            registry,
            broadcaster,
            sender,
            config,
            span,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Span that components built around this hub log under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register a freshly upgraded connection under a new random id.
    pub fn connection_opened(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId::random();
        self.registry.register(id, handle);
        id
    }

    /// The underlying stream ended; stop delivering to `id`.
    pub fn connection_closed(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.registry.unregister(id)
    }

    pub fn publish(&self, event_type: &str, payload: &Payload) -> BroadcastTask {
        self.broadcaster.broadcast(event_type, payload)
    }

    pub fn publish_event(&self, event: &Event) -> BroadcastTask {
        self.publish(event.event_type(), event.payload())
    }

    /// Publish a `log` event stamped with the current time.
    pub fn log(
        &self,
        level: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> BroadcastTask {
        self.publish_event(&Event::log(LogRecord::new(level, category, message)))
    }

    pub async fn reply(
        &self,
        id: ConnectionId,
        event_type: &str,
        payload: &Payload,
        timeout: Duration,
    ) -> Result<(), SendError> {
        self.sender.send_to_within(id, event_type, payload, timeout).await
    }

    /// [`reply`](Self::reply) with the configured reply timeout.
    pub async fn reply_default(
        &self,
        id: ConnectionId,
        event_type: &str,
        payload: &Payload,
    ) -> Result<(), SendError> {
        self.reply(id, event_type, payload, self.config.reply_timeout()).await
    }

    /// Directed send governed by a caller-owned cancellation token.
    pub async fn reply_with(
        &self,
        id: ConnectionId,
        event_type: &str,
        payload: &Payload,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.sender.send_to(id, event_type, payload, cancel).await
    }

    pub fn client_count(&self) -> usize {
        self.registry.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PeerKind, PeerProfile};
    use crate::transport::QueuedTransport;

    fn open_console(hub: &EventHub) -> (ConnectionId, crate::transport::FrameReceiver) {
        let (transport, rx) = QueuedTransport::channel(hub.config().queue_capacity);
        (hub.connection_opened(Arc::new(transport)), rx)
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let hub = EventHub::new(HubConfig::default());
        let (a, _rx_a) = open_console(&hub);
        let (b, _rx_b) = open_console(&hub);
        assert_ne!(a, b);
        assert_eq!(hub.client_count(), 2);

        assert!(hub.connection_closed(a).is_some());
        assert!(hub.connection_closed(a).is_none());
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_event_reaches_consoles() {
        let hub = EventHub::new(HubConfig::default());
        let (_, mut rx) = open_console(&hub);

        let peers = vec![PeerProfile {
            name: "Host".to_string(),
            machine_id: "ffff".to_string(),
            vendor: "Launcher".to_string(),
            kind: PeerKind::Host,
        }];
        let report = hub.publish_event(&Event::peer_list(peers)).wait().await;
        assert_eq!(report.delivered, 1);

        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(parsed["type"], "peerList");
        assert_eq!(parsed["data"][0]["kind"], "HOST");
    }

    #[tokio::test]
    async fn test_log_helper() {
        let hub = EventHub::new(HubConfig::default());
        let (_, mut rx) = open_console(&hub);

        let _ = hub.log("warn", "overlay", "daemon restarted").wait().await;

        let frame = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(parsed["type"], "log");
        assert_eq!(parsed["data"]["level"], "warn");
        assert_eq!(parsed["data"]["message"], "daemon restarted");
    }

    #[tokio::test]
    async fn test_reply_to_closed_connection_is_not_found() {
        let hub = EventHub::new(HubConfig::default());
        let (id, _rx) = open_console(&hub);
        let _ = hub.connection_closed(id);

        let err = hub
            .reply_default(id, "status", &Payload::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_from_plain_thread() {
        let hub = Arc::new(EventHub::new(HubConfig::default()));
        let (_, mut rx) = open_console(&hub);

        let producer = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || hub.publish("status", &Payload::Empty))
        };
        let report = producer.join().unwrap().wait().await;

        assert_eq!(report.delivered, 1);
        assert_eq!(rx.recv().await.unwrap().as_str(), r#"{"type":"status","data":null}"#);
    }
}
