//! Real-time event distribution for overlink consoles
//!
//! This crate keeps the set of connected UI consoles and pushes typed status
//! events to them. Producers hand an event to the [`EventHub`]; it is encoded
//! once and queued to every open connection in publish order. A console whose
//! queue is full gets its own timed send, so it never holds up the others.
//!
//! # Features
//!
//! - Envelope codec: `{"type":"<type>","data":<data>}`, one message per frame
//! - Thread-safe connection registry keyed by [`ConnectionId`]
//! - Best-effort broadcast that prunes failed or closed connections
//! - Directed sends with a typed outcome, cancellation and timeouts
//! - Optional Unix socket listener speaking newline-delimited JSON
//!
//! # Event Types
//!
//! - `log` - log record (`timestamp`, `level`, `category`, `message`)
//! - `status` - room state snapshot
//! - `peerList` - players known to the room
//! - `connected` - greeting carrying the console's connection id
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use overlink_broadcaster::{
//!     EventHub, HubConfig, Payload, QueuedTransport, RoomState, RoomStatus,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = EventHub::new(HubConfig::default());
//!
//!     // An upgrade handler registers the write side of each console
//!     let (transport, mut frames) = QueuedTransport::channel(64);
//!     let id = hub.connection_opened(Arc::new(transport));
//!     tokio::spawn(async move {
//!         while let Some(frame) = frames.recv().await {
//!             println!("{frame}");
//!         }
//!     });
//!
//!     // Domain services publish
//!     hub.publish(
//!         "status",
//!         &Payload::Status(RoomStatus {
//!             state: RoomState::HostOk,
//!             room: Some("U/ABCD-EFGH".to_string()),
//!             server_port: Some(25565),
//!         }),
//!     );
//!     hub.log("info", "overlay", "peer joined");
//!
//!     // ...or answer one console
//!     hub.reply(id, "status", &Payload::Empty, Duration::from_secs(1)).await?;
//!
//!     hub.connection_closed(id);
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod sender;
pub mod transport;

// Re-exports
pub use broadcaster::{BroadcastTask, Broadcaster, DeliveryReport};
pub use codec::{encode, encode_event, Frame};
pub use config::HubConfig;
pub use error::{
    BroadcasterError, EncodeError, Result, SendError, TransportError, TrySendError,
};
pub use events::{
    event_types, Event, FieldList, FieldValue, LogRecord, Payload, PeerKind, PeerProfile,
    RoomState, RoomStatus,
};
pub use hub::EventHub;
pub use listener::SocketListener;
pub use registry::{ConnectionId, Registry};
pub use sender::DirectedSender;
pub use transport::{
    spawn_line_writer, ConnectionHandle, ConnectionState, FrameReceiver, QueuedTransport,
    Transport,
};
