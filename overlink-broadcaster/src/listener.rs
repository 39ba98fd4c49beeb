use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::error::{BroadcasterError, Result};
use crate::events::{event_types, FieldList, Payload};
use crate::hub::EventHub;
use crate::registry::ConnectionId;
use crate::transport::{spawn_line_writer, Transport};

/// Local Unix socket that consoles connect to for newline-delimited events.
///
/// Stands in for the upgrade handler: each accepted stream is registered with
/// the hub and unregistered when the console hangs up.
pub struct SocketListener {
    socket_path: PathBuf,
    hub: Arc<EventHub>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
    span: Span,
}

impl SocketListener {
    pub fn new(socket_path: impl AsRef<Path>, hub: Arc<EventHub>) -> Self {
        let span = info_span!(parent: hub.span(), "listener");
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            hub,
            accept_task: Mutex::new(None),
            running: Arc::new(RwLock::new(false)),
            span,
        }
    }

    /// Listener on the path from the hub's configuration.
    pub fn from_config(hub: Arc<EventHub>) -> anyhow::Result<Self> {
        let path = hub.config().resolve_socket_path()?;
        Ok(Self::new(path, hub))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and start accepting consoles.
    pub async fn start(&self) -> Result<()> {
        if *self.running.read().await {
            return Err(BroadcasterError::AlreadyRunning);
        }

        // Stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                overlink_paths::ensure_private_dir(parent)
                    .map_err(|_| BroadcasterError::SocketPath(self.socket_path.clone()))?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        overlink_paths::secure_socket_permissions(&self.socket_path)
            .map_err(|_| BroadcasterError::SocketPath(self.socket_path.clone()))?;

        info!(parent: &self.span, path = ?self.socket_path, "event listener started (permissions: 0600)");

        *self.running.write().await = true;

        let hub = Arc::clone(&self.hub);
        let running = Arc::clone(&self.running);
        let span = self.span.clone();

        let task = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        debug!(parent: &span, "console connection accepted");
                        let _ = tokio::spawn(serve_console(stream, Arc::clone(&hub), span.clone()));
                    }
                    Err(e) => {
                        error!(parent: &span, error = %e, "failed to accept console");
                    }
                }
            }
            info!(parent: &span, "accept task stopped");
        });

        *self.accept_task.lock().await = Some(task);

        Ok(())
    }

    /// Stop accepting and remove the socket file. Connected consoles stay registered.
    pub async fn stop(&self) -> Result<()> {
        if !*self.running.read().await {
            return Err(BroadcasterError::NotStarted);
        }

        *self.running.write().await = false;

        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        info!(parent: &self.span, "event listener stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.accept_task.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Own one console for its whole life: register, greet, wait for hang-up, unregister.
///
/// The session also ends when a broadcast evicts the console; its socket is
/// then dropped without draining so the console sees EOF.
async fn serve_console(stream: UnixStream, hub: Arc<EventHub>, span: Span) {
    let (mut read_half, write_half) = stream.into_split();
    let (transport, writer_task) =
        spawn_line_writer(write_half, hub.config().queue_capacity, span.clone());
    let transport = Arc::new(transport);

    let id = hub.connection_opened(transport.clone());

    let greeting = Payload::Record(FieldList::new().field("id", id.to_string()));
    if let Err(e) = hub.reply_default(id, event_types::CONNECTED, &greeting).await {
        warn!(parent: &span, conn_id = %id, error = %e, "failed to greet console");
    }

    let hung_up = tokio::select! {
        () = discard_until_eof(&mut read_half, id, &span) => true,
        () = transport.closed() => false,
    };

    let _ = hub.connection_closed(id);
    transport.close();
    if !hung_up {
        // The writer may be parked on a console that stopped reading
        writer_task.abort();
    }
    let _ = writer_task.await;
    info!(parent: &span, conn_id = %id, hung_up, "console disconnected");
}

/// Consoles are receive-only; anything they send is discarded.
async fn discard_until_eof(read_half: &mut OwnedReadHalf, id: ConnectionId, span: &Span) {
    let mut buf = [0u8; 1024];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(parent: span, conn_id = %id, error = %e, "console read failed");
                break;
            }
        }
    }
}
