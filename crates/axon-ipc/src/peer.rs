//! Client-side counterpart to the broker: one outbound connection, the
//! same duplex pump, plus a connectivity status signal.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use axon_core::{ConnectionId, IpcError, Payload};

use crate::config::PeerConfig;
use crate::connection::{self, ConnectionHandle, HandlerRegistry};

pub struct Peer {
    config: PeerConfig,
    handlers: Arc<HandlerRegistry>,
    status: watch::Sender<bool>,
    link: Arc<Mutex<Option<ConnectionHandle>>>,
}

impl Peer {
    pub fn new(config: PeerConfig) -> Self {
        let (status, _) = watch::channel(false);
        Self {
            config,
            handlers: Arc::new(HandlerRegistry::new()),
            status,
            link: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect to the broker and start pumping. No-op when already
    /// connected. A failed connect reports disconnected and surfaces the
    /// error; there is no automatic retry.
    pub async fn connect(&self) -> Result<(), IpcError> {
        if self.is_connected() {
            return Ok(());
        }

        let path = self.config.socket_path.clone();
        let stream = match UnixStream::connect(&path).await {
            Ok(stream) => stream,
            Err(source) => {
                self.status.send_replace(false);
                return Err(IpcError::Connect { path, source });
            }
        };

        let id = ConnectionId::new();
        let shutdown = CancellationToken::new();
        let (handle, outbound) = connection::connection_channel(id.clone(), shutdown.clone());
        *self.link.lock() = Some(handle);
        emit(&self.status, true);

        let handlers = Arc::clone(&self.handlers);
        let status = self.status.clone();
        let link = Arc::clone(&self.link);
        let max_frame_len = self.config.max_frame_len;
        tokio::spawn(async move {
            connection::run_connection(stream, id.clone(), handlers, outbound, shutdown, max_frame_len)
                .await;
            // A reconnect may already have replaced the link; only the
            // current connection's teardown flips the status.
            let mut guard = link.lock();
            let is_current = guard.as_ref().is_some_and(|h| h.id() == &id);
            if is_current {
                *guard = None;
            }
            drop(guard);
            if is_current {
                emit(&status, false);
                tracing::info!(connection_id = %id, "disconnected from broker");
            }
        });

        tracing::info!(path = %self.config.socket_path.display(), "connected to broker");
        Ok(())
    }

    /// Queue a payload for the broker. Returns accepted-for-queuing, not
    /// delivered.
    pub fn send(&self, payload: Payload) -> bool {
        match &*self.link.lock() {
            Some(handle) => handle.enqueue(payload),
            None => false,
        }
    }

    /// Close the connection; the pump emits the disconnected transition
    /// exactly once. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if let Some(handle) = &*self.link.lock() {
            handle.close();
        }
    }

    /// Register an inbound message callback for broker-originated
    /// payloads. Handlers run in registration order.
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.add(handler);
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().as_ref().is_some_and(|h| !h.is_closed())
    }

    /// Watch connectivity. The receiver holds the current state; changes
    /// are emitted on transitions only.
    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }
}

/// Notify watchers only when the state actually changes.
fn emit(status: &watch::Sender<bool>, connected: bool) {
    status.send_if_modified(|current| {
        let changed = *current != connected;
        *current = connected;
        changed
    });
}
