//! Unix-socket broker: accepts peer connections and fans broadcasts out to
//! every live connection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use axon_core::{ConnectionId, IpcError, Payload};

use crate::config::BrokerConfig;
use crate::connection::{self, ConnectionHandle, HandlerRegistry};

type ConnectionSet = Arc<Mutex<HashMap<ConnectionId, ConnectionHandle>>>;

/// One broker per process, constructed at startup and shared by reference
/// with every collaborator that broadcasts or handles inbound messages.
pub struct Broker {
    config: BrokerConfig,
    handlers: Arc<HandlerRegistry>,
    state: Mutex<BrokerState>,
}

enum BrokerState {
    Stopped,
    Listening(Listening),
}

struct Listening {
    connections: ConnectionSet,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(HandlerRegistry::new()),
            state: Mutex::new(BrokerState::Stopped),
        }
    }

    /// Bind the endpoint and start accepting peers. No-op when already
    /// listening. A stale socket file left by a dead broker is reclaimed;
    /// an endpoint owned by a live broker is fatal.
    pub async fn start(&self) -> Result<(), IpcError> {
        if matches!(*self.state.lock(), BrokerState::Listening(_)) {
            return Ok(());
        }

        let path = self.config.socket_path.clone();
        reclaim_stale_socket(&path).await?;
        let listener = UnixListener::bind(&path).map_err(|source| IpcError::Bind {
            path: path.clone(),
            source,
        })?;

        let connections: ConnectionSet = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&connections),
            Arc::clone(&self.handlers),
            shutdown.clone(),
            self.config.max_frame_len,
        ));

        *self.state.lock() = BrokerState::Listening(Listening {
            connections,
            shutdown,
            accept_task,
        });
        tracing::info!(path = %path.display(), "broker listening");
        Ok(())
    }

    /// Stop listening, close every live connection best-effort, and remove
    /// the socket file. Safe to call repeatedly.
    pub fn stop(&self) {
        let state = std::mem::replace(&mut *self.state.lock(), BrokerState::Stopped);
        let BrokerState::Listening(listening) = state else {
            return;
        };

        listening.shutdown.cancel();
        listening.accept_task.abort();

        let mut connections = listening.connections.lock();
        for handle in connections.values() {
            handle.close();
        }
        connections.clear();
        drop(connections);

        if let Err(error) = std::fs::remove_file(&self.config.socket_path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%error, "failed to remove socket file");
            }
        }
        tracing::info!("broker stopped");
    }

    /// Enqueue a payload onto every live connection's outbound queue.
    /// Fire-and-forget: returns as soon as the frames are queued; peers that
    /// connect afterwards never see this message. No-op when stopped.
    pub fn broadcast(&self, payload: Payload) {
        let state = self.state.lock();
        let BrokerState::Listening(listening) = &*state else {
            return;
        };
        let connections = listening.connections.lock();
        for handle in connections.values() {
            handle.enqueue(payload.clone());
        }
    }

    /// Register an inbound message callback, visible to all current and
    /// future connections. Handlers run in registration order.
    pub fn add_handler<F>(&self, handler: F)
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.add(handler);
    }

    pub fn is_listening(&self) -> bool {
        matches!(*self.state.lock(), BrokerState::Listening(_))
    }

    pub fn connection_count(&self) -> usize {
        match &*self.state.lock() {
            BrokerState::Listening(listening) => listening.connections.lock().len(),
            BrokerState::Stopped => 0,
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    connections: ConnectionSet,
    handlers: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    max_frame_len: usize,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    spawn_connection(stream, &connections, &handlers, &shutdown, max_frame_len);
                }
                Err(error) => {
                    tracing::error!(%error, "accept failed");
                    break;
                }
            }
        }
    }
}

fn spawn_connection(
    stream: UnixStream,
    connections: &ConnectionSet,
    handlers: &Arc<HandlerRegistry>,
    shutdown: &CancellationToken,
    max_frame_len: usize,
) {
    let id = ConnectionId::new();
    let token = shutdown.child_token();
    let (handle, outbound) = connection::connection_channel(id.clone(), token.clone());

    {
        let mut set = connections.lock();
        set.insert(id.clone(), handle);
        tracing::info!(connection_id = %id, total = set.len(), "peer connected");
    }

    let connections = Arc::clone(connections);
    let handlers = Arc::clone(handlers);
    tokio::spawn(async move {
        connection::run_connection(stream, id.clone(), handlers, outbound, token, max_frame_len)
            .await;
        let mut set = connections.lock();
        set.remove(&id);
        tracing::info!(connection_id = %id, total = set.len(), "peer disconnected");
    });
}

/// A socket file with no live listener behind it is removed; one owned by a
/// live broker is left alone and reported as in use.
async fn reclaim_stale_socket(path: &Path) -> Result<(), IpcError> {
    if !path.exists() {
        return Ok(());
    }
    match UnixStream::connect(path).await {
        Ok(_) => Err(IpcError::EndpointInUse(path.to_path_buf())),
        Err(_) => {
            tracing::warn!(path = %path.display(), "removing stale socket file");
            std::fs::remove_file(path)?;
            Ok(())
        }
    }
}
