//! Per-connection duplex message pump.
//!
//! Each live connection runs two independent tasks: a receive loop that
//! decodes inbound frames and dispatches them to registered handlers, and a
//! send loop that drains the connection's outbound queue. Either loop
//! terminating cancels the shared token, which unblocks the other loop, so
//! teardown happens exactly once per connection.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use axon_core::{ConnectionId, Payload};

use crate::codec::PayloadCodec;

/// Callback invoked for every inbound payload, in registration order.
pub type Handler = Box<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;

/// Append-only set of inbound message callbacks, shared by every connection
/// on one side of the bus. There is no unregister.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, handler: F)
    where
        F: Fn(&Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(handler));
    }

    /// Invoke every handler on one payload. A failing handler is logged and
    /// never stops dispatch to the rest.
    pub fn dispatch(&self, payload: &Payload) {
        for (index, handler) in self.handlers.read().iter().enumerate() {
            if let Err(error) = handler(payload) {
                tracing::warn!(handler = index, %error, "message handler failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owner-side handle to one live connection.
///
/// Cheap to clone. Enqueueing after teardown is accepted and dropped; the
/// caller must not assume delivery.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Payload>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a payload for this connection's send loop. Returns
    /// accepted-for-queuing, not delivered.
    pub fn enqueue(&self, payload: Payload) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.outbound.send(payload).is_ok()
    }

    /// Begin teardown. Safe to call repeatedly.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Build the handle and queue receiver for a fresh connection.
pub(crate) fn connection_channel(
    id: ConnectionId,
    shutdown: CancellationToken,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Payload>) {
    let (outbound, rx) = mpsc::unbounded_channel();
    (
        ConnectionHandle {
            id,
            outbound,
            shutdown,
        },
        rx,
    )
}

/// Run both pump loops to completion. Returns once the connection is fully
/// torn down; dropping the stream halves closes the socket.
pub(crate) async fn run_connection(
    stream: UnixStream,
    id: ConnectionId,
    handlers: Arc<HandlerRegistry>,
    outbound: mpsc::UnboundedReceiver<Payload>,
    shutdown: CancellationToken,
    max_frame_len: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let frames_in = FramedRead::new(read_half, PayloadCodec::with_max_frame_len(max_frame_len));
    let frames_out = FramedWrite::new(write_half, PayloadCodec::with_max_frame_len(max_frame_len));

    let recv = tokio::spawn(recv_loop(frames_in, id.clone(), handlers, shutdown.clone()));
    let send = tokio::spawn(send_loop(frames_out, id.clone(), outbound, shutdown.clone()));

    let _ = recv.await;
    let _ = send.await;
    tracing::debug!(connection_id = %id, "connection torn down");
}

async fn recv_loop(
    mut frames: FramedRead<OwnedReadHalf, PayloadCodec>,
    id: ConnectionId,
    handlers: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(payload)) => handlers.dispatch(&payload),
                Some(Err(error)) => {
                    tracing::warn!(connection_id = %id, %error, "read failed");
                    break;
                }
                None => {
                    tracing::debug!(connection_id = %id, "peer closed stream");
                    break;
                }
            }
        }
    }
    shutdown.cancel();
}

async fn send_loop(
    mut frames: FramedWrite<OwnedWriteHalf, PayloadCodec>,
    id: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<Payload>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            queued = outbound.recv() => match queued {
                Some(payload) => {
                    if let Err(error) = frames.send(payload).await {
                        tracing::warn!(connection_id = %id, %error, "write failed");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    fn pump(
        stream: UnixStream,
        handlers: Arc<HandlerRegistry>,
    ) -> (ConnectionHandle, tokio::task::JoinHandle<()>) {
        let id = ConnectionId::new();
        let shutdown = CancellationToken::new();
        let (handle, rx) = connection_channel(id.clone(), shutdown.clone());
        let task = tokio::spawn(run_connection(
            stream,
            id,
            handlers,
            rx,
            shutdown,
            crate::codec::MAX_FRAME_LEN,
        ));
        (handle, task)
    }

    #[tokio::test]
    async fn inbound_frames_dispatch_in_order() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(HandlerRegistry::new());
        let sink = Arc::clone(&seen);
        registry.add(move |p| {
            sink.lock().push(p.get("n").cloned().unwrap());
            Ok(())
        });

        let (handle, task) = pump(ours, registry);

        let mut theirs = theirs;
        theirs.write_all(b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
        handle.close();
        let _ = task.await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_siblings() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(HandlerRegistry::new());
        registry.add(|_| anyhow::bail!("handler exploded"));
        let sink = Arc::clone(&seen);
        registry.add(move |p| {
            sink.lock().push(p.msg_type().unwrap_or_default().to_string());
            Ok(())
        });

        let (handle, task) = pump(ours, registry);

        let mut theirs = theirs;
        theirs.write_all(b"{\"type\":\"a\"}\n{\"type\":\"b\"}\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
        handle.close();
        let _ = task.await;
    }

    #[tokio::test]
    async fn enqueued_payloads_are_written_in_order() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (handle, task) = pump(ours, Arc::new(HandlerRegistry::new()));

        assert!(handle.enqueue(payload(json!({"n": 1}))));
        assert!(handle.enqueue(payload(json!({"n": 2}))));

        let mut lines = BufReader::new(theirs).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, "{\"n\":1}");
        assert_eq!(second, "{\"n\":2}");

        handle.close();
        let _ = task.await;
    }

    #[tokio::test]
    async fn close_tears_down_both_loops() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let (handle, task) = pump(ours, Arc::new(HandlerRegistry::new()));

        handle.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump did not terminate after close")
            .unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn peer_hangup_tears_down() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let (handle, task) = pump(ours, Arc::new(HandlerRegistry::new()));

        drop(theirs);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump did not terminate after hangup")
            .unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn enqueue_after_close_reports_not_queued() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let (handle, task) = pump(ours, Arc::new(HandlerRegistry::new()));

        handle.close();
        let _ = task.await;
        assert!(!handle.enqueue(payload(json!({"late": true}))));
    }

    #[tokio::test]
    async fn malformed_inbound_line_keeps_connection_alive() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(HandlerRegistry::new());
        let sink = Arc::clone(&seen);
        registry.add(move |p| {
            sink.lock().push(p.get("n").cloned().unwrap());
            Ok(())
        });

        let (handle, task) = pump(ours, registry);

        let mut theirs = theirs;
        theirs
            .write_all(b"{\"n\":1}\ngarbage!!\n{\"n\":2}\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert!(!handle.is_closed());
        handle.close();
        let _ = task.await;
    }
}
