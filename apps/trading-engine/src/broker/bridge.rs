//! Request/response bridging over the broker's event-stream protocol.
//!
//! The wire side is a full-duplex frame stream: requests go out with a
//! correlation id, responses come back tagged with the same id, and
//! unsolicited events (ticks, executions) arrive interleaved. This
//! module turns that into plain `async fn` calls:
//!
//! * every outbound request allocates a correlation id and a one-shot
//!   completion slot;
//! * a dispatcher task owns the inbound side and resolves slots by id,
//!   forwarding events to the connector;
//! * a per-request timeout resolves the slot with `RequestTimeout`;
//! * transport loss fails every pending slot with `ConnectionLost`.
//!
//! Ordering rule: [`Bridge::install`] must run before any request is
//! issued — the connector's connect sequence enforces this by
//! installing the link first and only then authenticating.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::BrokerError;

/// Upper bound on a single frame body (16 MiB), applied on read.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// One protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Outbound request.
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    /// Inbound reply to a request.
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Unsolicited inbound event.
    Event { event: String, payload: Value },
}

/// The two halves of an established transport link.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to the broker.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames from the broker; closes on transport loss.
    pub inbound: mpsc::Receiver<Frame>,
}

/// A way to (re)establish the broker transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh link. Called once at startup and again on every
    /// reconnect attempt.
    async fn connect(&self) -> Result<TransportLink, BrokerError>;
}

/// Default transport: length-prefixed JSON frames over TCP.
///
/// Each frame is a 4-byte big-endian length followed by the JSON body.
/// Reader and writer run as two tasks owning their half of the stream;
/// either side failing closes the inbound channel, which the dispatcher
/// treats as transport loss.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
}

impl TcpTransport {
    /// Transport targeting `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<TransportLink, BrokerError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|_| BrokerError::ConnectionLost)?;
        let (mut reader, mut writer) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(1024);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let body = match serde_json::to_vec(&frame) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(error = %e, "unencodable frame dropped");
                        continue;
                    }
                };
                #[allow(clippy::cast_possible_truncation)]
                let len = (body.len() as u32).to_be_bytes();
                if writer.write_all(&len).await.is_err()
                    || writer.write_all(&body).await.is_err()
                {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let mut len_buf = [0u8; 4];
                if reader.read_exact(&mut len_buf).await.is_err() {
                    break;
                }
                let len = u32::from_be_bytes(len_buf);
                if len > MAX_FRAME_LEN {
                    warn!(len, "oversized frame, closing transport");
                    break;
                }
                let mut body = vec![0u8; len as usize];
                if reader.read_exact(&mut body).await.is_err() {
                    break;
                }
                match serde_json::from_slice::<Frame>(&body) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable frame dropped"),
                }
            }
            // Dropping inbound_tx closes the channel: transport loss.
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

type CompletionSlot = oneshot::Sender<Result<Value, BrokerError>>;
type PendingMap = Arc<Mutex<HashMap<u64, CompletionSlot>>>;

fn resolve_slot(pending: &PendingMap, id: u64, result: Option<Value>, error: Option<String>) {
    if let Some(slot) = pending.lock().remove(&id) {
        let outcome = match error {
            Some(code) => Err(BrokerError::Protocol(code)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = slot.send(outcome);
    } else {
        debug!(id, "response for unknown or timed-out request");
    }
}

fn fail_all_pending(pending: &PendingMap) {
    let mut pending = pending.lock();
    for (_, slot) in pending.drain() {
        let _ = slot.send(Err(BrokerError::ConnectionLost));
    }
}

/// Correlation core shared by all requests.
#[derive(Debug)]
pub struct Bridge {
    pending: PendingMap,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Bridge {
    /// Bridge with the given per-request timeout, tied to a shutdown
    /// token.
    #[must_use]
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound: Mutex::new(None),
            next_id: AtomicU64::new(1),
            timeout,
            cancel,
        }
    }

    /// Install a fresh link and spawn its dispatcher.
    ///
    /// Returns a receiver for raw broker events and a receiver that
    /// resolves when the link dies (at which point every pending
    /// request has been failed with `ConnectionLost`).
    pub fn install(
        &self,
        link: TransportLink,
    ) -> (mpsc::Receiver<(String, Value)>, oneshot::Receiver<()>) {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;
        *self.outbound.lock() = Some(outbound);

        let (event_tx, event_rx) = mpsc::channel::<(String, Value)>(1024);
        let (dead_tx, dead_rx) = oneshot::channel::<()>();
        let pending = Arc::clone(&self.pending);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = inbound.recv() => frame,
                };
                let Some(frame) = frame else { break };
                match frame {
                    Frame::Response { id, result, error } => {
                        resolve_slot(&pending, id, result, error);
                    }
                    Frame::Event { event, payload } => {
                        if event_tx.send((event, payload)).await.is_err() {
                            break;
                        }
                    }
                    Frame::Request { id, .. } => {
                        warn!(id, "unexpected inbound request frame");
                    }
                }
            }
            fail_all_pending(&pending);
            let _ = dead_tx.send(());
        });

        (event_rx, dead_rx)
    }

    /// Issue one request and await its correlated response.
    ///
    /// # Errors
    ///
    /// `NotConnected` before [`Bridge::install`], `ConnectionLost` when
    /// the link dies mid-flight, `RequestTimeout` after the per-request
    /// bound, `Cancelled` on shutdown, `Protocol` when the broker
    /// answers with an error field.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, BrokerError> {
        let outbound = self
            .outbound
            .lock()
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot_tx, slot_rx) = oneshot::channel();
        self.pending.lock().insert(id, slot_tx);

        let frame = Frame::Request {
            id,
            method: method.to_string(),
            params,
        };
        if outbound.send(frame).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(BrokerError::ConnectionLost);
        }
        debug!(id, method, "request sent");

        let outcome = tokio::select! {
            () = self.cancel.cancelled() => {
                self.pending.lock().remove(&id);
                return Err(BrokerError::Cancelled);
            }
            outcome = tokio::time::timeout(self.timeout, slot_rx) => outcome,
        };

        match outcome {
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BrokerError::RequestTimeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            // Slot dropped without resolution: link died.
            Ok(Err(_)) => Err(BrokerError::ConnectionLost),
            Ok(Ok(result)) => result,
        }
    }

    /// Drop the outbound side; subsequent requests fail `NotConnected`.
    pub fn detach(&self) {
        *self.outbound.lock() = None;
    }
}
