//! # Dispatch Link
//!
//! One end of a channel between two contexts. A link owns the transport,
//! the table of calls it has sent and not yet seen answered, and the task
//! that pumps inbound frames off the transport.
//!
//! ## Invariants
//!
//! - A correlation id is drawn from a counter shared by every link of the
//!   owning context, so it is never reused while its call is pending.
//! - A pending entry is consumed exactly once: by its response, by a send
//!   failure, by a timeout, or by the link closing.
//! - Closing a link never closes or signals the transport itself.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use dispatch_wire::Fault;
use dispatch_wire::Frame;
use dispatch_wire::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::hub::PeerId;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportId;

type Completion = oneshot::Sender<Result<Value, Fault>>;

/// A cloneable handle to one end of a dispatch channel.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    peer: PeerId,
    label: String,
    transport: Arc<dyn Transport>,
    pending: DashMap<u64, Completion>,
    seq: Arc<AtomicU64>,
    call_timeout: Option<Duration>,
    closed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    pub(crate) fn new(
        peer: PeerId,
        label: impl Into<String>,
        transport: Arc<dyn Transport>,
        seq: Arc<AtomicU64>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                peer,
                label: label.into(),
                transport,
                pending: DashMap::new(),
                seq,
                call_timeout,
                closed: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
        }
    }

    /// The peer on the far side of this link, as numbered by the hub.
    pub fn peer_id(&self) -> PeerId {
        self.inner.peer
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn transport_id(&self) -> TransportId {
        TransportId::of(&self.inner.transport)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &Link) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_pump(&self, handle: JoinHandle<()>) {
        let mut slot = self.inner.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub(crate) async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        self.inner.transport.recv().await
    }

    /// Sends a call on this link and waits for its response, using the
    /// link's configured timeout.
    ///
    /// Always transmits, even when the target might be resolvable locally.
    pub async fn remote_call(
        &self,
        target: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        self.remote_call_with_timeout(target, method, args, self.inner.call_timeout)
            .await
    }

    pub(crate) async fn remote_call_with_timeout(
        &self,
        target: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, Fault> {
        let (seq, rx) = self.prepare_call()?;

        let frame = Frame::call(seq, target, method, args);
        let payload = match dispatch_wire::encode(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.pending.remove(&seq);
                return Err(Fault::protocol(e.to_string()));
            }
        };

        if let Err(e) = self.inner.transport.send(&payload).await {
            self.inner.pending.remove(&seq);
            return Err(Fault::transport(e.to_string()));
        }

        tracing::trace!(link = %self.inner.label, correlation_id = seq, service = target, method, "call sent");

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.pending.remove(&seq);
                    return Err(Fault::transport(format!(
                        "Call {}.{} timed out after {:?}",
                        target, method, limit
                    )));
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| Err(Fault::transport("Response channel closed")))
    }

    /// Allocates a correlation id and registers a pending entry for it.
    fn prepare_call(&self) -> Result<(u64, oneshot::Receiver<Result<Value, Fault>>), Fault> {
        if self.is_closed() {
            return Err(self.closed_fault());
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(seq, tx);

        // close() may have drained the table between the check and the insert
        if self.is_closed() {
            self.inner.pending.remove(&seq);
            return Err(self.closed_fault());
        }

        Ok((seq, rx))
    }

    fn closed_fault(&self) -> Fault {
        Fault::transport(format!("Link {} is closed", self.inner.label))
    }

    /// Sends the response for an inbound call.
    ///
    /// A response that cannot be delivered is logged; the caller on the other
    /// side learns of it through its own channel failing.
    pub(crate) async fn reply(&self, correlation_id: u64, result: Result<Value, Fault>) {
        let frame = Frame::response(correlation_id, result);
        let payload = match dispatch_wire::encode(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                // the value itself was unencodable; tell the caller instead
                tracing::warn!(link = %self.inner.label, correlation_id, error = %e, "could not encode response");
                let fallback = Frame::response(correlation_id, Err(Fault::protocol(e.to_string())));
                match dispatch_wire::encode(&fallback) {
                    Ok(payload) => payload,
                    Err(_) => return,
                }
            }
        };

        if let Err(e) = self.inner.transport.send(&payload).await {
            tracing::warn!(link = %self.inner.label, correlation_id, error = %e, "could not deliver response");
        }
    }

    /// Completes the pending call matching `correlation_id`.
    ///
    /// Stale, duplicate, or unsolicited responses are dropped.
    pub(crate) fn settle(&self, correlation_id: u64, result: Result<Value, Fault>) {
        let Some((_, tx)) = self.inner.pending.remove(&correlation_id) else {
            tracing::warn!(
                link = %self.inner.label,
                correlation_id,
                "dropping response with no matching pending call"
            );
            return;
        };

        // the caller may have stopped waiting
        let _ = tx.send(result);
    }

    /// Marks the link dead and fails every pending call with a transport fault.
    ///
    /// Used by the pump when the transport ends on its own.
    pub(crate) fn fail(&self, reason: &str) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.fail_pending(Fault::transport(reason));
    }

    /// Stops routing on this link: the pump is stopped and every pending call
    /// fails. The transport is left as it is.
    pub(crate) fn close(&self, reason: &str) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let pump = self.inner.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = pump {
            handle.abort();
        }
        self.fail_pending(Fault::transport(reason));
    }

    fn fail_pending(&self, fault: Fault) {
        let keys: Vec<u64> = self.inner.pending.iter().map(|e| *e.key()).collect();
        if !keys.is_empty() {
            tracing::debug!(link = %self.inner.label, count = keys.len(), %fault, "failing pending calls");
        }
        for key in keys {
            if let Some((_, tx)) = self.inner.pending.remove(&key) {
                let _ = tx.send(Err(fault.clone()));
            }
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.inner.peer)
            .field("label", &self.inner.label)
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
