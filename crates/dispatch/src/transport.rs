//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between contexts.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about frames, services or faults.
//!   It moves opaque buffers.
//! - **Ordered**: Buffers sent on one transport arrive at its counterpart in send order.
//!   Nothing is promised across different transports.
//! - **Broker-Owned Receive**: The dispatch endpoint bound to a transport is its only
//!   reader; it runs the receive loop and routes whatever arrives.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The counterpart is unreachable or the channel was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional, ordered message channel to one other context.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one payload to the counterpart.
    ///
    /// # invariants
    /// - Must not interpret the payload content.
    /// - Must preserve the order of successive sends.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Waits for the next payload from the counterpart.
    ///
    /// Returns `Ok(None)` once the counterpart has gone away for good.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

/// Identity of a transport allocation.
///
/// Two handles are the same transport exactly when they share an `Arc`.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransportId(usize);

impl TransportId {
    pub fn of(transport: &Arc<dyn Transport>) -> Self {
        Self(Arc::as_ptr(transport) as *const () as usize)
    }
}

/// An in-process duplex channel built on tokio mpsc channels.
///
/// Models a worker boundary inside one process: messages sent on one end
/// appear on the other end's `recv()` and vice versa, in order.
pub struct DuplexTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexTransport {
    /// Creates a pair of transports connected to each other.
    ///
    /// Messages sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: tx_a,
            rx: Arc::new(Mutex::new(rx_b)),
        };

        let b = Self {
            tx: tx_b,
            rx: Arc::new(Mutex::new(rx_a)),
        };

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
