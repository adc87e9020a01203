//! # Dispatch Wire
//!
//! The wire protocol spoken between a hub and its workers.
//!
//! ## Architecture
//!
//! Every message is a [`Frame`]: either a `Call` carrying a correlation id, a
//! target, a method name and positional arguments, or a `Response` carrying the
//! same correlation id and an [`Outcome`]. Failures travel as a [`Fault`], a
//! plain envelope that both sides serialize the same way, so no rich error type
//! ever needs to cross the boundary.
//!
//! Frames are encoded as self-describing JSON records. The transport moves the
//! resulting bytes and knows nothing about their content.

pub mod error;
pub mod fault;
pub mod frame;


pub use error::Error;
pub use error::Result;
pub use fault::Fault;
pub use fault::FaultKind;
pub use frame::Frame;
pub use frame::Outcome;
pub use frame::decode;
pub use frame::encode;

/// Argument and return values that may cross a context boundary.
pub use serde_json::Value;

/// Target reserved for broker-internal administrative verbs.
pub const DISPATCH_TARGET: &str = "dispatch";

/// Liveness probe sent by the hub right after a worker is attached.
pub const HANDSHAKE: &str = "handshake";

/// Sent by a worker to claim ownership of a service name.
pub const SET_SERVICE: &str = "setService";

/// Asks a worker to shut its dispatch endpoint down.
pub const TERMINATE: &str = "terminate";
