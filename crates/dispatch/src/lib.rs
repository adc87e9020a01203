//! # Dispatch
//!
//! Cross-context remote procedure calls through a central hub.
//!
//! ## Architecture
//!
//! An application is split into isolated contexts that share no memory. One of
//! them runs the [`Hub`]; every other one runs a [`Worker`] bound to a single
//! [`Transport`] toward the hub. Any context can register a named service and
//! any context can call a method on any registered service by name, without
//! knowing where it lives:
//!
//! - a worker serves its own services in place and sends everything else up;
//! - the hub owns the registry and forwards calls to the worker that registered
//!   the name, relaying the response back to the caller.
//!
//! Failures cross boundaries as [`Fault`] values and arrive at the caller as
//! the `Err` of its call.

pub mod config;
pub mod hub;
pub mod link;
pub(crate) mod registry;
pub mod service;
pub(crate) mod shared;
pub mod transport;
pub mod worker;


pub use config::Config;
pub use dispatch_wire::Fault;
pub use dispatch_wire::FaultKind;
pub use dispatch_wire::Value;
pub use hub::Hub;
pub use hub::PeerId;
pub use hub::PeerState;
pub use link::Link;
pub use service::Methods;
pub use service::Provider;
pub use service::ProviderKey;
pub use service::Service;
pub use service::decode_args;
pub use transport::DuplexTransport;
pub use transport::Transport;
pub use worker::Worker;
