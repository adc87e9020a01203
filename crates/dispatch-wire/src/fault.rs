//! # Fault Envelope
//!
//! The serializable shape of every error a caller can observe.
//!
//! A fault is deliberately flat: a kind, a message, and an optional
//! description. Whatever went wrong on the executing side is reduced to this
//! before it is sent, and the receiving side rejects the original call with it
//! unchanged.

use serde::Deserialize;
use serde::Serialize;

/// Classifies why a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultKind {
    /// No registry entry exists for the requested service.
    UnknownService,
    /// The provider was resolved but does not answer the requested method.
    UnknownMethod,
    /// The invoked method itself failed.
    Provider,
    /// The channel failed to deliver the call or its response.
    Transport,
    /// A frame or administrative request was structurally invalid.
    Protocol,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownService => "unknown service",
            Self::UnknownMethod => "unknown method",
            Self::Provider => "provider error",
            Self::Transport => "transport error",
            Self::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

/// The error envelope carried by a failed [`Outcome`](crate::Outcome).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            description: None,
        }
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(FaultKind::UnknownService, format!("Service not found: {}", service))
    }

    pub fn unknown_method(service: &str, method: &str) -> Self {
        Self::new(
            FaultKind::UnknownMethod,
            format!("Method not found: {}.{}", service, method),
        )
    }

    /// A failure raised by the provider's own code.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Provider, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Protocol, message)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "{}: {} ({})", self.kind, self.message, desc),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Fault {}
