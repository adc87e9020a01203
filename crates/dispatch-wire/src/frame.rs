//! # Protocol Frames
//!
//! Defines the structure of the dispatch envelope (Call vs Response).
//!
//! ## Invariants
//! - **Panic Safety**: Decoding returns `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown record fields are ignored.
//! - **Reserved Target**: `"dispatch"` addresses the broker, never a service.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::DISPATCH_TARGET;
use crate::HANDSHAKE;
use crate::error::Error;
use crate::error::Result;
use crate::fault::Fault;

/// A single message on a dispatch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Call {
        #[serde(rename = "correlationId")]
        correlation_id: u64,
        target: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Response {
        #[serde(rename = "correlationId")]
        correlation_id: u64,
        outcome: Outcome,
    },
}

impl Frame {
    pub fn call(
        correlation_id: u64,
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::Call {
            correlation_id,
            target: target.into(),
            method: method.into(),
            args,
        }
    }

    /// A handshake is an administrative call without payload.
    pub fn handshake(correlation_id: u64) -> Self {
        Self::call(correlation_id, DISPATCH_TARGET, HANDSHAKE, Vec::new())
    }

    pub fn response(correlation_id: u64, result: std::result::Result<Value, Fault>) -> Self {
        Self::Response {
            correlation_id,
            outcome: result.into(),
        }
    }

    pub fn correlation_id(&self) -> u64 {
        match self {
            Self::Call { correlation_id, .. } => *correlation_id,
            Self::Response { correlation_id, .. } => *correlation_id,
        }
    }

    /// True for calls addressed to the broker rather than to a service.
    pub fn is_dispatch(&self) -> bool {
        matches!(self, Self::Call { target, .. } if target == DISPATCH_TARGET)
    }
}

/// The result half of a Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok(Value),
    Err(Fault),
}

impl From<std::result::Result<Value, Fault>> for Outcome {
    fn from(result: std::result::Result<Value, Fault>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(fault) => Self::Err(fault),
        }
    }
}

impl From<Outcome> for std::result::Result<Value, Fault> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(fault) => Err(fault),
        }
    }
}

/// Encodes a frame onto the wire.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    serde_json::to_vec(frame).map_err(|e| Error::Encode(e.to_string()))
}

/// Decodes a frame from the wire.
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
}
