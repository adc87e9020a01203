//! # Services and Providers
//!
//! A service is a named set of methods living in exactly one context. Whoever
//! registers it decides which methods exist; every one of them becomes callable
//! from every context, there is no per-method access control.
//!
//! A [`Provider`] is what currently backs a service name from the point of view
//! of one context: either a local object or the link toward the context that
//! hosts it. Both variants answer the same capability, "invoke a named method
//! with serializable arguments and return a future".

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use dispatch_wire::Fault;
use dispatch_wire::FaultKind;
use dispatch_wire::Value;
use futures::FutureExt;
use serde::de::DeserializeOwned;

use crate::hub::PeerId;
use crate::link::Link;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An object whose methods can be invoked through dispatch.
#[async_trait::async_trait]
pub trait Service: Send + Sync + 'static {
    /// Whether `method` exists on this service.
    ///
    /// Checked before `invoke`; a method this returns `false` for is rejected
    /// as unknown without invoking anything.
    fn responds_to(&self, method: &str) -> bool;

    /// Runs `method` with positional arguments.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, Fault>;
}

type Handler = Box<dyn Fn(Vec<Value>) -> BoxFuture<Result<Value, Fault>> + Send + Sync>;

/// A service assembled from named async closures.
///
/// ```ignore
/// let math = Methods::new()
///     .method("add", |args| async move {
///         let (a, b): (i64, i64) = decode_args(args)?;
///         Ok(json!(a + b))
///     });
/// hub.set_service("math", Arc::new(math)).await?;
/// ```
#[derive(Default)]
pub struct Methods {
    handlers: HashMap<String, Handler>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Fault>> + Send + 'static,
    {
        let handler: Handler = Box::new(move |args| Box::pin(handler(args)));
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait::async_trait]
impl Service for Methods {
    fn responds_to(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        match self.handlers.get(method) {
            Some(handler) => handler(args).await,
            None => Err(Fault::new(
                FaultKind::UnknownMethod,
                format!("Method not found: {}", method),
            )),
        }
    }
}

/// Deserializes positional arguments into a tuple or struct.
///
/// Fails with a protocol fault naming what did not fit.
pub fn decode_args<T: DeserializeOwned>(args: Vec<Value>) -> Result<T, Fault> {
    serde_json::from_value(Value::Array(args))
        .map_err(|e| Fault::protocol(format!("Bad arguments: {}", e)))
}

/// Identity of a provider, independent of the names it is registered under.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderKey {
    /// A local object, identified by its allocation.
    Local(usize),
    /// An attached peer.
    Peer(PeerId),
}

impl<T: Service + ?Sized> From<&Arc<T>> for ProviderKey {
    fn from(service: &Arc<T>) -> Self {
        Self::Local(Arc::as_ptr(service) as *const () as usize)
    }
}

impl From<PeerId> for ProviderKey {
    fn from(peer: PeerId) -> Self {
        Self::Peer(peer)
    }
}

impl From<&Provider> for ProviderKey {
    fn from(provider: &Provider) -> Self {
        provider.key()
    }
}

/// The location currently backing a service name.
#[derive(Clone)]
pub enum Provider {
    Local(Arc<dyn Service>),
    Remote(Link),
}

impl Provider {
    /// True exactly when calls must be transmitted rather than invoked in place.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    pub fn key(&self) -> ProviderKey {
        match self {
            Self::Local(service) => ProviderKey::from(service),
            Self::Remote(link) => ProviderKey::Peer(link.peer_id()),
        }
    }

    /// Invokes `method` on whatever backs `service`.
    ///
    /// A local method runs in place, so it starts before this future first
    /// yields; a panic inside it surfaces as a provider fault.
    pub async fn invoke(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        match self {
            Self::Local(provider) => {
                if !provider.responds_to(method) {
                    return Err(Fault::unknown_method(service, method));
                }
                match AssertUnwindSafe(provider.invoke(method, args)).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(Fault::provider(format!(
                        "{}.{} panicked: {}",
                        service,
                        method,
                        panic_message(payload)
                    ))),
                }
            }
            Self::Remote(link) => link.remote_call(service, method, args).await,
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "Provider::Local({:?})", self.key()),
            Self::Remote(link) => write!(f, "Provider::Remote({})", link.label()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
