//! # Worker
//!
//! The dispatch endpoint of a worker context. A worker has exactly one link,
//! upstream to the hub, and cannot see any other worker. It serves calls for
//! the services it hosts itself and hands everything else to the hub, which
//! forwards to whichever worker owns the name.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use dashmap::DashMap;
use dispatch_wire::DISPATCH_TARGET;
use dispatch_wire::Fault;
use dispatch_wire::HANDSHAKE;
use dispatch_wire::SET_SERVICE;
use dispatch_wire::TERMINATE;
use dispatch_wire::Value;
use tokio::sync::watch;

use crate::config::Config;
use crate::hub::PeerId;
use crate::link::Link;
use crate::service::Provider;
use crate::service::Service;
use crate::shared;
use crate::shared::Context;
use crate::transport::Transport;

/// Handle to a worker's dispatch endpoint. Clones share the same endpoint.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    config: Config,
    services: DashMap<String, Arc<dyn Service>>,
    upstream: Link,
    connected: watch::Sender<bool>,
}

impl Worker {
    /// Binds a worker endpoint to its channel toward the hub.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let upstream = Link::new(
            PeerId::HUB,
            format!("{}->{}", config.name, PeerId::HUB),
            transport,
            Arc::new(AtomicU64::new(1)),
            config.call_timeout,
        );
        let (connected, _) = watch::channel(false);

        let inner = Arc::new(WorkerInner {
            config,
            services: DashMap::new(),
            upstream,
            connected,
        });
        shared::attach(&inner, &inner.upstream);

        Self { inner }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Hosts `provider` in this worker and announces it to the hub.
    ///
    /// Resolves once the hub has recorded this worker as the owner. If the
    /// hub cannot be told, the local entry is rolled back to whatever was
    /// hosted under `service` before.
    /// WARNING: any method of `provider` becomes callable from every context.
    pub async fn set_service(
        &self,
        service: impl Into<String>,
        provider: Arc<dyn Service>,
    ) -> Result<(), Fault> {
        let service = service.into();
        shared::check_service_name(&service)?;

        let previous = self.inner.services.insert(service.clone(), provider.clone());
        if previous.is_some() {
            tracing::warn!(
                context = %self.inner.config.name,
                %service,
                "Worker dispatch replacing existing service provider"
            );
        }

        let announced = self
            .inner
            .upstream
            .remote_call(DISPATCH_TARGET, SET_SERVICE, vec![Value::String(service.clone())])
            .await;

        if let Err(fault) = &announced {
            tracing::warn!(
                context = %self.inner.config.name,
                %service,
                %fault,
                "hub refused service; rolling back"
            );
            self.inner.roll_back(&service, &provider, previous);
        }
        announced.map(|_| ())
    }

    /// Calls `method` on `service`, locally if hosted here, otherwise via the hub.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        shared::call(&*self.inner, service, method, args).await
    }

    /// Resolves once the hub's handshake has been received.
    pub async fn wait_for_connection(&self) {
        let mut rx = self.inner.connected.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|connected| *connected).await;
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// True once the upstream link has been shut down or lost.
    pub fn is_closed(&self) -> bool {
        self.inner.upstream.is_closed()
    }

    /// Names of the services hosted here, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.services.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Stops routing on the upstream link. Pending calls fail with a
    /// transport fault; the transport itself is left open.
    pub fn shutdown(&self) {
        self.inner.shutdown("Worker shut down");
    }
}

impl WorkerInner {
    /// Undoes a local registration, unless another one has replaced it since.
    fn roll_back(&self, service: &str, provider: &Arc<dyn Service>, previous: Option<Arc<dyn Service>>) {
        match previous {
            Some(previous) => {
                if let Some(mut entry) = self.services.get_mut(service) {
                    if Arc::ptr_eq(entry.value(), provider) {
                        *entry = previous;
                    }
                }
            }
            None => {
                self.services.remove_if(service, |_, current| Arc::ptr_eq(current, provider));
            }
        }
    }

    fn shutdown(&self, reason: &str) {
        self.upstream.close(reason);
        self.connected.send_replace(false);
        tracing::debug!(context = %self.config.name, %reason, "worker dispatch stopped");
    }
}

#[async_trait::async_trait]
impl Context for WorkerInner {
    fn name(&self) -> &str {
        &self.config.name
    }

    /// Local services first; the hub is the provider of last resort.
    fn service_provider(&self, service: &str) -> Option<Provider> {
        match self.services.get(service) {
            Some(entry) => Some(Provider::Local(entry.value().clone())),
            None => Some(Provider::Remote(self.upstream.clone())),
        }
    }

    async fn on_dispatch_message(
        &self,
        origin: &Link,
        method: &str,
        _args: Vec<Value>,
    ) -> Result<Value, Fault> {
        match method {
            HANDSHAKE => {
                self.connected.send_replace(true);
                tracing::debug!(context = %self.config.name, link = origin.label(), "handshake received");
                Ok(Value::Null)
            }
            TERMINATE => {
                // the response still goes out: closing the link leaves the transport open
                self.shutdown("Terminated by hub");
                Ok(Value::Null)
            }
            _ => {
                tracing::error!(
                    context = %self.config.name,
                    method,
                    "Worker dispatch received message for unknown method"
                );
                Err(Fault::unknown_method(DISPATCH_TARGET, method))
            }
        }
    }
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        self.upstream.close("Worker dropped");
    }
}
