//! # Hub
//!
//! The central broker. It owns the authoritative service registry and the set
//! of attached workers, and it is the only context that can reach every other
//! one: workers never talk to each other directly, a call between two workers
//! is forwarded through here.
//!
//! The hub is an ordinary value. Whoever builds the application's top-level
//! wiring constructs it, attaches workers to it, and shuts it down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dispatch_wire::DISPATCH_TARGET;
use dispatch_wire::Fault;
use dispatch_wire::HANDSHAKE;
use dispatch_wire::SET_SERVICE;
use dispatch_wire::Value;

use crate::config::Config;
use crate::link::Link;
use crate::registry::Registry;
use crate::service::Provider;
use crate::service::ProviderKey;
use crate::service::Service;
use crate::shared;
use crate::shared::Context;
use crate::transport::Transport;
use crate::transport::TransportId;

/// Strong type for peer identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// How a worker refers to the hub at the other end of its only link.
    pub const HUB: PeerId = PeerId(0);
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::HUB {
            write!(f, "hub")
        } else {
            write!(f, "peer-{}", self.0)
        }
    }
}

/// The hub's view of an attached worker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Attached; the handshake has not (yet) succeeded. Calls are still routed.
    Unconfirmed,
    /// Attached and answered the handshake.
    Confirmed,
    /// Not attached.
    Detached,
}

struct PeerEntry {
    link: Link,
    confirmed: Arc<AtomicBool>,
}

/// Handle to a central broker. Clones share the same broker.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: Config,
    seq: Arc<AtomicU64>,
    registry: RwLock<Registry>,
    peers: DashMap<PeerId, PeerEntry>,
    transports: DashMap<TransportId, PeerId>,
    next_peer_id: AtomicU64,
}

impl Hub {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                seq: Arc::new(AtomicU64::new(1)),
                registry: RwLock::new(Registry::new()),
                peers: DashMap::new(),
                transports: DashMap::new(),
                next_peer_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Makes a local object the provider of `service`.
    ///
    /// Replaces any previous provider, with a warning.
    /// WARNING: any method of `provider` becomes callable from every worker.
    pub async fn set_service(
        &self,
        service: impl Into<String>,
        provider: Arc<dyn Service>,
    ) -> Result<(), Fault> {
        let service = service.into();
        shared::check_service_name(&service)?;
        self.inner.register(service, Provider::Local(provider))
    }

    /// Attaches a worker reachable through `transport` and starts the handshake.
    ///
    /// Returns `None`, with a warning, if this exact transport is already attached.
    /// Must be called from within a tokio runtime.
    pub fn add_peer(&self, transport: Arc<dyn Transport>) -> Option<PeerId> {
        let inner = &self.inner;
        let id = match inner.transports.entry(TransportId::of(&transport)) {
            Entry::Occupied(existing) => {
                tracing::warn!(
                    context = %inner.config.name,
                    peer = %existing.get(),
                    "Central dispatch ignoring attempt to add duplicate worker"
                );
                return None;
            }
            Entry::Vacant(slot) => {
                let id = PeerId(inner.next_peer_id.fetch_add(1, Ordering::Relaxed));
                slot.insert(id);
                id
            }
        };

        let link = Link::new(
            id,
            format!("{}->{}", inner.config.name, id),
            transport,
            inner.seq.clone(),
            inner.config.call_timeout,
        );
        let confirmed = Arc::new(AtomicBool::new(false));
        inner.peers.insert(
            id,
            PeerEntry {
                link: link.clone(),
                confirmed: confirmed.clone(),
            },
        );
        shared::attach(inner, &link);
        tracing::debug!(context = %inner.config.name, peer = %id, "worker attached");

        let context = inner.config.name.clone();
        let timeout = inner.config.handshake_timeout;
        tokio::spawn(async move {
            match link
                .remote_call_with_timeout(DISPATCH_TARGET, HANDSHAKE, Vec::new(), timeout)
                .await
            {
                Ok(_) => {
                    confirmed.store(true, Ordering::SeqCst);
                    tracing::debug!(%context, peer = %id, "handshake confirmed");
                }
                Err(fault) => {
                    tracing::error!(%context, peer = %id, %fault, "Could not handshake with worker");
                }
            }
        });

        Some(id)
    }

    /// Removes a provider and every service it backs.
    ///
    /// If the provider is an attached worker it is detached: its pending calls
    /// fail with a transport fault and nothing more is routed to it. The worker
    /// and its transport are left running. Returns the service names removed.
    pub fn remove_provider(&self, provider: impl Into<ProviderKey>) -> Vec<String> {
        self.inner.remove_provider(provider.into())
    }

    /// Where `service` currently lives.
    pub fn service_provider(&self, service: &str) -> Option<Provider> {
        self.inner.service_provider(service)
    }

    /// Calls `method` on `service`, locally or through the owning worker.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        shared::call(&*self.inner, service, method, args).await
    }

    /// The peer attached through `transport`, if any.
    pub fn peer_id(&self, transport: &Arc<dyn Transport>) -> Option<PeerId> {
        self.inner
            .transports
            .get(&TransportId::of(transport))
            .map(|entry| *entry.value())
    }

    pub fn peer_state(&self, peer: PeerId) -> PeerState {
        match self.inner.peers.get(&peer) {
            Some(entry) if entry.confirmed.load(Ordering::SeqCst) => PeerState::Confirmed,
            Some(_) => PeerState::Unconfirmed,
            None => PeerState::Detached,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.inner.peers.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        self.inner.read_registry().names()
    }

    /// Service names grouped by the peer that hosts them.
    pub fn services_by_peer(&self) -> BTreeMap<PeerId, Vec<String>> {
        let registry = self.inner.read_registry();
        self.peers()
            .into_iter()
            .map(|id| (id, registry.owned_by(&ProviderKey::Peer(id))))
            .collect()
    }

    /// Detaches every worker. Local services stay registered.
    pub fn shutdown(&self) {
        for id in self.peers() {
            self.inner.remove_provider(ProviderKey::Peer(id));
        }
    }
}

impl HubInner {
    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `provider` as the owner of `service`.
    ///
    /// A remote provider must still be attached. The check and the insert
    /// happen under the registry lock, which `remove_provider` also holds
    /// while detaching, so a detached peer can never be registered.
    fn register(&self, service: String, provider: Provider) -> Result<(), Fault> {
        let location = format!("{:?}", provider);
        let displaced = {
            let mut registry = self.write_registry();
            if let Provider::Remote(link) = &provider {
                let attached = self
                    .peers
                    .get(&link.peer_id())
                    .is_some_and(|entry| entry.link.same_as(link));
                if !attached {
                    return Err(Fault::transport(format!("{} is not attached", link.peer_id())));
                }
            }
            registry.insert(service.clone(), provider)
        };

        if displaced.is_some() {
            tracing::warn!(
                context = %self.config.name,
                %service,
                "Central dispatch replacing existing service provider"
            );
        }
        tracing::debug!(context = %self.config.name, %service, %location, "service registered");
        Ok(())
    }

    fn remove_provider(&self, key: ProviderKey) -> Vec<String> {
        let (removed, detached) = {
            let mut registry = self.write_registry();
            let removed = registry.remove_provider(&key);
            let detached = match key {
                ProviderKey::Peer(id) => self.peers.remove(&id),
                ProviderKey::Local(_) => None,
            };
            (removed, detached)
        };

        if let Some((id, entry)) = detached {
            self.transports.remove(&entry.link.transport_id());
            entry.link.close("Peer detached");
            tracing::debug!(context = %self.config.name, peer = %id, ?removed, "worker detached");
        }

        removed
    }
}

#[async_trait::async_trait]
impl Context for HubInner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn service_provider(&self, service: &str) -> Option<Provider> {
        self.read_registry().get(service)
    }

    async fn on_dispatch_message(
        &self,
        origin: &Link,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault> {
        match method {
            SET_SERVICE => {
                let Some(service) = args.first().and_then(Value::as_str) else {
                    return Err(Fault::protocol("setService expects a service name"));
                };
                shared::check_service_name(service)?;

                // the sender is the provider; a peer cannot register for another
                self.register(service.to_string(), Provider::Remote(origin.clone()))?;
                Ok(Value::Null)
            }
            _ => {
                tracing::error!(
                    context = %self.config.name,
                    peer = %origin.peer_id(),
                    method,
                    "Central dispatch received message for unknown method"
                );
                Err(Fault::unknown_method(DISPATCH_TARGET, method))
            }
        }
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        for entry in self.peers.iter() {
            entry.link.close("Hub dropped");
        }
    }
}
