//! # Shared Protocol Core
//!
//! Logic common to the hub and to workers: the generic `call` entry point, the
//! inbound frame handler bound to every link, and the pump that feeds it.
//!
//! A context only has to say where a service lives ([`Context::service_provider`])
//! and how it answers administrative verbs ([`Context::on_dispatch_message`]);
//! routing, invocation, correlation and error marshalling are the same
//! everywhere.

use std::sync::Arc;
use std::sync::Weak;

use dispatch_wire::DISPATCH_TARGET;
use dispatch_wire::Fault;
use dispatch_wire::Frame;
use dispatch_wire::Value;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;

use crate::link::Link;
use crate::service::BoxFuture;
use crate::service::Provider;

/// One participant in the dispatch system.
#[async_trait::async_trait]
pub(crate) trait Context: Send + Sync + 'static {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Where `service` lives, as far as this context knows.
    fn service_provider(&self, service: &str) -> Option<Provider>;

    /// Handles a call addressed to the broker itself, received on `origin`.
    async fn on_dispatch_message(
        &self,
        origin: &Link,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, Fault>;
}

/// Calls `method` on `service`, wherever it lives.
pub(crate) async fn call<C: Context + ?Sized>(
    ctx: &C,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    if service == DISPATCH_TARGET {
        return Err(reserved_target());
    }

    let Some(provider) = ctx.service_provider(service) else {
        tracing::debug!(context = ctx.name(), service, method, "call to unknown service");
        return Err(Fault::unknown_service(service));
    };

    provider.invoke(service, method, args).await
}

/// Like [`call`], for a call that arrived on `origin`.
///
/// A call is never routed back to the link it came from: the sender already
/// asked because it does not host the service, so bouncing it would loop.
async fn call_from<C: Context + ?Sized>(
    ctx: &C,
    origin: &Link,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<Value, Fault> {
    match ctx.service_provider(service) {
        Some(Provider::Remote(link)) if link.same_as(origin) => {
            tracing::debug!(
                context = ctx.name(),
                link = origin.label(),
                service,
                "refusing to route a call back to its sender"
            );
            Err(Fault::unknown_service(service))
        }
        _ => call(ctx, service, method, args).await,
    }
}

/// Starts the pump for `link`, routing its inbound frames to `ctx`.
///
/// The pump holds the context weakly; dropping the context stops routing.
pub(crate) fn attach<C: Context>(ctx: &Arc<C>, link: &Link) {
    let (queue, calls) = mpsc::unbounded_channel();
    tokio::spawn(run_calls(calls));

    let weak = Arc::downgrade(ctx);
    let pump_link = link.clone();
    let handle = tokio::spawn(async move { pump(weak, pump_link, queue).await });
    link.set_pump(handle);
}

async fn pump<C: Context>(ctx: Weak<C>, link: Link, queue: mpsc::UnboundedSender<BoxFuture<()>>) {
    let reason = loop {
        match link.recv().await {
            Ok(Some(bytes)) => {
                if let Some(call) = on_message(&ctx, &link, &bytes) {
                    // the runner only stops once this sender is gone
                    let _ = queue.send(call);
                }
            }
            Ok(None) => break "stream closed".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    tracing::debug!(link = link.label(), %reason, "pump stopped");
    link.fail(&format!("Connection lost: {}", reason));
}

/// Drives the inbound calls of one link.
///
/// Calls are started strictly in arrival order: each one is polled for the
/// first time before the next is taken off the queue. After that they run
/// concurrently, so a provider that calls back across the same link cannot
/// stall the calls behind it.
async fn run_calls(mut calls: mpsc::UnboundedReceiver<BoxFuture<()>>) {
    let mut running: FuturesUnordered<BoxFuture<()>> = FuturesUnordered::new();
    loop {
        tokio::select! {
            biased;
            Some(()) = running.next(), if !running.is_empty() => {}
            queued = calls.recv() => match queued {
                Some(call) => running.push(call),
                None => break,
            },
        }
    }
    // the pump is gone; let the calls already started finish
    while running.next().await.is_some() {}
}

/// Handles one inbound payload received on `link`.
///
/// Responses settle their pending call in place. A call is returned unstarted,
/// for the link's runner to drive.
pub(crate) fn on_message<C: Context>(
    ctx: &Weak<C>,
    link: &Link,
    bytes: &[u8],
) -> Option<BoxFuture<()>> {
    let frame = match dispatch_wire::decode(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(link = link.label(), error = %e, "dropping undecodable frame");
            return None;
        }
    };
    tracing::trace!(link = link.label(), correlation_id = frame.correlation_id(), "frame received");

    match frame {
        Frame::Response { correlation_id, outcome } => {
            link.settle(correlation_id, outcome.into());
            None
        }
        call @ Frame::Call { .. } => {
            let Some(ctx) = ctx.upgrade() else {
                tracing::debug!(link = link.label(), "context gone; ignoring call");
                return None;
            };
            Some(Box::pin(handle_call(ctx, link.clone(), call)))
        }
    }
}

/// Executes an inbound call and sends its response on `origin`.
async fn handle_call<C: Context>(ctx: Arc<C>, origin: Link, call: Frame) {
    let correlation_id = call.correlation_id();
    let to_broker = call.is_dispatch();
    let Frame::Call { target, method, args, .. } = call else {
        return;
    };

    let result = if to_broker {
        ctx.on_dispatch_message(&origin, &method, args).await
    } else {
        call_from(&*ctx, &origin, &target, &method, args).await
    };

    if let Err(fault) = &result {
        tracing::debug!(
            context = ctx.name(),
            link = origin.label(),
            correlation_id,
            service = %target,
            method = %method,
            %fault,
            "inbound call failed"
        );
    }

    origin.reply(correlation_id, result).await;
}

fn reserved_target() -> Fault {
    Fault::protocol(format!("'{}' is reserved for the broker", DISPATCH_TARGET))
}

/// Rejects service names that collide with the broker's own target.
pub(crate) fn check_service_name(name: &str) -> Result<(), Fault> {
    if name == DISPATCH_TARGET {
        return Err(reserved_target());
    }
    if name.is_empty() {
        return Err(Fault::protocol("Service name must not be empty"));
    }
    Ok(())
}
