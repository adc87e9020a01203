//! Dispatch demo: one hub and two workers in a single process.
//!
//! The hub hosts a logger, one worker hosts a key-value store, and the other
//! worker uses both without knowing where they live.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use anyhow::Result;
use dispatch::Config;
use dispatch::DuplexTransport;
use dispatch::Hub;
use dispatch::Methods;
use dispatch::Value;
use dispatch::Worker;
use dispatch::decode_args;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn logger() -> Methods {
    Methods::new().method("log", |args| async move {
        let (level, msg): (String, String) = decode_args(args)?;
        info!(%level, "{}", msg);
        Ok(Value::Null)
    })
}

fn kv_store() -> Methods {
    let entries: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
    let reader = entries.clone();
    Methods::new()
        .method("set", move |args| {
            let entries = entries.clone();
            async move {
                let (key, value): (String, Value) = decode_args(args)?;
                let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(entries.insert(key, value).unwrap_or(Value::Null))
            }
        })
        .method("get", move |args| {
            let entries = reader.clone();
            async move {
                let (key,): (String,) = decode_args(args)?;
                let entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(entries.get(&key).cloned().unwrap_or(Value::Null))
            }
        })
}

async fn spawn_worker(hub: &Hub, name: &str) -> Result<Worker> {
    let (hub_end, worker_end) = DuplexTransport::pair();
    let worker = Worker::new(Config::named(name).from_env()?, Arc::new(worker_end));
    let id = hub
        .add_peer(Arc::new(hub_end))
        .ok_or_else(|| anyhow::anyhow!("{} was already attached", name))?;
    worker.wait_for_connection().await;
    info!(worker = name, peer = %id, "worker connected");
    Ok(worker)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let hub = Hub::new(Config::named("hub").from_env()?);
    hub.set_service("logger", Arc::new(logger())).await?;

    let storage = spawn_worker(&hub, "storage").await?;
    storage.set_service("kv", Arc::new(kv_store())).await?;

    let client = spawn_worker(&hub, "client").await?;
    client.call("kv", "set", vec![json!("answer"), json!(42)]).await?;
    let answer = client.call("kv", "get", vec![json!("answer")]).await?;
    client
        .call("logger", "log", vec![json!("info"), json!(format!("answer is {}", answer))])
        .await?;

    match client.call("audio", "play", vec![]).await {
        Ok(_) => anyhow::bail!("audio should not be registered"),
        Err(fault) => info!(%fault, "expected failure"),
    }

    info!(services = ?hub.services(), peers = hub.peer_count(), "shutting down");
    client.shutdown();
    storage.shutdown();
    hub.shutdown();
    Ok(())
}
