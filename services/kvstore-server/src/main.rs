mod config;
mod connection;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use kvstore_core::{spawn_purge_scheduler, Dispatcher, ExpiryIndex, KeyspaceStore, PubSubRegistry};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::parse_args();

    let keyspace = Arc::new(KeyspaceStore::new());
    let expiry = Arc::new(ExpiryIndex::new());
    let pubsub = Arc::new(PubSubRegistry::with_queue_capacity(config.topic_queue_capacity));
    let dispatcher = Arc::new(Dispatcher::new(keyspace.clone(), expiry.clone(), pubsub));

    spawn_purge_scheduler(
        keyspace,
        expiry,
        Duration::from_secs(config.purge_interval_secs),
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let tcp_listener = TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {addr}: {err}"));
    info!(%addr, "kvstore-server listening");

    listener::serve(tcp_listener, dispatcher).await;
    info!("kvstore-server shut down");
}
