//! The accept loop: binds the listening socket, spawns one task per
//! accepted connection, and stops cleanly on SIGINT/SIGTERM.

use std::sync::Arc;

use kvstore_core::Dispatcher;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::connection::handle_connection;

pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, dispatcher).await;
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, closing listener");
                break;
            }
        }
    }
}

/// Resolves on SIGINT or, on unix, SIGTERM — matching the teacher's
/// `shutdown_signal` helper.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
