//! Per-connection handling: decode, dispatch, and a dedicated writer task
//! draining the connection's single outbound queue.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use kvstore_core::{next_sink_id, Dispatcher, Sink};
use resp_protocol::{Frame, RespCodec};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE_CAPACITY: usize = 64;

pub async fn handle_connection(stream: TcpStream, peer: std::net::SocketAddr, dispatcher: Arc<Dispatcher>) {
    let sink_id = next_sink_id();
    let framed = Framed::new(stream, RespCodec::new());
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = writer.send(frame).await {
                warn!(%peer, sink = sink_id, error = %err, "write failed, closing connection");
                break;
            }
        }
    });

    let sink = Sink::new(sink_id, tx);
    info!(%peer, sink = sink_id, "connection accepted");

    loop {
        match reader.next().await {
            Some(Ok(frame)) => match dispatcher.dispatch(frame, &sink).await {
                Ok(Some(reply)) => {
                    if sink.tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%peer, sink = sink_id, error = %err, "command dispatch error, continuing");
                }
            },
            Some(Err(err)) => {
                warn!(%peer, sink = sink_id, error = %err, "decode error, closing connection");
                break;
            }
            None => {
                debug!(%peer, sink = sink_id, "connection closed by peer");
                break;
            }
        }
    }

    drop(sink);
    let _ = writer_task.await;
}
