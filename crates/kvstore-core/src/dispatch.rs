//! The command dispatcher: interprets a decoded request array as a command,
//! validates arity and option tokens, and routes to the keyspace or pub/sub
//! subsystems.

use std::sync::Arc;

use resp_protocol::Frame;
use tracing::warn;

use crate::expiry::ExpiryIndex;
use crate::keyspace::KeyspaceStore;
use crate::pubsub::{PubSubRegistry, Sink};
use crate::time::{now_millis, NEVER};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request frame is not an array of bulk strings")]
    NotACommandArray,
    #[error("empty command array")]
    EmptyCommand,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("wrong number of arguments for {0:?}")]
    WrongArity(String),
    #[error("unsupported SET option {0:?}")]
    InvalidOption(String),
    #[error("expected an integer argument, got {0:?}")]
    NotAnInteger(String),
}

/// The set options accepted by SET, applied in order — later wins on
/// conflict — per spec.md §4.6.
#[derive(Debug, Default, Clone, Copy)]
struct ExpiryOpt(Option<i64>);

fn parse_expiry_opts(now: i64, opts: &[Vec<u8>]) -> Result<i64, DispatchError> {
    let mut expiry = ExpiryOpt::default();
    let mut idx = 0;
    while idx < opts.len() {
        let token = String::from_utf8_lossy(&opts[idx]).to_uppercase();
        let value_bytes = opts.get(idx + 1).ok_or_else(|| DispatchError::InvalidOption(token.clone()))?;
        let value = parse_i64(value_bytes)?;
        match token.as_str() {
            "EX" => expiry.0 = Some(now + value * 1000),
            "PX" => expiry.0 = Some(now + value),
            "EXAT" => expiry.0 = Some(value * 1000),
            "PXAT" => expiry.0 = Some(value),
            other => return Err(DispatchError::InvalidOption(other.to_owned())),
        }
        idx += 2;
    }
    Ok(expiry.0.unwrap_or(NEVER))
}

fn parse_i64(bytes: &[u8]) -> Result<i64, DispatchError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DispatchError::NotAnInteger(String::from_utf8_lossy(bytes).into_owned()))
}

/// Pulls the bulk-string arguments out of an inbound request frame,
/// rejecting anything that isn't the array-of-bulk-strings shape inbound
/// commands are always expected to have.
fn command_args(frame: &Frame) -> Result<Vec<Vec<u8>>, DispatchError> {
    let Frame::Array(items) = frame else {
        return Err(DispatchError::NotACommandArray);
    };
    items
        .iter()
        .map(|item| {
            item.as_bulk()
                .map(|b| b.to_vec())
                .ok_or(DispatchError::NotACommandArray)
        })
        .collect()
}

pub struct Dispatcher {
    pub keyspace: Arc<KeyspaceStore>,
    pub expiry: Arc<ExpiryIndex>,
    pub pubsub: Arc<PubSubRegistry>,
}

impl Dispatcher {
    pub fn new(keyspace: Arc<KeyspaceStore>, expiry: Arc<ExpiryIndex>, pubsub: Arc<PubSubRegistry>) -> Self {
        Dispatcher {
            keyspace,
            expiry,
            pubsub,
        }
    }

    /// Dispatches one decoded request. Returns `Ok(Some(frame))` for
    /// commands with a synchronous reply, `Ok(None)` for SUBSCRIBE/
    /// UNSUBSCRIBE (whose replies are asynchronous control messages sent
    /// directly to `sink`), and `Err` for arity/option errors — which the
    /// caller logs and otherwise ignores, continuing the connection, per
    /// spec.md §4.6's "at the implementer's discretion" resolution in
    /// SPEC_FULL.md §7.
    pub async fn dispatch(&self, frame: Frame, sink: &Sink) -> Result<Option<Frame>, DispatchError> {
        let args = command_args(&frame)?;
        let mut args = args.into_iter();
        let name = args.next().ok_or(DispatchError::EmptyCommand)?;
        let name_upper = String::from_utf8_lossy(&name).to_uppercase();
        let rest: Vec<Vec<u8>> = args.collect();

        match name_upper.as_str() {
            "PING" => Ok(Some(Frame::Simple("PONG".to_owned()))),
            "HELLO" | "COMMAND" | "CONFIG" => Ok(Some(handshake_stub())),
            "CLIENT" => Ok(Some(Frame::Simple("OK".to_owned()))),
            "ECHO" => {
                require_arity(&rest, 1, &name_upper)?;
                Ok(Some(Frame::Bulk(rest[0].clone())))
            }
            "WAIT" => Ok(Some(Frame::Integer(0))),
            "SET" => self.dispatch_set(&rest, &name_upper).await,
            "SETEX" => self.dispatch_setex(&rest, &name_upper).await,
            "GET" => {
                require_arity(&rest, 1, &name_upper)?;
                let now = now_millis();
                match self.keyspace.get(&rest[0], now).await {
                    Some(value) => Ok(Some(Frame::Bulk(value))),
                    None => Ok(Some(Frame::Null)),
                }
            }
            "EXISTS" => {
                require_min_arity(&rest, 1, &name_upper)?;
                let now = now_millis();
                let mut count = 0i64;
                for key in &rest {
                    if self.keyspace.exists(key, now).await {
                        count += 1;
                    }
                }
                Ok(Some(Frame::Integer(count)))
            }
            "DEL" => {
                require_min_arity(&rest, 1, &name_upper)?;
                let mut count = 0i64;
                for key in &rest {
                    if self.keyspace.delete(key).await {
                        count += 1;
                    }
                }
                Ok(Some(Frame::Integer(count)))
            }
            "SUBSCRIBE" => {
                require_min_arity(&rest, 1, &name_upper)?;
                for channel in &rest {
                    self.pubsub.subscribe(channel, sink.clone()).await;
                }
                Ok(None)
            }
            "UNSUBSCRIBE" => {
                require_min_arity(&rest, 1, &name_upper)?;
                for channel in &rest {
                    self.pubsub.unsubscribe(channel, sink.clone()).await;
                }
                Ok(None)
            }
            "PUBLISH" => {
                require_arity(&rest, 2, &name_upper)?;
                let count = self.pubsub.publish(&rest[0], rest[1].clone()).await;
                Ok(Some(Frame::Integer(count as i64)))
            }
            other => {
                warn!(command = other, "unknown command");
                Err(DispatchError::UnknownCommand(other.to_owned()))
            }
        }
    }

    async fn dispatch_set(&self, rest: &[Vec<u8>], name: &str) -> Result<Option<Frame>, DispatchError> {
        require_min_arity(rest, 2, name)?;
        let now = now_millis();
        let expiry = parse_expiry_opts(now, &rest[2..])?;
        self.keyspace.set(rest[0].clone(), rest[1].clone(), expiry).await;
        if expiry != NEVER {
            self.expiry.push(expiry, rest[0].clone()).await;
        }
        Ok(Some(Frame::Simple("OK".to_owned())))
    }

    async fn dispatch_setex(&self, rest: &[Vec<u8>], name: &str) -> Result<Option<Frame>, DispatchError> {
        require_arity(rest, 3, name)?;
        let seconds = parse_i64(&rest[1])?;
        let now = now_millis();
        let expiry = now + seconds * 1000;
        self.keyspace.set(rest[0].clone(), rest[2].clone(), expiry).await;
        self.expiry.push(expiry, rest[0].clone()).await;
        Ok(Some(Frame::Simple("OK".to_owned())))
    }
}

fn require_arity(rest: &[Vec<u8>], expected: usize, name: &str) -> Result<(), DispatchError> {
    if rest.len() != expected {
        return Err(DispatchError::WrongArity(name.to_owned()));
    }
    Ok(())
}

fn require_min_arity(rest: &[Vec<u8>], min: usize, name: &str) -> Result<(), DispatchError> {
    if rest.len() < min {
        return Err(DispatchError::WrongArity(name.to_owned()));
    }
    Ok(())
}

/// The fixed handshake reply for HELLO/COMMAND/CONFIG, preserved verbatim
/// per spec.md §9's explicit Open Question resolution.
fn handshake_stub() -> Frame {
    Frame::Array(vec![
        Frame::Bulk(b"hello".to_vec()),
        Frame::Array(vec![Frame::Bulk(b"world".to_vec())]),
    ])
}
