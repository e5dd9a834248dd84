//! Incremental codec for the Redis-serialization-compatible wire framing.
//!
//! The decoder is a tagged-variant parser driven by [`tokio_util::codec::Decoder`]:
//! it is fed whatever bytes have arrived on the socket so far and either
//! returns a completed [`Frame`] or reports that more bytes are needed. It
//! never blocks and never panics on truncated input — a short read simply
//! means "come back with more bytes."
//!
//! Frame shapes:
//! - `+<text>\r\n` — simple string
//! - `:<int>\r\n` — integer
//! - `$<n>\r\n<n bytes>\r\n` — bulk string; `n = -1` is the null bulk
//! - `*<n>\r\n<n frames>` — array

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// A decoded or to-be-encoded wire value.
///
/// Inbound requests are always [`Frame::Array`] of [`Frame::Bulk`]; the other
/// variants are used for encoding replies. Code that needs a specific shape
/// (e.g. the dispatcher reading a command name) pattern-matches and rejects
/// mismatches as protocol errors rather than assuming the shape holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn bulk(data: impl Into<Vec<u8>>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// Borrow this frame as a bulk-string payload, if it is one.
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("header line is not valid UTF-8")]
    InvalidHeaderEncoding,
    #[error("expected a '{expected}' prefixed header, found {found:?}")]
    WrongPrefix { expected: char, found: String },
    #[error("header integer is malformed: {0:?}")]
    InvalidInteger(String),
    #[error("array length {0} is negative")]
    NegativeArrayLength(i64),
    #[error("bulk string length {0} is negative or unsupported for an inbound frame")]
    NegativeBulkLength(i64),
    #[error("bulk payload is missing its trailing CRLF")]
    MissingBulkTerminator,
    #[error("header line exceeds the maximum allowed size")]
    HeaderTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-connection decode state. A command is decoded across possibly many
/// `decode` calls as bytes trickle in; `Phase` remembers where we left off.
#[derive(Debug)]
enum Phase {
    /// Waiting for the `*<n>\r\n` array header that starts a new request.
    AwaitArrayHeader,
    /// Collecting the `n` bulk-string arguments of the current request.
    CollectingArgs {
        expected: usize,
        args: Vec<Vec<u8>>,
        sub: ArgPhase,
    },
}

#[derive(Debug)]
enum ArgPhase {
    AwaitBulkHeader,
    AwaitBulkPayload { len: usize },
}

/// Maximum size of a single header line (array/bulk count), guarding against
/// a misbehaving client filling memory with a line that never terminates.
const MAX_HEADER_LINE: usize = 512;

pub struct RespCodec {
    phase: Phase,
}

impl Default for RespCodec {
    fn default() -> Self {
        RespCodec {
            phase: Phase::AwaitArrayHeader,
        }
    }
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scans for a CRLF-terminated line at the front of `src`, returning the
/// line's bytes (without the CRLF) without consuming anything if the
/// terminator hasn't arrived yet.
fn peek_line(src: &BytesMut) -> Result<Option<usize>, DecodeError> {
    if let Some(pos) = src.windows(2).position(|w| w == b"\r\n") {
        Ok(Some(pos))
    } else if src.len() > MAX_HEADER_LINE {
        Err(DecodeError::HeaderTooLong)
    } else {
        Ok(None)
    }
}

fn parse_prefixed_int(line: &[u8], expected: char) -> Result<i64, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidHeaderEncoding)?;
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c == expected => {}
        _ => {
            return Err(DecodeError::WrongPrefix {
                expected,
                found: text.to_owned(),
            })
        }
    }
    chars
        .as_str()
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidInteger(text.to_owned()))
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        loop {
            match &mut self.phase {
                Phase::AwaitArrayHeader => {
                    let Some(line_len) = peek_line(src)? else {
                        return Ok(None);
                    };
                    let line = src.split_to(line_len);
                    src.advance(2); // consume the CRLF
                    let count = parse_prefixed_int(&line, '*')?;
                    if count < 0 {
                        return Err(DecodeError::NegativeArrayLength(count));
                    }
                    if count == 0 {
                        return Ok(Some(Frame::Array(Vec::new())));
                    }
                    self.phase = Phase::CollectingArgs {
                        expected: count as usize,
                        args: Vec::with_capacity(count as usize),
                        sub: ArgPhase::AwaitBulkHeader,
                    };
                }
                Phase::CollectingArgs {
                    expected,
                    args,
                    sub,
                } => match sub {
                    ArgPhase::AwaitBulkHeader => {
                        let Some(line_len) = peek_line(src)? else {
                            return Ok(None);
                        };
                        let line = src.split_to(line_len);
                        src.advance(2);
                        let len = parse_prefixed_int(&line, '$')?;
                        if len < 0 {
                            return Err(DecodeError::NegativeBulkLength(len));
                        }
                        *sub = ArgPhase::AwaitBulkPayload { len: len as usize };
                    }
                    ArgPhase::AwaitBulkPayload { len } => {
                        let need = *len + 2;
                        if src.len() < need {
                            return Ok(None);
                        }
                        if &src[*len..*len + 2] != b"\r\n" {
                            return Err(DecodeError::MissingBulkTerminator);
                        }
                        let payload = src.split_to(*len).to_vec();
                        src.advance(2);
                        args.push(payload);
                        if args.len() == *expected {
                            let Phase::CollectingArgs { args, .. } =
                                std::mem::replace(&mut self.phase, Phase::AwaitArrayHeader)
                            else {
                                unreachable!()
                            };
                            return Ok(Some(Frame::Array(
                                args.into_iter().map(Frame::Bulk).collect(),
                            )));
                        }
                        *sub = ArgPhase::AwaitBulkHeader;
                    }
                },
            }
        }
    }
}

impl Encoder<Frame> for RespCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> std::io::Result<()> {
        encode_frame(&item, dst);
        Ok(())
    }
}

fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => {
            dst.put_u8(b'+');
            dst.put_slice(s.as_bytes());
            dst.put_slice(b"\r\n");
        }
        Frame::Integer(n) => {
            dst.put_u8(b':');
            dst.put_slice(n.to_string().as_bytes());
            dst.put_slice(b"\r\n");
        }
        Frame::Bulk(b) => {
            dst.put_u8(b'$');
            dst.put_slice(b.len().to_string().as_bytes());
            dst.put_slice(b"\r\n");
            dst.put_slice(b);
            dst.put_slice(b"\r\n");
        }
        Frame::Null => {
            dst.put_slice(b"$-1\r\n");
        }
        Frame::Array(items) => {
            dst.put_u8(b'*');
            dst.put_slice(items.len().to_string().as_bytes());
            dst.put_slice(b"\r\n");
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}
