//! Incremental HTTP/1.1 message parser.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::chunked::{decode_chunk, ChunkStep};
use super::{FramingError, Headers, HttpMessage, StartLine};

/// Upper bound on the header block, start line included.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Which side of the exchange the parser reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Parse requests (client to device).
    Request,
    /// Parse responses (device to client).
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    AwaitingHeaders,
    LengthBody { remaining: usize },
    ChunkedBody,
    UntilClose,
}

/// Stateful parser fed with raw link bytes.
///
/// Bytes may arrive split at any boundary; complete messages are returned
/// from [`push`](Self::push) in order. Once a [`FramingError`] is returned
/// the parser state is undefined until [`reset`](Self::reset).
#[derive(Debug)]
pub struct MessageParser {
    direction: Direction,
    buf: BytesMut,
    mode: Mode,
    head: Option<(StartLine, Headers)>,
    body: BytesMut,
}

impl MessageParser {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            buf: BytesMut::with_capacity(16 * 1024),
            mode: Mode::AwaitingHeaders,
            head: None,
            body: BytesMut::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True when no partial message is buffered.
    pub fn is_idle(&self) -> bool {
        self.mode == Mode::AwaitingHeaders && self.buf.is_empty()
    }

    /// Drop all buffered state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.body.clear();
        self.head = None;
        self.mode = Mode::AwaitingHeaders;
    }

    /// Feed bytes and collect every message they complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<HttpMessage>, FramingError> {
        self.buf.extend_from_slice(data);
        let mut messages = Vec::new();

        loop {
            match self.mode {
                Mode::AwaitingHeaders => {
                    while self.buf.starts_with(b"\r\n") {
                        self.buf.advance(2);
                    }
                    let Some(end) = find_header_end(&self.buf) else {
                        if self.buf.len() > MAX_HEADER_SIZE {
                            return Err(FramingError::HeaderTooLarge(MAX_HEADER_SIZE));
                        }
                        break;
                    };
                    if end > MAX_HEADER_SIZE {
                        return Err(FramingError::HeaderTooLarge(MAX_HEADER_SIZE));
                    }
                    let block = self.buf.split_to(end + 4);
                    let (start, headers) = parse_head(&block[..end], self.direction)?;
                    self.mode = body_mode(&start, &headers, self.direction)?;
                    trace!(mode = ?self.mode, "parsed message head");
                    self.head = Some((start, headers));
                    if self.mode == (Mode::LengthBody { remaining: 0 }) {
                        messages.extend(self.complete());
                    }
                }
                Mode::LengthBody { remaining } => {
                    if self.buf.is_empty() {
                        break;
                    }
                    let take = remaining.min(self.buf.len());
                    self.body.extend_from_slice(&self.buf.split_to(take));
                    let remaining = remaining - take;
                    if remaining == 0 {
                        messages.extend(self.complete());
                    } else {
                        self.mode = Mode::LengthBody { remaining };
                        break;
                    }
                }
                Mode::ChunkedBody => match decode_chunk(&self.buf)? {
                    ChunkStep::Data { data, consumed } => {
                        self.body.extend_from_slice(data);
                        self.buf.advance(consumed);
                    }
                    ChunkStep::Last { consumed } => {
                        self.buf.advance(consumed);
                        messages.extend(self.complete());
                    }
                    ChunkStep::NeedMore => break,
                },
                Mode::UntilClose => {
                    let rest = self.buf.split();
                    self.body.extend_from_slice(&rest);
                    break;
                }
            }
        }

        Ok(messages)
    }

    /// Signal end of stream. Returns the close-delimited message if one was
    /// being read; a truncated length or chunked body is discarded.
    pub fn finish(&mut self) -> Option<HttpMessage> {
        let message = match self.mode {
            Mode::UntilClose => self.complete(),
            _ => None,
        };
        self.reset();
        message
    }

    fn complete(&mut self) -> Option<HttpMessage> {
        self.mode = Mode::AwaitingHeaders;
        let (start, headers) = self.head.take()?;
        Some(HttpMessage {
            start,
            headers,
            body: self.body.split().freeze(),
        })
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(block: &[u8], direction: Direction) -> Result<(StartLine, Headers), FramingError> {
    let text = String::from_utf8_lossy(block);
    let mut lines = text.split("\r\n");
    let first = lines.next().unwrap_or_default();
    let start = match direction {
        Direction::Response => parse_status_line(first)?,
        Direction::Request => parse_request_line(first)?,
    };

    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedHeader(line.to_string()))?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(FramingError::MalformedHeader(line.to_string()));
        }
        headers.append(name, value.trim());
    }

    Ok((start, headers))
}

fn parse_status_line(line: &str) -> Result<StartLine, FramingError> {
    let malformed = || FramingError::MalformedStartLine(line.to_string());
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().filter(|v| v.starts_with("HTTP/")).ok_or_else(malformed)?;
    let code = parts.next().ok_or_else(malformed)?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let status: u16 = code.parse().map_err(|_| malformed())?;
    Ok(StartLine::Response {
        version: version.to_string(),
        status,
        reason: parts.next().unwrap_or("").to_string(),
    })
}

fn parse_request_line(line: &str) -> Result<StartLine, FramingError> {
    let malformed = || FramingError::MalformedStartLine(line.to_string());
    let mut parts = line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty()).ok_or_else(malformed)?;
    let target = parts.next().filter(|t| !t.is_empty()).ok_or_else(malformed)?;
    let version = parts.next().filter(|v| v.starts_with("HTTP/")).ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok(StartLine::Request {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
    })
}

fn parse_content_length(headers: &Headers) -> Result<Option<usize>, FramingError> {
    let mut length = None;
    for value in headers.get_all("content-length") {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FramingError::InvalidContentLength(value.to_string()));
        }
        let parsed: usize = value
            .parse()
            .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(FramingError::InvalidContentLength(value.to_string()));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn body_mode(start: &StartLine, headers: &Headers, direction: Direction) -> Result<Mode, FramingError> {
    if let StartLine::Response { status, .. } = start {
        if (100..200).contains(status) || *status == 204 || *status == 304 {
            return Ok(Mode::LengthBody { remaining: 0 });
        }
    }

    let chunked = headers.has_token("transfer-encoding", "chunked");
    let content_length = parse_content_length(headers)?;

    if direction == Direction::Response && !chunked && headers.has_token("connection", "close") {
        return Ok(Mode::UntilClose);
    }
    if let Some(length) = content_length {
        return Ok(Mode::LengthBody { remaining: length });
    }
    if chunked {
        return Ok(Mode::ChunkedBody);
    }
    Ok(match direction {
        Direction::Response => Mode::UntilClose,
        Direction::Request => Mode::LengthBody { remaining: 0 },
    })
}
