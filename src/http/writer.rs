//! Message serialization.

use bytes::Bytes;
use indexmap::IndexMap;

use super::chunked::encode_chunked;
use super::{HttpMessage, StartLine};

/// Chunk size used when a body is sent chunked.
const CHUNK_SIZE: usize = 8 * 1024;

/// How a request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    ContentLength,
    Chunked,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: IndexMap<String, String>,
    pub body: Bytes,
    pub encoding: BodyEncoding,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: IndexMap::new(),
            body: Bytes::new(),
            encoding: BodyEncoding::ContentLength,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn encoding(mut self, encoding: BodyEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

fn is_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding")
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn push_body(out: &mut Vec<u8>, body: &[u8], encoding: BodyEncoding) {
    match encoding {
        BodyEncoding::ContentLength => {
            push_header(out, "Content-Length", &body.len().to_string());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(body);
        }
        BodyEncoding::Chunked => {
            push_header(out, "Transfer-Encoding", "chunked");
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&encode_chunked(body, CHUNK_SIZE));
        }
    }
}

/// Serialize a request. Framing headers supplied by the caller are replaced
/// by ones matching `request.encoding`.
pub fn write_request(request: &HttpRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + request.body.len());
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in &request.headers {
        if !is_framing_header(name) {
            push_header(&mut out, name, value);
        }
    }
    push_body(&mut out, &request.body, request.encoding);
    out
}

/// Re-serialize a parsed message with a `Content-Length` body.
///
/// Responses that never carry a body (1xx, 204, 304) are written without
/// framing headers.
pub fn write_message(message: &HttpMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + message.body.len());
    let bodyless = match &message.start {
        StartLine::Request {
            method,
            target,
            version,
        } => {
            out.extend_from_slice(format!("{} {} {}\r\n", method, target, version).as_bytes());
            false
        }
        StartLine::Response {
            version,
            status,
            reason,
        } => {
            out.extend_from_slice(format!("{} {} {}\r\n", version, status, reason).as_bytes());
            (100..200).contains(status) || *status == 204 || *status == 304
        }
    };
    for (name, value) in message.headers.iter() {
        if !is_framing_header(name) {
            push_header(&mut out, name, value);
        }
    }
    if bodyless {
        out.extend_from_slice(b"\r\n");
    } else {
        push_body(&mut out, &message.body, BodyEncoding::ContentLength);
    }
    out
}
