//! HTTP Digest authentication (RFC 2617) and the MD5 primitives behind it.
//!
//! Everything except [`DigestState`] is a pure function. The state type holds
//! the challenge captured from the last 401, the client nonce and the
//! nonce-count; it is owned by whoever drives the connection (the session
//! core or the interceptor) and is never shared.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use rand::Rng;
use thiserror::Error;

// ============================================================================
// MD5 / HMAC-MD5
// ============================================================================

/// MD5 digest as 16 raw bytes.
pub fn raw_md5(data: impl AsRef<[u8]>) -> [u8; 16] {
    md5::compute(data).0
}

/// MD5 digest as lowercase hex.
pub fn hex_md5(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(data))
}

/// MD5 digest as uppercase hex.
pub fn hex_md5_upper(data: impl AsRef<[u8]>) -> String {
    format!("{:X}", md5::compute(data))
}

/// MD5 digest as standard base64.
pub fn b64_md5(data: impl AsRef<[u8]>) -> String {
    BASE64_STANDARD.encode(raw_md5(data))
}

/// HMAC-MD5 computation (RFC 2104).
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    const BLOCK: usize = 64;

    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..16].copy_from_slice(&raw_md5(key));
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Vec::with_capacity(BLOCK + data.len());
    inner.extend(key_block.iter().map(|b| b ^ 0x36));
    inner.extend_from_slice(data);
    let inner_hash = raw_md5(&inner);

    let mut outer = Vec::with_capacity(BLOCK + 16);
    outer.extend(key_block.iter().map(|b| b ^ 0x5c));
    outer.extend_from_slice(&inner_hash);
    raw_md5(&outer)
}

/// HMAC-MD5 as lowercase hex.
pub fn hex_hmac_md5(key: &[u8], data: &[u8]) -> String {
    hmac_md5(key, data).iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Challenge
// ============================================================================

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Selected quality of protection. `auth` is chosen whenever offered.
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value. Returns `None` when the
    /// scheme is not Digest or the realm/nonce are missing.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut stale = false;

        for (key, value) in parse_auth_params(rest) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(select_qop(&value)),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "stale" => stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            qop,
            opaque,
            algorithm,
            stale,
        })
    }
}

fn select_qop(offered: &str) -> String {
    let mut options = offered.split(',').map(str::trim).filter(|s| !s.is_empty());
    let first = options.clone().next().unwrap_or("auth").to_string();
    if options.any(|q| q.eq_ignore_ascii_case("auth")) {
        "auth".to_string()
    } else {
        first
    }
}

/// Split `k=v, k="quoted, value"` auth-params. Keys are lower-cased.
pub fn parse_auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        let key = key.trim().to_ascii_lowercase();

        if chars.peek() != Some(&'=') {
            // token without a value
            if !key.is_empty() {
                params.push((key, String::new()));
            }
            continue;
        }
        chars.next();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        if !key.is_empty() {
            params.push((key, value));
        }
    }

    params
}

// ============================================================================
// Response computation
// ============================================================================

/// Inputs to a single Digest response.
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    pub username: &'a str,
    pub realm: &'a str,
    pub password: &'a str,
    pub nonce: &'a str,
    pub nonce_count: u32,
    pub cnonce: &'a str,
    pub qop: Option<&'a str>,
    pub method: &'a str,
    pub uri: &'a str,
}

/// Compute the Digest `response` value.
///
/// With a qop: `MD5(MD5(user:realm:pass):nonce:nc:cnonce:qop:MD5(method:uri))`.
/// Without one (RFC 2069): `MD5(MD5(user:realm:pass):nonce:MD5(method:uri))`.
/// The nonce-count is rendered as a plain decimal integer.
pub fn digest_response(input: &DigestInput<'_>) -> String {
    let ha1 = hex_md5(format!(
        "{}:{}:{}",
        input.username, input.realm, input.password
    ));
    let ha2 = hex_md5(format!("{}:{}", input.method, input.uri));

    match input.qop {
        Some(qop) => hex_md5(format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, input.nonce, input.nonce_count, input.cnonce, qop, ha2
        )),
        None => hex_md5(format!("{}:{}:{}", ha1, input.nonce, ha2)),
    }
}

/// Render a complete `Authorization` header value for `input`.
pub fn render_authorization(input: &DigestInput<'_>, opaque: Option<&str>) -> String {
    let response = digest_response(input);
    let mut header = format!(
        "Digest username=\"{}\",realm=\"{}\",nonce=\"{}\",uri=\"{}\"",
        quote_escape(input.username),
        quote_escape(input.realm),
        quote_escape(input.nonce),
        quote_escape(input.uri)
    );
    if let Some(qop) = input.qop {
        header.push_str(&format!(
            ",qop={},nc={},cnonce=\"{}\"",
            qop, input.nonce_count, input.cnonce
        ));
    }
    header.push_str(&format!(",response=\"{}\"", response));
    if let Some(opaque) = opaque {
        header.push_str(&format!(",opaque=\"{}\"", quote_escape(opaque)));
    }
    header
}

fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Generate a random 32-character hex client nonce.
pub fn generate_cnonce() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Per-connection state
// ============================================================================

/// The device presented a realm different from the one first observed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Digest realm changed from '{expected}' to '{actual}'")]
pub struct RealmMismatch {
    pub expected: String,
    pub actual: String,
}

/// Authentication challenge state for one connection.
#[derive(Debug, Clone)]
pub struct DigestState {
    challenge: Option<DigestChallenge>,
    realm_lock: Option<String>,
    cnonce: String,
    nonce_count: u32,
}

impl Default for DigestState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DigestState {
    /// Create an empty state. `expected_realm` pins the realm before any
    /// challenge is seen.
    pub fn new(expected_realm: Option<String>) -> Self {
        Self {
            challenge: None,
            realm_lock: expected_realm,
            cnonce: generate_cnonce(),
            nonce_count: 1,
        }
    }

    /// Use a fixed client nonce instead of a random one.
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce = cnonce.into();
        self
    }

    /// Record a new challenge. The first realm seen is locked for the
    /// lifetime of the state; a different realm afterwards is rejected and
    /// the previous challenge is kept.
    pub fn accept(&mut self, challenge: DigestChallenge) -> Result<(), RealmMismatch> {
        match &self.realm_lock {
            Some(expected) if *expected != challenge.realm => {
                return Err(RealmMismatch {
                    expected: expected.clone(),
                    actual: challenge.realm,
                });
            }
            Some(_) => {}
            None => self.realm_lock = Some(challenge.realm.clone()),
        }
        self.challenge = Some(challenge);
        Ok(())
    }

    /// Current challenge, if any.
    pub fn challenge(&self) -> Option<&DigestChallenge> {
        self.challenge.as_ref()
    }

    /// Realm locked for this connection.
    pub fn realm(&self) -> Option<&str> {
        self.realm_lock.as_deref()
    }

    /// Nonce-count the next authorization will carry.
    pub fn next_nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Build the `Authorization` header for one request and advance the
    /// nonce-count. Returns `None` until a challenge has been accepted.
    pub fn authorize(
        &mut self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
    ) -> Option<String> {
        let challenge = self.challenge.as_ref()?;
        let input = DigestInput {
            username,
            realm: &challenge.realm,
            password,
            nonce: &challenge.nonce,
            nonce_count: self.nonce_count,
            cnonce: &self.cnonce,
            qop: challenge.qop.as_deref(),
            method,
            uri,
        };
        let header = render_authorization(&input, challenge.opaque.as_deref());
        self.nonce_count = self.nonce_count.wrapping_add(1);
        Some(header)
    }
}
