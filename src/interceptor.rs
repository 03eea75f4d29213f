//! Credential-rewriting HTTP interceptor.
//!
//! Sits between a client (typically a browser talking to the AMT web UI)
//! and the device. Device responses are watched for Digest challenges;
//! client requests carrying a Digest `Authorization` get it recomputed with
//! the real device credentials, so the client never needs them.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::auth::digest::{generate_cnonce, parse_auth_params, render_authorization};
use crate::auth::{DigestChallenge, DigestInput};
use crate::http::{write_message, Direction, FramingError, HttpMessage, MessageParser};

/// Rewrites Digest credentials on a client/device byte stream pair.
#[derive(Debug)]
pub struct HttpInterceptor {
    username: String,
    password: String,
    client: MessageParser,
    device: MessageParser,
    challenge: Option<DigestChallenge>,
    cnonce: String,
    nonce_count: u32,
}

impl HttpInterceptor {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client: MessageParser::new(Direction::Request),
            device: MessageParser::new(Direction::Response),
            challenge: None,
            cnonce: generate_cnonce(),
            nonce_count: 1,
        }
    }

    /// Last challenge seen from the device.
    pub fn challenge(&self) -> Option<&DigestChallenge> {
        self.challenge.as_ref()
    }

    /// Bytes from the client; returns what to forward to the device.
    pub fn process_client_data(&mut self, data: &[u8]) -> Result<Bytes, FramingError> {
        let messages = self.client.push(data)?;
        let mut out = BytesMut::new();
        for mut message in messages {
            self.rewrite_authorization(&mut message);
            out.extend_from_slice(&write_message(&message));
        }
        Ok(out.freeze())
    }

    /// Bytes from the device; returns what to forward to the client.
    pub fn process_device_data(&mut self, data: &[u8]) -> Result<Bytes, FramingError> {
        let messages = self.device.push(data)?;
        let mut out = BytesMut::new();
        for message in messages {
            self.observe_response(&message);
            out.extend_from_slice(&write_message(&message));
        }
        Ok(out.freeze())
    }

    /// The device closed its side; flush a close-delimited response.
    pub fn device_closed(&mut self) -> Option<Bytes> {
        let message = self.device.finish()?;
        self.observe_response(&message);
        Some(Bytes::from(write_message(&message)))
    }

    fn observe_response(&mut self, message: &HttpMessage) {
        if message.status() != Some(401) {
            return;
        }
        if let Some(challenge) = message
            .headers
            .get_all("www-authenticate")
            .find_map(DigestChallenge::parse)
        {
            debug!(realm = %challenge.realm, "captured device challenge");
            self.challenge = Some(challenge);
        }
    }

    fn rewrite_authorization(&mut self, message: &mut HttpMessage) {
        let Some(challenge) = &self.challenge else {
            return;
        };
        let Some(existing) = message.headers.get("authorization") else {
            return;
        };
        let Some(params) = existing
            .split_once(char::is_whitespace)
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("digest"))
            .map(|(_, params)| parse_auth_params(params))
        else {
            return;
        };

        let target = message.target().unwrap_or("/");
        let uri = params
            .iter()
            .find(|(k, _)| k == "uri")
            .map(|(_, v)| v.as_str())
            .unwrap_or(target)
            .to_string();
        let method = message.method().unwrap_or("GET").to_string();

        let input = DigestInput {
            username: &self.username,
            realm: &challenge.realm,
            password: &self.password,
            nonce: &challenge.nonce,
            nonce_count: self.nonce_count,
            cnonce: &self.cnonce,
            qop: challenge.qop.as_deref(),
            method: &method,
            uri: &uri,
        };
        let header = render_authorization(&input, challenge.opaque.as_deref());
        trace!(uri = %uri, nc = self.nonce_count, "rewrote Authorization");
        self.nonce_count = self.nonce_count.wrapping_add(1);
        message.headers.set("Authorization", header);
    }
}
