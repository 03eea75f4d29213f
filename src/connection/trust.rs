//! TLS trust evaluation.
//!
//! The handshake itself accepts any certificate; trust is decided afterwards
//! from two independent checks (CA chain + host name, and a pinned
//! fingerprint). Keeping the decision a pure function makes every branch
//! testable without a TLS peer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use std::fmt;

/// How far the device certificate is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// No TLS on this link.
    #[default]
    None,
    /// Chain and host name verified against a configured CA.
    CaVerified,
    /// Certificate matches the pinned fingerprint.
    Pinned,
    /// Nothing configured to check against; accepted as-is.
    UntrustedAccepted,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrustLevel::None => "none",
            TrustLevel::CaVerified => "ca-verified",
            TrustLevel::Pinned => "pinned",
            TrustLevel::UntrustedAccepted => "untrusted-accepted",
        };
        f.write_str(s)
    }
}

/// Result of CA chain and host name verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaOutcome {
    NotConfigured,
    Verified,
    Failed(String),
}

/// Result of the fingerprint comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    NotConfigured,
    Match,
    Mismatch { expected: String, actual: String },
}

/// Combine both checks.
///
/// A pin mismatch is always fatal. A failed CA check is fatal unless the pin
/// matches. Only when nothing is configured is the certificate accepted
/// untrusted.
pub fn decide_trust(ca: &CaOutcome, pin: &PinOutcome) -> Result<TrustLevel, String> {
    if let PinOutcome::Mismatch { expected, actual } = pin {
        return Err(format!(
            "certificate fingerprint {} does not match pinned {}",
            actual, expected
        ));
    }
    match (ca, pin) {
        (CaOutcome::Verified, _) => Ok(TrustLevel::CaVerified),
        (_, PinOutcome::Match) => Ok(TrustLevel::Pinned),
        (CaOutcome::Failed(reason), _) => Err(format!("certificate verification failed: {}", reason)),
        (CaOutcome::NotConfigured, _) => Ok(TrustLevel::UntrustedAccepted),
    }
}

/// Normalize a fingerprint for comparison
pub fn normalize_fingerprint(fp: &str) -> String {
    let fp = fp.trim();
    let fp = fp
        .strip_prefix("SHA384:")
        .or_else(|| fp.strip_prefix("sha384:"))
        .unwrap_or(fp);
    fp.replace([':', ' '], "").to_lowercase()
}

/// SHA-384 fingerprint of a DER certificate, lowercase hex.
pub fn cert_fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha384::new();
    hasher.update(der);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Compare a certificate against an optional pin.
pub fn check_pin(pinned: Option<&str>, der: &[u8]) -> PinOutcome {
    match pinned.map(normalize_fingerprint).filter(|p| !p.is_empty()) {
        None => PinOutcome::NotConfigured,
        Some(expected) => {
            let actual = cert_fingerprint(der);
            if actual == expected {
                PinOutcome::Match
            } else {
                PinOutcome::Mismatch { expected, actual }
            }
        }
    }
}
