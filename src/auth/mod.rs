//! Credential handling for device requests.
//!
//! Two mutually exclusive paths exist:
//!
//! - **Digest** (default): [`digest::DigestState`] tracks the challenge
//!   captured from the last 401 and produces a fresh `Authorization` header
//!   for every request.
//! - **Kerberos**: selected when the username is [`kerberos::KERBEROS_USER`].
//!   Tickets come from an injected [`kerberos::TicketProvider`].

pub mod digest;
pub mod kerberos;

pub use digest::{
    b64_md5, digest_response, hex_hmac_md5, hex_md5, hex_md5_upper, hmac_md5, raw_md5,
    render_authorization, DigestChallenge, DigestInput, DigestState, RealmMismatch,
};
pub use kerberos::{
    service_principal, KerberosError, StaticTicketProvider, TicketProvider, KERBEROS_USER,
};
