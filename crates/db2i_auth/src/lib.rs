//! Authentication for the HTTP transport: encrypted credential
//! envelopes in, opaque bearer tokens out, with a background reaper
//! that cascades session expiry into pool teardown.

pub mod envelope;
pub mod token;

pub use envelope::{AuthPayload, EncryptedEnvelope, KeyRing};
pub use token::{spawn_reaper, AuthSession, TokenManager};
