//! Encrypted credential envelope.
//!
//! Clients RSA-OAEP-wrap a fresh AES-256 session key under a published
//! server key, then AEAD-seal the credential payload with AES-256-GCM.
//! The server unwraps with the private half of `keyId` and opens the
//! ciphertext under `iv`/`authTag`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use db2i_protocol::defaults::MAX_TOKEN_DURATION_SECS;
use db2i_protocol::{McpError, McpResult};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;

const SESSION_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const RSA_KEY_BITS: usize = 2048;

/// Wire form of the auth request body. All fields are base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub key_id: String,
    pub encrypted_session_key: String,
    pub iv: String,
    pub auth_tag: String,
    pub ciphertext: String,
}

/// Decrypted envelope contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub credentials: PayloadCredentials,
    pub request: PayloadRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadRequest {
    pub host: String,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub poolstart: Option<u32>,
    #[serde(default)]
    pub poolmax: Option<u32>,
}

impl AuthPayload {
    /// Enforce the envelope field invariants: mandatory non-empty
    /// strings and duration in (0, 86400] seconds.
    pub fn validate(&self) -> McpResult<()> {
        if self.credentials.username.trim().is_empty() {
            return Err(McpError::invalid_request("Envelope field username must be non-empty"));
        }
        if self.credentials.password.is_empty() {
            return Err(McpError::invalid_request("Envelope field password must be non-empty"));
        }
        if self.request.host.trim().is_empty() {
            return Err(McpError::invalid_request("Envelope field host must be non-empty"));
        }
        if let Some(duration) = self.request.duration {
            if duration == 0 || duration > MAX_TOKEN_DURATION_SECS {
                return Err(McpError::invalid_request(format!(
                    "Duration must be between 1 and {MAX_TOKEN_DURATION_SECS} seconds"
                )));
            }
        }
        if let (Some(start), Some(max)) = (self.request.poolstart, self.request.poolmax) {
            if start > max {
                return Err(McpError::invalid_request(format!(
                    "poolstart {start} exceeds poolmax {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Server-side key material, keyed by key id.
pub struct KeyRing {
    keys: HashMap<String, RsaPrivateKey>,
}

impl KeyRing {
    /// Generate a ring with one fresh key pair.
    pub fn generate() -> McpResult<Self> {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| McpError::internal(format!("Key generation failed: {e}")))?;
        let mut key_id_bytes = [0u8; 8];
        rng.fill_bytes(&mut key_id_bytes);
        let key_id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key_id_bytes);
        let mut keys = HashMap::new();
        keys.insert(key_id, key);
        Ok(Self { keys })
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    /// Public half for a key id, for publication to clients.
    pub fn public_key(&self, key_id: &str) -> Option<RsaPublicKey> {
        self.keys.get(key_id).map(RsaPrivateKey::to_public_key)
    }

    /// PEM-encoded public half, as served by the key discovery endpoint.
    pub fn public_key_pem(&self, key_id: &str) -> McpResult<String> {
        use rsa::pkcs8::EncodePublicKey;
        let public = self
            .public_key(key_id)
            .ok_or_else(|| McpError::invalid_request("Unknown keyId"))?;
        public
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| McpError::internal(format!("PEM encoding failed: {e}")))
    }

    /// Open an envelope: unwrap the session key, then AEAD-open the
    /// payload. Every failure maps to `InvalidRequest`; details carry no
    /// key material.
    pub fn open(&self, envelope: &EncryptedEnvelope) -> McpResult<AuthPayload> {
        let key = self
            .keys
            .get(&envelope.key_id)
            .ok_or_else(|| McpError::invalid_request("Unknown keyId"))?;

        let wrapped = decode_field(&envelope.encrypted_session_key, "encryptedSessionKey")?;
        let iv = decode_field(&envelope.iv, "iv")?;
        let tag = decode_field(&envelope.auth_tag, "authTag")?;
        let body = decode_field(&envelope.ciphertext, "ciphertext")?;

        if iv.len() != NONCE_BYTES {
            return Err(McpError::invalid_request("Envelope iv must be 12 bytes"));
        }

        let session_key = key
            .decrypt(Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| McpError::invalid_request("Session key unwrap failed"))?;
        if session_key.len() != SESSION_KEY_BYTES {
            return Err(McpError::invalid_request("Session key must be 32 bytes"));
        }

        let cipher = Aes256Gcm::new_from_slice(&session_key)
            .map_err(|_| McpError::invalid_request("Session key must be 32 bytes"))?;
        let mut sealed = body;
        sealed.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| McpError::invalid_request("Envelope decryption failed"))?;

        let payload: AuthPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| McpError::invalid_request(format!("Malformed envelope payload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }
}

/// Client-side sealing, used by tests and provisioning tooling.
pub fn seal(
    public_key: &RsaPublicKey,
    key_id: &str,
    payload: &AuthPayload,
) -> McpResult<EncryptedEnvelope> {
    let mut rng = rand::thread_rng();

    let mut session_key = [0u8; SESSION_KEY_BYTES];
    rng.fill_bytes(&mut session_key);
    let mut iv = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut iv);

    let wrapped = public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), &session_key)
        .map_err(|e| McpError::internal(format!("Session key wrap failed: {e}")))?;

    let cipher = Aes256Gcm::new_from_slice(&session_key)
        .map_err(|e| McpError::internal(format!("Cipher init failed: {e}")))?;
    let plaintext = serde_json::to_vec(payload)
        .map_err(|e| McpError::internal(format!("Payload serialization failed: {e}")))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_ref())
        .map_err(|e| McpError::internal(format!("Encryption failed: {e}")))?;

    // aes-gcm appends the 16-byte tag; the wire format carries it apart.
    let (body, tag) = sealed.split_at(sealed.len() - 16);

    Ok(EncryptedEnvelope {
        key_id: key_id.to_string(),
        encrypted_session_key: STANDARD.encode(wrapped),
        iv: STANDARD.encode(iv),
        auth_tag: STANDARD.encode(tag),
        ciphertext: STANDARD.encode(body),
    })
}

fn decode_field(value: &str, field: &str) -> McpResult<Vec<u8>> {
    if value.is_empty() {
        return Err(McpError::invalid_request(format!(
            "Envelope field {field} must be non-empty"
        )));
    }
    STANDARD
        .decode(value)
        .map_err(|_| McpError::invalid_request(format!("Envelope field {field} is not valid base64")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AuthPayload {
        AuthPayload {
            credentials: PayloadCredentials {
                username: "TESTUSER".into(),
                password: "secret".into(),
            },
            request: PayloadRequest {
                host: "ibmi.example.com".into(),
                duration: Some(3600),
                poolstart: Some(2),
                poolmax: Some(10),
            },
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let ring = KeyRing::generate().unwrap();
        let key_id = ring.key_ids().pop().unwrap();
        let public = ring.public_key(&key_id).unwrap();

        let envelope = seal(&public, &key_id, &payload()).unwrap();
        let opened = ring.open(&envelope).unwrap();
        assert_eq!(opened.credentials.username, "TESTUSER");
        assert_eq!(opened.request.host, "ibmi.example.com");
        assert_eq!(opened.request.poolmax, Some(10));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let ring = KeyRing::generate().unwrap();
        let key_id = ring.key_ids().pop().unwrap();
        let public = ring.public_key(&key_id).unwrap();

        let mut envelope = seal(&public, &key_id, &payload()).unwrap();
        let mut body = STANDARD.decode(&envelope.ciphertext).unwrap();
        body[0] ^= 0xff;
        envelope.ciphertext = STANDARD.encode(body);

        let err = ring.open(&envelope).unwrap_err();
        assert!(matches!(err, McpError::InvalidRequest { .. }));
    }

    #[test]
    fn test_unknown_key_id_rejected() {
        let ring = KeyRing::generate().unwrap();
        let key_id = ring.key_ids().pop().unwrap();
        let public = ring.public_key(&key_id).unwrap();
        let mut envelope = seal(&public, &key_id, &payload()).unwrap();
        envelope.key_id = "nonexistent".into();
        assert!(ring.open(&envelope).is_err());
    }

    #[test]
    fn test_payload_validation() {
        let mut p = payload();
        p.credentials.username = "".into();
        assert!(p.validate().is_err());

        let mut p = payload();
        p.request.duration = Some(0);
        assert!(p.validate().is_err());
        p.request.duration = Some(86_400);
        assert!(p.validate().is_ok());
        p.request.duration = Some(86_401);
        assert!(p.validate().is_err());

        let mut p = payload();
        p.request.poolstart = Some(20);
        p.request.poolmax = Some(10);
        assert!(p.validate().is_err());
    }
}
