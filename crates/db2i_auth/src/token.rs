//! Bearer-token session manager.
//!
//! Tokens are 256-bit random opaque values. Sessions live in memory;
//! a background reaper sweeps expired ones and asks the authenticated
//! pool manager to close the owning pools.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use db2i_db::auth_pool::{anonymize_token, AuthPoolManager, SessionValidator};
use db2i_protocol::defaults::{
    DEFAULT_TOKEN_DURATION_SECS, MAX_CONCURRENT_SESSIONS, SESSION_REAP_INTERVAL,
};
use db2i_protocol::{IbmiCredentials, McpError, McpResult, PoolSizing};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const TOKEN_BYTES: usize = 32;

/// A live authenticated session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub credentials: IbmiCredentials,
    pub sizing: PoolSizing,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whole seconds until expiry, clamped at zero.
    pub fn expires_in_seconds(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }
}

pub struct TokenManager {
    sessions: RwLock<HashMap<String, AuthSession>>,
    max_sessions: usize,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::with_session_ceiling(MAX_CONCURRENT_SESSIONS)
    }

    pub fn with_session_ceiling(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Whether the concurrent-session ceiling permits another session.
    pub fn can_create_new_session(&self) -> bool {
        self.sessions.read().expect("sessions lock").len() < self.max_sessions
    }

    /// Issue a new bearer token for `credentials`.
    pub fn create_session(
        &self,
        credentials: IbmiCredentials,
        duration_seconds: Option<u64>,
        sizing: PoolSizing,
    ) -> McpResult<AuthSession> {
        if !self.can_create_new_session() {
            return Err(McpError::rate_limited(format!(
                "Concurrent session limit reached ({})",
                self.max_sessions
            )));
        }

        let token = generate_token();
        let issued_at = Utc::now();
        let duration = duration_seconds.unwrap_or(DEFAULT_TOKEN_DURATION_SECS);
        let expires_at = issued_at + ChronoDuration::seconds(duration as i64);

        let session = AuthSession {
            token: token.clone(),
            credentials,
            sizing,
            issued_at,
            expires_at,
        };

        self.sessions
            .write()
            .expect("sessions lock")
            .insert(token.clone(), session.clone());

        info!(
            token = %anonymize_token(&token),
            user = %session.credentials.user,
            host = %session.credentials.host,
            expires_at = %expires_at,
            "session created"
        );
        Ok(session)
    }

    /// Validate a token: present, unexpired, not revoked.
    pub fn validate_token(&self, token: &str) -> McpResult<AuthSession> {
        let expired = {
            let sessions = self.sessions.read().expect("sessions lock");
            match sessions.get(token) {
                None => return Err(McpError::unauthorized("Invalid bearer token")),
                Some(session) if session.is_expired() => true,
                Some(session) => return Ok(session.clone()),
            }
        };
        if expired {
            self.sessions.write().expect("sessions lock").remove(token);
        }
        Err(McpError::unauthorized("Bearer token has expired"))
    }

    /// Revoke a token; returns whether it existed.
    pub fn remove_token(&self, token: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .expect("sessions lock")
            .remove(token)
            .is_some();
        if removed {
            debug!(token = %anonymize_token(token), "session removed");
        }
        removed
    }

    /// Drop every expired session, returning the reaped tokens.
    pub fn reap_expired(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().expect("sessions lock");
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(t, _)| t.clone())
            .collect();
        for token in &expired {
            sessions.remove(token);
        }
        expired
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("sessions lock").len()
    }
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionValidator for TokenManager {
    fn validate(&self, token: &str) -> McpResult<()> {
        self.validate_token(token).map(|_| ())
    }
}

/// Spawn the background reaper: expired sessions are dropped and their
/// pools closed on a fixed interval.
pub fn spawn_reaper(
    tokens: Arc<TokenManager>,
    pools: Arc<AuthPoolManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_REAP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = tokens.reap_expired();
            for token in &reaped {
                pools.remove_pool(token).await;
            }
            // Also reap pools whose tokens vanished outside the expiry path.
            pools.cleanup_expired_pools().await;
            if !reaped.is_empty() {
                debug!(count = reaped.len(), "expired sessions reaped");
            }
        }
    })
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> IbmiCredentials {
        IbmiCredentials {
            host: "ibmi.example.com".into(),
            port: 8076,
            user: "TESTUSER".into(),
            password: "secret".into(),
            ignore_unauthorized: false,
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let mgr = TokenManager::new();
        let session = mgr
            .create_session(credentials(), Some(3600), PoolSizing::default())
            .unwrap();
        assert_eq!(session.token.len(), 43); // 32 bytes base64url, unpadded

        let validated = mgr.validate_token(&session.token).unwrap();
        assert_eq!(validated.credentials.user, "TESTUSER");
        assert!(validated.expires_in_seconds() > 3590);
    }

    #[test]
    fn test_unknown_token_rejected() {
        let mgr = TokenManager::new();
        assert!(matches!(
            mgr.validate_token("nope"),
            Err(McpError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_expired_token_rejected_and_removed() {
        let mgr = TokenManager::new();
        let session = mgr
            .create_session(credentials(), Some(1), PoolSizing::default())
            .unwrap();
        // Force expiry.
        {
            let mut sessions = mgr.sessions.write().unwrap();
            sessions.get_mut(&session.token).unwrap().expires_at =
                Utc::now() - ChronoDuration::seconds(1);
        }
        assert!(mgr.validate_token(&session.token).is_err());
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_session_ceiling() {
        let mgr = TokenManager::with_session_ceiling(2);
        mgr.create_session(credentials(), None, PoolSizing::default())
            .unwrap();
        mgr.create_session(credentials(), None, PoolSizing::default())
            .unwrap();
        assert!(!mgr.can_create_new_session());
        assert!(mgr
            .create_session(credentials(), None, PoolSizing::default())
            .is_err());
    }

    #[test]
    fn test_reap_expired() {
        let mgr = TokenManager::new();
        let live = mgr
            .create_session(credentials(), Some(3600), PoolSizing::default())
            .unwrap();
        let dead = mgr
            .create_session(credentials(), Some(3600), PoolSizing::default())
            .unwrap();
        {
            let mut sessions = mgr.sessions.write().unwrap();
            sessions.get_mut(&dead.token).unwrap().expires_at =
                Utc::now() - ChronoDuration::seconds(5);
        }
        let reaped = mgr.reap_expired();
        assert_eq!(reaped, vec![dead.token.clone()]);
        assert!(mgr.validate_token(&live.token).is_ok());
    }

    #[test]
    fn test_tokens_are_unique() {
        let mgr = TokenManager::new();
        let a = mgr
            .create_session(credentials(), None, PoolSizing::default())
            .unwrap();
        let b = mgr
            .create_session(credentials(), None, PoolSizing::default())
            .unwrap();
        assert_ne!(a.token, b.token);
    }
}
