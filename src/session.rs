//! 会话注册表：签发带过期时间的 Bearer 令牌并校验。
//!
//! Tokens look like `base64url(claims).hex(hmac_sha256)`. The signature is
//! checked first so forged strings never touch the table, but the in-memory
//! table alone decides who the token belongs to and when it expires; the
//! `exp` claim embedded in the token is informational.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid or expired session")]
    InvalidOrExpired,
    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: i64,
    jti: String,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    secret: Vec<u8>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl SessionRegistry {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: std::time::Duration, sweep_threshold: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            secret: secret.into(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            sweep_threshold,
        }
    }

    /// 为用户签发新令牌。
    pub async fn create_session(&self, user_id: &str) -> Result<String, SessionError> {
        self.create_session_at(user_id, Utc::now()).await
    }

    pub(crate) async fn create_session_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claims = Claims {
            sub: user_id,
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|err| SessionError::Signing(err.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let signature = hex::encode(self.mac(&encoded)?.finalize().into_bytes());
        let token = format!("{encoded}.{signature}");

        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            token.clone(),
            SessionEntry {
                user_id: user_id.to_string(),
                expires_at,
            },
        );
        debug!(user_id, %expires_at, "session created");
        Ok(token)
    }

    /// 校验令牌并返回用户 ID。
    pub async fn validate_token(&self, token: &str) -> Result<String, SessionError> {
        self.validate_token_at(token, Utc::now()).await
    }

    pub(crate) async fn validate_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        if !self.signature_matches(token) {
            return Err(SessionError::InvalidOrExpired);
        }

        let mut sessions = self.sessions.lock().await;
        if sessions.len() > self.sweep_threshold {
            let removed = sweep(&mut sessions, now);
            debug!(removed, remaining = sessions.len(), "session sweep on validate");
        }

        match sessions.get(token) {
            Some(entry) if now <= entry.expires_at => Ok(entry.user_id.clone()),
            Some(_) => {
                sessions.remove(token);
                Err(SessionError::InvalidOrExpired)
            }
            None => Err(SessionError::InvalidOrExpired),
        }
    }

    /// 清理全部过期会话，返回清理数量。
    pub async fn prune_expired(&self) -> usize {
        self.prune_expired_at(Utc::now()).await
    }

    pub(crate) async fn prune_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        sweep(&mut sessions, now)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| SessionError::Signing(err.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    fn signature_matches(&self, token: &str) -> bool {
        let Some((payload, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        match self.mac(payload) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }
}

fn sweep(sessions: &mut HashMap<String, SessionEntry>, now: DateTime<Utc>) -> usize {
    let before = sessions.len();
    sessions.retain(|_, entry| now <= entry.expires_at);
    before - sessions.len()
}
