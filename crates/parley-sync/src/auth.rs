//! HMAC-SHA256 session tokens.
//!
//! A token is `base64url(user_id|expires|hex(signature))` where the signature
//! covers `user_id|expires`. Expiry is in Unix seconds.

use crate::error::SyncError;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::RwLock;

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

type HmacSha256 = Hmac<Sha256>;

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn mac_for(secret: &[u8], payload: &str) -> Result<HmacSha256, SyncError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SyncError::Unauthenticated(format!("invalid token secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Issues a token for `user_id` that expires at `expires` (Unix seconds).
pub fn issue_session_token(
    user_id: &str,
    secret: &[u8],
    expires: u64,
) -> Result<String, SyncError> {
    let payload = format!("{}|{}", user_id, expires);
    let signature = mac_for(secret, &payload)?.finalize().into_bytes();
    let token = format!("{}|{}", payload, hex::encode(signature));
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(token.as_bytes()))
}

/// Issues a token for `user_id` valid for `ttl_secs` from now.
pub fn generate_session_token(
    user_id: &str,
    secret: &[u8],
    ttl_secs: u64,
) -> Result<String, SyncError> {
    issue_session_token(user_id, secret, now_secs().saturating_add(ttl_secs))
}

/// Checks signature and expiry. Returns the bound user id.
pub fn verify_session_token(token: &str, secret: &[u8]) -> Result<String, SyncError> {
    let rejected = |reason: &str| SyncError::Unauthenticated(reason.to_string());

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .map_err(|_| rejected("token is not valid base64"))?;
    let token_str = String::from_utf8(decoded).map_err(|_| rejected("token is not utf-8"))?;

    // Split from the right: user ids may contain the separator.
    let mut parts = token_str.rsplitn(3, '|');
    let (Some(sig_hex), Some(expires_str), Some(user_id)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(rejected("malformed token"));
    };

    let provided = hex::decode(sig_hex).map_err(|_| rejected("malformed signature"))?;
    mac_for(secret, &format!("{}|{}", user_id, expires_str))?
        .verify_slice(&provided)
        .map_err(|_| rejected("bad signature"))?;

    let expires: u64 = expires_str
        .parse()
        .map_err(|_| rejected("malformed expiry"))?;
    if now_secs() > expires {
        return Err(rejected("token expired"));
    }

    Ok(user_id.to_string())
}

/// Decides whether a user may publish right now. Consulted before every send.
pub trait SessionAuth: Send + Sync {
    fn verify(&self, user_id: &str) -> Result<(), SyncError>;
}

/// Holds the caller's current token and checks it against the shared secret.
pub struct TokenAuth {
    secret: Vec<u8>,
    token: RwLock<Option<String>>,
}

impl TokenAuth {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            token: RwLock::new(None),
        }
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(token);
        self
    }

    /// Replaces the held token, e.g. after a refresh.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = Some(token.into());
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn clear_token(&self) {
        match self.token.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl std::fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuth")
            .field("secret", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl SessionAuth for TokenAuth {
    fn verify(&self, user_id: &str) -> Result<(), SyncError> {
        let token = match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let token = token.ok_or_else(|| SyncError::Unauthenticated("no token".to_string()))?;
        let bound = verify_session_token(&token, &self.secret)?;
        if bound != user_id {
            return Err(SyncError::Unauthenticated(
                "token is bound to a different user".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn token_round_trip_returns_user() {
        let token = generate_session_token("user-1", SECRET, 60).unwrap();
        assert_eq!(verify_session_token(&token, SECRET).unwrap(), "user-1");
    }

    #[test]
    fn user_id_with_separator_survives() {
        let token = generate_session_token("org|user", SECRET, 60).unwrap();
        assert_eq!(verify_session_token(&token, SECRET).unwrap(), "org|user");
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_session_token("user-1", SECRET, now_secs() - 10).unwrap();
        let err = verify_session_token(&token, SECRET).unwrap_err();
        assert_eq!(err, SyncError::Unauthenticated("token expired".to_string()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_session_token("user-1", SECRET, 60).unwrap();
        assert!(verify_session_token(&token, b"another-secret").is_err());
    }

    #[test]
    fn tampered_user_is_rejected() {
        let token = generate_session_token("alice", SECRET, 60).unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .unwrap();
        let forged = String::from_utf8(decoded).unwrap().replacen("alice", "mallory", 1);
        let forged = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(forged);
        assert!(verify_session_token(&forged, SECRET).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_session_token("not a token", SECRET).is_err());
        let no_parts = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("justone");
        assert!(verify_session_token(&no_parts, SECRET).is_err());
    }

    #[test]
    fn token_auth_checks_user_binding() {
        let token = generate_session_token("alice", SECRET, 60).unwrap();
        let auth = TokenAuth::new(SECRET).with_token(token);
        assert!(auth.verify("alice").is_ok());
        assert!(auth.verify("bob").is_err());

        auth.clear_token();
        assert!(auth.verify("alice").is_err());
    }

    #[test]
    fn token_auth_debug_hides_secrets() {
        let auth = TokenAuth::new(SECRET).with_token("tok");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("0123456789"));
        assert!(!debug.contains("tok\""));
    }
}
