//! Bearer tokens for the single configured operator.
//!
//! A token is `<subject>.<expiry-unix>.<hex hmac>` where the MAC is
//! HMAC-SHA256 over `<subject>.<expiry-unix>` keyed with `auth.secret`.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const MAX_TTL_MINS: u64 = 100 * 365 * 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_mins: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::minutes(ttl_mins.min(MAX_TTL_MINS) as i64),
        }
    }

    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> String {
        let payload = format!("{subject}.{}", (now + self.ttl).timestamp());
        let sig = hex::encode(self.mac(&payload).finalize().into_bytes());
        format!("{payload}.{sig}")
    }

    /// Check signature and expiry; returns the subject.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let (payload, sig_hex) = token.rsplit_once('.').ok_or(AuthError::Malformed)?;
        let (subject, exp) = payload.rsplit_once('.').ok_or(AuthError::Malformed)?;
        if subject.is_empty() {
            return Err(AuthError::Malformed);
        }
        let exp: i64 = exp.parse().map_err(|_| AuthError::Malformed)?;
        let expected = hex::decode(sig_hex).map_err(|_| AuthError::Malformed)?;

        self.mac(payload)
            .verify_slice(&expected)
            .map_err(|_| AuthError::BadSignature)?;

        if now.timestamp() >= exp {
            return Err(AuthError::Expired);
        }
        Ok(subject.to_string())
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac takes any key length"));
        mac.update(payload.as_bytes());
        mac
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Verify the request's bearer token; returns the subject.
pub fn authorize(signer: &TokenSigner, headers: &HeaderMap) -> Result<String, AuthError> {
    let token = extract_bearer(headers).ok_or(AuthError::Missing)?;
    signer.verify(token.trim(), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let signer = TokenSigner::new("s3cret", 60);
        let now = Utc::now();
        let token = signer.issue("admin", now);
        assert_eq!(signer.verify(&token, now).unwrap(), "admin");
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::new("s3cret", 60);
        let now = Utc::now();
        let token = signer.issue("admin", now);
        assert_eq!(
            signer.verify(&token, now + Duration::minutes(61)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn forged_tokens_rejected() {
        let signer = TokenSigner::new("s3cret", 60);
        let other = TokenSigner::new("different", 60);
        let now = Utc::now();

        assert_eq!(
            signer.verify(&other.issue("admin", now), now),
            Err(AuthError::BadSignature)
        );

        // tampered expiry
        let later = (now + Duration::days(365)).timestamp().to_string();
        let token = signer.issue("admin", now);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &later;
        assert_eq!(
            signer.verify(&parts.join("."), now),
            Err(AuthError::BadSignature)
        );

        assert_eq!(signer.verify("garbage", now), Err(AuthError::Malformed));
        assert_eq!(signer.verify("a.b.zz", now), Err(AuthError::Malformed));
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc"));
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);

        let signer = TokenSigner::new("k", 5);
        assert_eq!(authorize(&signer, &headers), Err(AuthError::Missing));
    }
}
