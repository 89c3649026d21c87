//! HMAC signatures for webhooks, upload tokens and signed download links.

use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{FulfillmentError, Result};

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length")
}

/// Hex-encoded HMAC-SHA256 of `message`.
pub fn sign_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex-encoded HMAC-SHA256 in constant time.
pub fn verify_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = mac(secret);
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Compares two secrets without leaking where they differ.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// Issues and verifies per-order, time-scoped artwork upload tokens.
///
/// Token format: `{expires_unix}.{hex hmac("{order_id}.{expires_unix}")}`.
#[derive(Clone)]
pub struct UploadTokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl UploadTokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Issues a token for `order_id` valid until `now + ttl`.
    ///
    /// An unrepresentable expiry yields a token that expires immediately.
    pub fn issue(&self, order_id: &OrderId, now: DateTime<Utc>) -> String {
        let expires = now.checked_add_signed(self.ttl).unwrap_or(now).timestamp();
        let signature = sign_hex(&self.secret, format!("{order_id}.{expires}").as_bytes());
        format!("{expires}.{signature}")
    }

    /// Checks that `token` was issued for `order_id` and has not expired.
    pub fn verify(&self, order_id: &OrderId, token: &str, now: DateTime<Utc>) -> Result<()> {
        let (expires, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| FulfillmentError::Authenticity("malformed upload token".into()))?;
        let expires_at: i64 = expires
            .parse()
            .map_err(|_| FulfillmentError::Authenticity("malformed upload token".into()))?;

        if !verify_hex(
            &self.secret,
            format!("{order_id}.{expires_at}").as_bytes(),
            signature,
        ) {
            return Err(FulfillmentError::Authenticity(
                "upload token does not match order".into(),
            ));
        }
        if now.timestamp() > expires_at {
            return Err(FulfillmentError::Authenticity("upload token expired".into()));
        }
        Ok(())
    }
}

/// Signs and verifies time-limited download links served under `/files`.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn payload(bucket: &str, path: &str, expires: i64) -> String {
        format!("{bucket}/{path}:{expires}")
    }

    /// Builds a link to `bucket/path` that stops working at `expires_at`.
    pub fn sign(&self, bucket: &str, path: &str, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        let signature = sign_hex(&self.secret, Self::payload(bucket, path, expires).as_bytes());
        format!(
            "{}/files/{bucket}/{path}?expires={expires}&signature={signature}",
            self.base_url
        )
    }

    /// Returns true if the signature is genuine and unexpired.
    pub fn verify(
        &self,
        bucket: &str,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        now.timestamp() <= expires
            && verify_hex(
                &self.secret,
                Self::payload(bucket, path, expires).as_bytes(),
                signature,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrip() {
        let sig = sign_hex(b"secret", b"message");
        assert!(verify_hex(b"secret", b"message", &sig));
        assert!(!verify_hex(b"other", b"message", &sig));
        assert!(!verify_hex(b"secret", b"tampered", &sig));
        assert!(!verify_hex(b"secret", b"message", "not-hex"));
    }

    #[test]
    fn tokens_match_requires_exact_value() {
        assert!(tokens_match("admin-token", "admin-token"));
        assert!(!tokens_match("admin-token", "admin-tokem"));
        assert!(!tokens_match("admin-token", "admin"));
        assert!(!tokens_match("", ""));
    }

    #[test]
    fn upload_token_is_bound_to_order() {
        let signer = UploadTokenSigner::new("k", Duration::hours(1));
        let now = Utc::now();
        let o1 = OrderId::parse("o1").unwrap();
        let o2 = OrderId::parse("o2").unwrap();
        let token = signer.issue(&o1, now);

        assert!(signer.verify(&o1, &token, now).is_ok());
        assert!(matches!(
            signer.verify(&o2, &token, now),
            Err(FulfillmentError::Authenticity(_))
        ));
    }

    #[test]
    fn upload_token_expires() {
        let signer = UploadTokenSigner::new("k", Duration::minutes(5));
        let now = Utc::now();
        let id = OrderId::parse("o1").unwrap();
        let token = signer.issue(&id, now);

        assert!(signer.verify(&id, &token, now + Duration::minutes(4)).is_ok());
        assert!(signer.verify(&id, &token, now + Duration::minutes(6)).is_err());
    }

    #[test]
    fn upload_token_with_unrepresentable_ttl_expires_immediately() {
        let signer = UploadTokenSigner::new("k", Duration::MAX);
        let now = Utc::now();
        let id = OrderId::parse("o1").unwrap();
        let token = signer.issue(&id, now);

        assert!(signer.verify(&id, &token, now).is_ok());
        assert!(signer.verify(&id, &token, now + Duration::seconds(2)).is_err());
    }

    #[test]
    fn upload_token_rejects_tampered_expiry() {
        let signer = UploadTokenSigner::new("k", Duration::minutes(5));
        let now = Utc::now();
        let id = OrderId::parse("o1").unwrap();
        let token = signer.issue(&id, now);
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{sig}", now.timestamp() + 86_400);

        assert!(signer.verify(&id, &forged, now).is_err());
        assert!(signer.verify(&id, "garbage", now).is_err());
    }

    #[test]
    fn signed_url_verifies_until_expiry() {
        let signer = UrlSigner::new("k", "https://prints.example/");
        let now = Utc::now();
        let expires = now + Duration::days(7);
        let url = signer.sign("artifacts", "o1/print.pdf", expires);

        assert!(url.starts_with("https://prints.example/files/artifacts/o1/print.pdf?expires="));
        let signature = url.rsplit_once("signature=").unwrap().1;
        assert!(signer.verify(
            "artifacts",
            "o1/print.pdf",
            expires.timestamp(),
            signature,
            now
        ));
        assert!(!signer.verify(
            "artifacts",
            "o2/print.pdf",
            expires.timestamp(),
            signature,
            now
        ));
        assert!(!signer.verify(
            "artifacts",
            "o1/print.pdf",
            expires.timestamp(),
            signature,
            expires + Duration::seconds(1)
        ));
    }
}
