//! Bearer tokens for the pin endpoint.
//!
//! A token is `base64url(bincode(claims)) "." base64url(signature)`, signed
//! by the node's Ed25519 key. Validation checks the signature first, then the
//! audience, then expiry, so a forged token is always reported as invalid
//! even if it is also expired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{self, Identity};
use crate::invite::{base64_url_decode, base64_url_encode};
use crate::types::PeerId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Who the token was issued to.
    pub subject: String,
    /// Protocol the token is valid for.
    pub audience: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no token")]
    NoToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,
}

/// Sign claims into a bearer token string.
pub fn issue(identity: &Identity, claims: &Claims) -> Result<String, TokenError> {
    let payload = bincode::serialize(claims).map_err(|_| TokenError::Invalid)?;
    let signature = identity.sign(&payload);
    Ok(format!(
        "{}.{}",
        base64_url_encode(&payload),
        base64_url_encode(&signature.to_bytes())
    ))
}

/// Validate a token against the issuer's public key and expected audience.
pub fn validate(token: &str, issuer: &PeerId, audience: &str) -> Result<Claims, TokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::NoToken);
    }

    let (payload_b64, signature_b64) = token.split_once('.').ok_or(TokenError::Invalid)?;
    let payload = base64_url_decode(payload_b64).map_err(|_| TokenError::Invalid)?;
    let signature = base64_url_decode(signature_b64).map_err(|_| TokenError::Invalid)?;

    identity::verify_signature(issuer, &payload, &signature).map_err(|_| TokenError::Invalid)?;

    let claims: Claims = bincode::deserialize(&payload).map_err(|_| TokenError::Invalid)?;
    if claims.audience != audience {
        return Err(TokenError::Invalid);
    }
    if Utc::now() > claims.expires_at {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(expires_at: DateTime<Utc>) -> Claims {
        Claims {
            subject: "client".to_string(),
            audience: "/skein/cafe/1.0.0".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_token_valid() {
        let node = Identity::generate();
        let token = issue(&node, &claims(Utc::now() + Duration::days(30))).unwrap();

        let got = validate(&token, &node.peer_id(), "/skein/cafe/1.0.0").unwrap();
        assert_eq!(got.subject, "client");
    }

    #[test]
    fn test_token_expired() {
        let node = Identity::generate();
        let token = issue(&node, &claims(Utc::now() - Duration::days(1))).unwrap();

        assert_eq!(
            validate(&token, &node.peer_id(), "/skein/cafe/1.0.0"),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_token_wrong_issuer() {
        let node = Identity::generate();
        let other = Identity::generate();
        let token = issue(&other, &claims(Utc::now() + Duration::days(30))).unwrap();

        assert_eq!(
            validate(&token, &node.peer_id(), "/skein/cafe/1.0.0"),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_token_wrong_audience() {
        let node = Identity::generate();
        let token = issue(&node, &claims(Utc::now() + Duration::days(30))).unwrap();

        assert_eq!(
            validate(&token, &node.peer_id(), "/other/1.0.0"),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_token_garbage() {
        let node = Identity::generate();
        assert_eq!(validate("", &node.peer_id(), "a"), Err(TokenError::NoToken));
        assert_eq!(
            validate("not-a-token", &node.peer_id(), "a"),
            Err(TokenError::Invalid)
        );
    }
}
