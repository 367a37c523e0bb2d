use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

/// The claims carried by a bearer token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Issuance time, seconds since the epoch.
    pub iat: i64,
    /// Expiry time, seconds since the epoch.
    pub exp: i64,
    /// The subject user id.
    pub user_id: i64,
    /// The subject user type.
    pub user_type: String,
}

/// Signs the claims into a self-contained bearer token.
///
/// Layout: `base64url(claims JSON) . base64url(keyed-BLAKE3 MAC of the encoded
/// claims)`. Symmetric signing with a process-configuration secret, no
/// server-side lookup table.
pub fn sign(key: &[u8; 32], claims: &TokenClaims) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let mac = blake3::keyed_hash(key, payload.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.as_bytes());
    Ok(format!("{payload}.{signature}"))
}

/// Verifies signature and expiry, returning the embedded claims.
///
/// # Arguments
///
/// * `key` - The signing secret.
/// * `token` - The presented token.
/// * `now` - Current time, seconds since the epoch.
pub fn verify(key: &[u8; 32], token: &str, now: i64) -> Result<TokenClaims> {
    let (payload, signature) = token
        .split_once('.')
        .ok_or_else(|| AppError::Authentication("Malformed token".to_string()))?;

    let presented = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AppError::Authentication("Malformed token".to_string()))?;

    let expected = blake3::keyed_hash(key, payload.as_bytes());
    if presented.ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return Err(AppError::Authentication("Invalid token".to_string()));
    }

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AppError::Authentication("Malformed token".to_string()))?;
    let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
        .map_err(|_| AppError::Authentication("Malformed token".to_string()))?;

    if claims.exp < now {
        return Err(AppError::Authentication("Token expired".to_string()));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [42u8; 32];

    fn claims(now: i64) -> TokenClaims {
        TokenClaims {
            iat: now,
            exp: now + 3600,
            user_id: 7,
            user_type: "coordinator".to_string(),
        }
    }

    #[test]
    fn round_trip_preserves_claims() {
        let now = 1_700_000_000;
        let issued = claims(now);
        let token = sign(&KEY, &issued).expect("sign");
        let verified = verify(&KEY, &token, now).expect("verify");
        assert_eq!(verified, issued);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = 1_700_000_000;
        let token = sign(&KEY, &claims(now)).expect("sign");
        let (payload, signature) = token.split_once('.').expect("two parts");

        // Forge claims for another user, keeping the original signature.
        let mut forged: TokenClaims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).expect("decode"))
                .expect("claims");
        forged.user_id = 999;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).expect("json"));

        let result = verify(&KEY, &format!("{forged_payload}.{signature}"), now);
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let now = 1_700_000_000;
        let token = sign(&KEY, &claims(now)).expect("sign");
        let other_key = [1u8; 32];
        assert!(verify(&other_key, &token, now).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = 1_700_000_000;
        let token = sign(&KEY, &claims(now)).expect("sign");
        let result = verify(&KEY, &token, now + 3601);
        assert!(matches!(result, Err(AppError::Authentication(msg)) if msg.contains("expired")));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify(&KEY, "not-a-token", 0).is_err());
        assert!(verify(&KEY, "a.b", 0).is_err());
    }
}
