use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token. There are no per-user accounts;
/// `sub` is a fixed marker and `jti` binds the token to a server-side
/// session row so logout can revoke it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(claims: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let claims = JwtClaims {
            sub: "shared".into(),
            jti: "abc-123".into(),
            exp: 4_102_444_800, // far future
        };
        let token = encode(&claims, b"testsecret").unwrap();
        let back = decode_and_verify(&token, b"testsecret").unwrap();
        assert_eq!(back.jti, "abc-123");
        assert_eq!(back.sub, "shared");
    }

    #[test]
    fn wrong_secret_rejected() {
        let claims = JwtClaims {
            sub: "shared".into(),
            jti: "abc-123".into(),
            exp: 4_102_444_800,
        };
        let token = encode(&claims, b"testsecret").unwrap();
        assert!(decode_and_verify(&token, b"other").is_err());
    }

    #[test]
    fn expired_rejected() {
        let claims = JwtClaims {
            sub: "shared".into(),
            jti: "abc-123".into(),
            exp: 1_000_000, // 1970s
        };
        let token = encode(&claims, b"testsecret").unwrap();
        assert!(decode_and_verify(&token, b"testsecret").is_err());
    }
}
