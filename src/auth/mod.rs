use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token claims. `sub` is the opaque caller id; tenant and role are
/// never trusted from the token and are resolved per request instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(caller_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: caller_id,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT secret not configured")]
    MissingSecret,
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
}

/// Sign claims with HS256. Issuance belongs to the identity provider; this
/// exists for tooling and tests.
pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::MissingSecret);
    }
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::MissingSecret);
    }
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map_err(|e| JwtError::InvalidToken(e.to_string()))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_validate_with_the_same_secret_only() {
        let caller = Uuid::new_v4();
        let token = generate_jwt(&Claims::new(caller, Duration::hours(1)), "secret").unwrap();
        assert_eq!(validate_jwt(&token, "secret").unwrap().sub, caller);
        assert!(matches!(validate_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = generate_jwt(&Claims::new(Uuid::new_v4(), Duration::hours(-2)), "secret").unwrap();
        assert!(validate_jwt(&token, "secret").is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        let claims = Claims::new(Uuid::new_v4(), Duration::hours(1));
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::MissingSecret)));
    }
}
