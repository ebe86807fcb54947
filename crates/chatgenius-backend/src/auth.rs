use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BackendError;

/// Claims carried by session access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

pub fn validate_sign_up(username: &str, password: &str) -> Result<(), BackendError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(BackendError::InvalidSignUp("username must be 3-32 characters"));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(BackendError::InvalidSignUp("username must not contain whitespace"));
    }
    if password.len() < 8 {
        return Err(BackendError::InvalidSignUp("password must be at least 8 characters"));
    }
    Ok(())
}

/// Hash a password with Argon2id.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Issue an HS256 access token. Returns the token and its expiry.
pub fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: Duration,
) -> anyhow::Result<(String, DateTime<Utc>)> {
    let expires_at = Utc::now() + ttl;
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: expires_at.timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, expires_at))
}

pub fn verify_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}
