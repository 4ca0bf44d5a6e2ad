use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use vortex_types::api::Claims;

use crate::error::{GatewayError, Result};

/// Access tokens stay valid for 30 days.
const TOKEN_LIFETIME_DAYS: i64 = 30;

/// Hash a password with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatewayError::Storage(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> Result<()> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| GatewayError::Storage(format!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| GatewayError::Unauthorized)
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> Result<(String, DateTime<Utc>)> {
    let expires_at = Utc::now() + Duration::days(TOKEN_LIFETIME_DAYS);
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| GatewayError::Storage(format!("token signing failed: {}", e)))?;

    Ok((token, expires_at))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| GatewayError::Unauthorized)?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(matches!(
            verify_password("battery staple", &hash),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[test]
    fn test_token_verification() {
        let user_id = Uuid::new_v4();
        let (token, expires_at) = create_token("secret", user_id, "neo@matrix.io").unwrap();
        assert!(expires_at > Utc::now());

        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "neo@matrix.io");

        assert!(matches!(
            verify_token("other-secret", &token),
            Err(GatewayError::Unauthorized)
        ));
    }
}
