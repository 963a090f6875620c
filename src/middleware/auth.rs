use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::error::AppError;
use crate::models::auth::{AuthenticatedUser, Claims};

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("Invalid Authorization header format"))?;

        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| AppError::Upstream("JWT secret not configured".into()))?;

        decode_access_token(token, &secret.0)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token"))
    }
}

/// Extension type to carry the JWT secret through request extensions.
#[derive(Clone)]
pub struct JwtSecret(pub String);

pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    // Identity providers stamp their own audiences; the signature is the boundary.
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        email: claims.email.filter(|e| !e.is_empty()),
        metadata: claims.user_metadata.unwrap_or(Value::Null),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    pub(crate) fn mint(secret: &str, sub: Uuid, metadata: Value, ttl_secs: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            email: Some("pat@example.org".into()),
            user_metadata: Some(metadata),
            exp: (now + ttl_secs) as usize,
            iat: Some(now as usize),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn decodes_valid_token() {
        let sub = Uuid::new_v4();
        let token = mint("s3cret", sub, serde_json::json!({ "first_name": "Ada" }), 600);
        let user = decode_access_token(&token, "s3cret").unwrap();
        assert_eq!(user.user_id, sub);
        assert_eq!(user.email.as_deref(), Some("pat@example.org"));
        assert_eq!(user.metadata_str("first_name"), Some("Ada"));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = mint("s3cret", Uuid::new_v4(), Value::Null, 600);
        assert!(decode_access_token(&token, "other").is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let token = mint("s3cret", Uuid::new_v4(), Value::Null, -3600);
        assert!(decode_access_token(&token, "s3cret").is_err());
    }
}
