use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{GlobalRole, Principal};
use crate::config::env_or;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }
        let exp_hours = env_or("JWT_EXP_HOURS", 24i64)?;
        Ok(Self::new(secret.into_bytes(), exp_hours))
    }

    pub fn encode(&self, user_id: Uuid, role: GlobalRole) -> Result<String, AppError> {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: user_id,
            role,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default = "default_role")]
    pub role: GlobalRole,
    pub exp: usize,
    pub iat: usize,
}

fn default_role() -> GlobalRole {
    GlobalRole::User
}

/// Bearer-authenticated caller, resolved to a [`Principal`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;
        Ok(AuthUser(Principal::new(claims.sub, claims.role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_carries_subject_and_role() {
        let jwt = JwtConfig::new("secret", 1);
        let user = Uuid::new_v4();
        let token = jwt.encode(user, GlobalRole::SuperAdmin).unwrap();

        let claims = jwt.decode(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role, GlobalRole::SuperAdmin);
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let token = JwtConfig::new("one", 1).encode(Uuid::new_v4(), GlobalRole::User).unwrap();
        let err = JwtConfig::new("two", 1).decode(&token).unwrap_err();
        assert!(matches!(err, AppError::Token(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = JwtConfig::new("secret", -2).encode(Uuid::new_v4(), GlobalRole::User).unwrap();
        assert!(JwtConfig::new("secret", -2).decode(&token).is_err());
    }
}
