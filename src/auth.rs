use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, Result},
};

/// Claims carried by the bearer tokens the auth service issues. This crate
/// only verifies them; minting and session creation happen in the auth
/// service, against the same JWT secret and Redis instance.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String, // JWT ID for session management
}

impl Claims {
    pub fn verify(token: &str, jwt_secret: &str) -> Result<Self> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_ref()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[derive(Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub jti: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Authentication("Missing authorization header".to_string()))?;

        let claims = Claims::verify(bearer.token(), &state.config.jwt_secret)?;

        // Check if session is still valid in Redis
        if let Some(stored_user_id) = state.redis.get_session(&claims.jti).await? {
            if stored_user_id != claims.sub {
                return Err(AppError::Authentication("Invalid session".to_string()));
            }
        } else {
            return Err(AppError::Authentication("Session expired".to_string()));
        }

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Authentication("Invalid user ID in token".to_string()))?;

        Ok(AuthUser {
            user_id,
            username: claims.username,
            jti: claims.jti,
        })
    }
}

// Optional auth user (for endpoints that work with or without auth)
#[derive(Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalAuthUser(Some(user))),
            Err(_) => Ok(OptionalAuthUser(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn mint(secret: &str, exp: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "steve".to_string(),
            exp,
            iat: Utc::now().timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn verify_accepts_a_token_signed_with_the_shared_secret() {
        let exp = (Utc::now() + Duration::hours(1)).timestamp();
        let token = mint(SECRET, exp);

        let claims = Claims::verify(&token, SECRET).unwrap();
        assert_eq!(claims.username, "steve");
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn verify_rejects_a_token_signed_with_another_secret() {
        let exp = (Utc::now() + Duration::hours(1)).timestamp();
        let token = mint("some-other-secret", exp);

        assert!(Claims::verify(&token, SECRET).is_err());
    }

    #[test]
    fn verify_rejects_an_expired_token() {
        let exp = (Utc::now() - Duration::hours(1)).timestamp();
        let token = mint(SECRET, exp);

        assert!(Claims::verify(&token, SECRET).is_err());
    }
}
