use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use libris_shared::{Role, UserId};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

// ============================================================================
// JWT Claims
// ============================================================================

/// HS256 token payload. `sub` is the numeric user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    pub exp: usize,
}

// ============================================================================
// Extractors
// ============================================================================

/// Any caller presenting a valid bearer token.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Authentication("Access denied. No token provided.".to_string()))?;

        let token_data = decode::<Claims>(
            bearer.token(),
            &DecodingKey::from_secret(state.auth.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))?;

        Ok(Self {
            user_id: UserId(token_data.claims.sub),
            role: token_data.claims.role,
        })
    }
}

/// A student or faculty member.
#[derive(Debug, Clone, Copy)]
pub struct Patron(pub Actor);

impl FromRequestParts<AppState> for Patron {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let actor = Actor::from_request_parts(parts, state).await?;
        if !actor.role.is_patron() {
            return Err(AppError::Authorization("Access denied. Students and faculty only.".to_string()));
        }
        Ok(Self(actor))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Admin(pub Actor);

impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let actor = Actor::from_request_parts(parts, state).await?;
        if actor.role != Role::Admin {
            return Err(AppError::Authorization("Access denied. Admin only.".to_string()));
        }
        Ok(Self(actor))
    }
}
