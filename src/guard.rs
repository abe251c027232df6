//! Role guard: resolves the caller from a bearer token and gates operations
//! on the caller's role or ownership of a record.

use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::{Claims, Role};
use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::{debug, error};
use std::future::{ready, Ready};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i32,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn new(user_id: i32, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The bearer token must decode into valid, unexpired claims.
pub fn require_auth(token: &str, config: &AppConfig) -> Result<AuthenticatedUser, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::AuthError("Invalid or expired token".to_string())
    })?;
    Ok(AuthenticatedUser::new(data.claims.user_id, data.claims.role))
}

/// The caller must hold exactly `role`.
pub fn require_role(caller: &AuthenticatedUser, role: Role) -> Result<(), ApiError> {
    if caller.role == role {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "This operation requires the {} role",
            role
        )))
    }
}

/// The caller must be the user that owns the record.
pub fn require_owner(caller: &AuthenticatedUser, owner_user_id: i32) -> Result<(), ApiError> {
    if caller.user_id == owner_user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You do not own this record".to_string(),
        ))
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(config) = req.app_data::<web::Data<AppConfig>>() else {
            error!("AppConfig is not registered as app data");
            return ready(Err(ApiError::InternalError(
                "Authentication is not configured".to_string(),
            )));
        };
        let result = match bearer_token(req) {
            Some(token) => require_auth(token, config),
            None => Err(ApiError::AuthError(
                "Missing bearer token".to_string(),
            )),
        };
        ready(result)
    }
}
