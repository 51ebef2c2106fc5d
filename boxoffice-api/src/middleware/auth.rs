use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use boxoffice_core::models::{Requester, Role};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    fn requester(&self) -> Result<Requester, AppError> {
        let user_id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Authentication("subject is not a user id".to_string()))?;
        let role: Role = self
            .role
            .parse()
            .map_err(|_| AppError::Authentication(format!("unknown role {}", self.role)))?;
        Ok(Requester::new(Some(user_id), role))
    }
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Decodes the bearer token and injects the caller as a `Requester` extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Authorization(bearer) = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::Authentication("missing bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Authentication(e.to_string()))?;

    let requester = token_data.claims.requester()?;
    req.extensions_mut().insert(requester);

    Ok(next.run(req).await)
}

// ============================================================================
// Role Checks
// ============================================================================

pub fn require_admin(requester: &Requester) -> Result<(), AppError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin role required".to_string()))
    }
}

pub fn require_staff(requester: &Requester) -> Result<(), AppError> {
    if requester.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("staff role required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_to_requester() {
        let user = Uuid::new_v4();
        let claims = Claims { sub: user.to_string(), role: "pos".into(), exp: 0 };
        let requester = claims.requester().unwrap();
        assert_eq!(requester.user_id, Some(user));
        assert!(requester.is_point_of_sale());
        assert!(require_staff(&requester).is_ok());
        assert!(require_admin(&requester).is_err());

        let bad = Claims { sub: "not-a-uuid".into(), role: "USER".into(), exp: 0 };
        assert!(bad.requester().is_err());
    }
}
