//! Custom Axum extractors for request authentication.
//!
//! Provides:
//! - `Passenger` — a bearer token with role `PASSENGER` (Ride Service routes).
//! - `AuthorizedDriver` — a bearer token with role `DRIVER` whose `user_id`
//!   matches the `{driver_id}` path segment (Driver-Location Service routes).
//!
//! Token verification is delegated to [`rideflow_sdk::auth`].

use axum::{
    extract::{FromRef, FromRequestParts, Path},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use rideflow_sdk::auth::{AuthError, Claims, JwtKeys, parse_bearer};
use rideflow_sdk::objects::Role;
use std::sync::Arc;
use uuid::Uuid;

/// Reads and verifies the `Authorization: Bearer <jwt>` header.
pub fn bearer_claims(headers: &HeaderMap, keys: &JwtKeys) -> Result<Claims, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;
    keys.verify(parse_bearer(header)?)
}

/// Errors returned by the authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    Auth(AuthError),
    InvalidPath,
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthRejection::Auth(AuthError::Missing | AuthError::Malformed) => {
                StatusCode::BAD_REQUEST
            }
            AuthRejection::Auth(AuthError::Expired | AuthError::Invalid | AuthError::Signing(_)) => {
                StatusCode::UNAUTHORIZED
            }
            AuthRejection::Auth(AuthError::WrongRole { .. } | AuthError::UserMismatch) => {
                StatusCode::FORBIDDEN
            }
            AuthRejection::InvalidPath => StatusCode::BAD_REQUEST,
        };
        let message = match self {
            AuthRejection::Auth(e) => e.to_string(),
            AuthRejection::InvalidPath => "invalid identifier in path".to_owned(),
        };
        (status, message).into_response()
    }
}

fn require_role(claims: &Claims, role: Role) -> Result<(), AuthError> {
    if claims.role == role {
        Ok(())
    } else {
        Err(AuthError::WrongRole {
            actual: claims.role,
        })
    }
}

// ---------------------------------------------------------------------------
// Passenger
// ---------------------------------------------------------------------------

/// An authenticated passenger.
pub struct Passenger {
    pub passenger_id: Uuid,
}

impl<S> FromRequestParts<S> for Passenger
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = bearer_claims(&parts.headers, &keys)?;
        require_role(&claims, Role::Passenger)?;
        Ok(Passenger {
            passenger_id: claims.user_id,
        })
    }
}

// ---------------------------------------------------------------------------
// AuthorizedDriver
// ---------------------------------------------------------------------------

/// An authenticated driver acting on their own `/drivers/{driver_id}` resource.
pub struct AuthorizedDriver {
    pub driver_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthorizedDriver
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = bearer_claims(&parts.headers, &keys)?;
        require_role(&claims, Role::Driver)?;

        let Path(driver_id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection::InvalidPath)?;
        if claims.user_id != driver_id {
            return Err(AuthError::UserMismatch.into());
        }
        Ok(AuthorizedDriver { driver_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use time::OffsetDateTime;

    fn token(keys: &JwtKeys, role: Role, ttl: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let claims = Claims {
            user_id,
            role,
            exp: OffsetDateTime::now_utc().unix_timestamp() + ttl,
        };
        (user_id, keys.issue(&claims).unwrap())
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn status(err: AuthError) -> StatusCode {
        AuthRejection::from(err).into_response().status()
    }

    #[test]
    fn test_valid_bearer_token() {
        let keys = JwtKeys::new(b"secret");
        let (user_id, jwt) = token(&keys, Role::Passenger, 600);
        let claims = bearer_claims(&headers(&format!("Bearer {jwt}")), &keys).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert!(require_role(&claims, Role::Passenger).is_ok());
        assert!(require_role(&claims, Role::Driver).is_err());
    }

    #[test]
    fn test_missing_and_malformed_headers_are_bad_requests() {
        let keys = JwtKeys::new(b"secret");
        let missing = bearer_claims(&HeaderMap::new(), &keys).unwrap_err();
        assert!(matches!(missing, AuthError::Missing));
        assert_eq!(status(missing), StatusCode::BAD_REQUEST);

        let malformed = bearer_claims(&headers("Token abc"), &keys).unwrap_err();
        assert_eq!(status(malformed), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_expired_and_forged_tokens_are_unauthorized() {
        let keys = JwtKeys::new(b"secret");
        let (_, expired) = token(&keys, Role::Driver, -120);
        let err = bearer_claims(&headers(&format!("Bearer {expired}")), &keys).unwrap_err();
        assert_eq!(status(err), StatusCode::UNAUTHORIZED);

        let (_, forged) = token(&JwtKeys::new(b"other"), Role::Driver, 600);
        let err = bearer_claims(&headers(&format!("Bearer {forged}")), &keys).unwrap_err();
        assert_eq!(status(err), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_role_and_owner_mismatch_are_forbidden() {
        assert_eq!(
            status(AuthError::WrongRole {
                actual: Role::Passenger
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status(AuthError::UserMismatch), StatusCode::FORBIDDEN);
    }
}
