//! Bearer tokens shared by both services.
//!
//! Tokens are HS256 JWTs signed with the shared `PUBLIC_JWT_SECRET`. The
//! claim set is fixed:
//!
//! ```json
//! {"user_id":"8f9c...","role":"DRIVER","exp":1735689600}
//! ```
//!
//! HTTP requests carry the token in `Authorization: Bearer <jwt>`; realtime
//! clients send it in their first `auth` frame.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::objects::Role;

pub const AUTHORIZATION_SCHEME: &str = "Bearer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub role: Role,
    /// Expiry as a unix timestamp in seconds.
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("malformed authorization header")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("role {actual} may not access this resource")]
    WrongRole { actual: Role },
    #[error("token does not belong to this user")]
    UserMismatch,
    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(AuthError::Signing)
    }

    /// Checks signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })
    }

    /// Verifies the token and requires it to belong to `user_id` with `role`.
    pub fn verify_for(&self, token: &str, user_id: Uuid, role: Role) -> Result<Claims, AuthError> {
        let claims = self.verify(token)?;
        if claims.role != role {
            return Err(AuthError::WrongRole {
                actual: claims.role,
            });
        }
        if claims.user_id != user_id {
            return Err(AuthError::UserMismatch);
        }
        Ok(claims)
    }
}

/// Extracts the token from an `Authorization` header value.
pub fn parse_bearer(header: &str) -> Result<&str, AuthError> {
    let (scheme, token) = header.trim().split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_SCHEME) {
        return Err(AuthError::Malformed);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn claims(role: Role, ttl: i64) -> Claims {
        Claims {
            user_id: Uuid::new_v4(),
            role,
            exp: OffsetDateTime::now_utc().unix_timestamp() + ttl,
        }
    }

    #[test]
    fn test_issue_then_verify() {
        let keys = JwtKeys::new(b"secret");
        let c = claims(Role::Driver, 600);
        let token = keys.issue(&c).unwrap();
        assert_eq!(keys.verify(&token).unwrap(), c);
        assert!(keys.verify_for(&token, c.user_id, Role::Driver).is_ok());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let keys = JwtKeys::new(b"secret");
        let token = keys.issue(&claims(Role::Passenger, -120)).unwrap();
        assert!(matches!(keys.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_wrong_secret_and_wrong_subject() {
        let c = claims(Role::Passenger, 600);
        let token = JwtKeys::new(b"one").issue(&c).unwrap();
        assert!(matches!(
            JwtKeys::new(b"two").verify(&token),
            Err(AuthError::Invalid)
        ));

        let keys = JwtKeys::new(b"one");
        assert!(matches!(
            keys.verify_for(&token, Uuid::new_v4(), Role::Passenger),
            Err(AuthError::UserMismatch)
        ));
        assert!(matches!(
            keys.verify_for(&token, c.user_id, Role::Driver),
            Err(AuthError::WrongRole {
                actual: Role::Passenger
            })
        ));
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def").unwrap(), "abc.def");
        assert_eq!(parse_bearer("bearer  xyz ").unwrap(), "xyz");
        assert!(matches!(parse_bearer("Basic abc"), Err(AuthError::Malformed)));
        assert!(matches!(parse_bearer("Bearer"), Err(AuthError::Malformed)));
        assert!(matches!(parse_bearer("Bearer   "), Err(AuthError::Malformed)));
    }
}
