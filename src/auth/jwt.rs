//! Bearer token verification
//!
//! Token issuance lives in the identity service; this crate only verifies.
//! The [`TokenVerifier`] trait is the seam the auth gate consumes, so tests
//! can substitute a stub verifier.

use crate::{config::AppConfig, error::AppError, models::auth::{TokenUser, UserRole}};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// User email
    pub email: String,

    /// Role name
    pub role: String,

    /// Merchant this identity is pinned to (absent for platform admins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<Uuid>,

    /// Outlet for outlet-level staff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlet_id: Option<Uuid>,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,
}

/// Verifies a bearer token into a [`TokenUser`].
///
/// `Ok(None)` means the token is invalid or expired (a denial);
/// `Err` means the verifier itself failed (an internal error). Callers must
/// keep the two apart.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Option<TokenUser>, AppError>;
}

/// HS256 JWT verifier
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let secret = config.security.jwt_secret.expose_secret();

        // HS256 needs at least 32 bytes of key material
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Option<TokenUser>, AppError> {
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                return match e.kind() {
                    // 密钥/配置层面的错误是校验器故障，不是令牌被拒
                    ErrorKind::InvalidKeyFormat | ErrorKind::InvalidAlgorithmName => {
                        Err(AppError::AuthenticationFailed(e.to_string()))
                    }
                    _ => {
                        tracing::debug!("Token validation failed: {:?}", e);
                        Ok(None)
                    }
                };
            }
        };

        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            tracing::debug!(sub = %claims.sub, "Token subject is not a valid id");
            return Ok(None);
        };

        let Some(role) = UserRole::parse(&claims.role) else {
            tracing::debug!(role = %claims.role, "Token carries unknown role");
            return Ok(None);
        };

        Ok(Some(TokenUser {
            id: user_id,
            email: claims.email,
            role,
            merchant_id: claims.merchant_id,
            outlet_id: claims.outlet_id,
        }))
    }
}
