//! Authentication and role domain models

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Platform roles.
///
/// `Admin` is the platform operator; the other roles are pinned to the
/// merchant encoded in their token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    MerchantOwner,
    OutletStaff,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::MerchantOwner => "MERCHANT_OWNER",
            UserRole::OutletStaff => "OUTLET_STAFF",
        }
    }

    /// Parse a role string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "MERCHANT_OWNER" => Some(UserRole::MerchantOwner),
            "OUTLET_STAFF" => Some(UserRole::OutletStaff),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canned role sets for route requirements.
pub mod role_sets {
    use super::UserRole;

    /// Platform administrators only.
    pub const ADMIN_ONLY: &[UserRole] = &[UserRole::Admin];

    /// Administrators or merchant owners.
    pub const MERCHANT_ADMIN: &[UserRole] = &[UserRole::Admin, UserRole::MerchantOwner];

    /// All business roles (admin, owner, outlet staff).
    pub const BUSINESS_ROLES: &[UserRole] = &[
        UserRole::Admin,
        UserRole::MerchantOwner,
        UserRole::OutletStaff,
    ];
}

/// Identity resolved from a verified token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub merchant_id: Option<Uuid>,
    pub outlet_id: Option<Uuid>,
}
