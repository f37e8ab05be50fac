//! User-related API types

use lexis_core::User;
use serde::{Deserialize, Serialize};

/// Request to register the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterUserRequest {
    /// Telegram first name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Telegram username, without the leading `@`
    #[serde(default)]
    pub username: Option<String>,
}

/// Registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserResponse {
    pub user: User,
    /// False when the user was already registered.
    pub created: bool,
}
