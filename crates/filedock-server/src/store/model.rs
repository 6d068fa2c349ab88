use serde::{Deserialize, Serialize};

use crate::policy::Permissions;

/// Server-owned state that must survive restarts. Stored as a singleton.
/// Records are bincode-encoded, so no field may use `skip_serializing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Mirror of the configured base URL at the last startup.
    pub base_url: String,
    pub prefix_url: String,
    /// HMAC key for session tokens.
    pub signing_key: Vec<u8>,
    pub schema_version: u32,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Assigned by the store on create.
    pub id: u64,
    pub username: String,
    /// Argon2 PHC string. Empty for users that only log in through a proxy.
    pub password_hash: String,
    pub admin: bool,
    pub permissions: Permissions,
}

/// What the API returns for a user: everything except the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: u64,
    pub username: String,
    pub admin: bool,
    pub permissions: Permissions,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            admin: u.admin,
            permissions: u.permissions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub token: String,
    /// Path relative to the server's file root, always starting with `/`.
    pub path: String,
    /// Id of the user that created the link.
    pub owner: u64,
    pub created_at: i64,
    /// Optional Unix timestamp (seconds) after which the link is dead.
    pub expires_at: Option<i64>,
}

impl Share {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}
