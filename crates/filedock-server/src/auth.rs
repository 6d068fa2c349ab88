use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{db::now, User};
use crate::FileManager;

type HmacSha256 = Hmac<Sha256>;

/// Session tokens are valid for two hours.
pub const TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

/// How a request's identity is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// No identity checks; every request acts as the default user.
    None,
    /// Username and password, exchanged for a signed token at login.
    Default,
    /// Identity is taken from a header set by a trusted reverse proxy.
    Proxy { header: String },
}

impl AuthMethod {
    /// Check the configured method and header. Runs before anything listens.
    pub fn validate(method: &str, header: &str) -> Result<Self> {
        match method {
            "none" => Ok(Self::None),
            "default" => Ok(Self::Default),
            "proxy" => {
                let header = header.trim();
                if header.is_empty() {
                    return Err(Error::Config(
                        "auth.header must be set when auth.method is 'proxy'".into(),
                    ));
                }
                warn!(
                    header,
                    "proxy authentication trusts the identity header as sent; this is insecure \
                     unless the reverse proxy strips or overwrites it for every client"
                );
                Ok(Self::Proxy {
                    header: header.to_owned(),
                })
            }
            other => Err(Error::Config(format!(
                "auth.method must be 'none', 'default' or 'proxy', got {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Default => "default",
            Self::Proxy { .. } => "proxy",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Passwords ────────────────────────────────────────────────────────────────

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    use rand::Rng;
    let salt_bytes: [u8; 16] = rand::thread_rng().gen();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| Error::Codec(format!("argon2 salt: {e}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Codec(format!("argon2 hash: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ── Tokens ───────────────────────────────────────────────────────────────────

/// Issue `<username>.<expiry>.<hex hmac>`.
pub fn issue_token(key: &[u8], username: &str, now: i64) -> String {
    let payload = format!("{username}.{}", now + TOKEN_TTL_SECS);
    let signature = sign(key, &payload);
    format!("{payload}.{signature}")
}

/// Return the username carried by a valid, unexpired token.
pub fn verify_token(key: &[u8], token: &str, now: i64) -> Option<String> {
    let (payload, signature) = token.rsplit_once('.')?;
    let expected = sign(key, payload);
    if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
        return None;
    }
    let (username, expiry) = payload.rsplit_once('.')?;
    let expiry: i64 = expiry.parse().ok()?;
    if now >= expiry {
        return None;
    }
    Some(username.to_owned())
}

fn sign(key: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Axum middleware that resolves the acting [`User`] and stores it as a
/// request extension.
pub async fn require_user(
    State(fm): State<Arc<FileManager>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = resolve_user(&fm, &request)?;
    debug!(user = %user.username, "request authenticated");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn resolve_user(fm: &FileManager, request: &Request) -> Result<User> {
    match fm.auth() {
        AuthMethod::None => Ok(fm.default_user()),
        AuthMethod::Proxy { header } => {
            let username = request
                .headers()
                .get(header.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or(Error::Unauthorized)?;
            fm.store()
                .users
                .get_by_username(username)?
                .ok_or(Error::Unauthorized)
        }
        AuthMethod::Default => {
            let token = request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or(Error::Unauthorized)?;
            let username =
                verify_token(fm.signing_key(), token, now()).ok_or(Error::Unauthorized)?;
            fm.store()
                .users
                .get_by_username(&username)?
                .ok_or(Error::Unauthorized)
        }
    }
}
