use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::{self, AuthMethod},
    error::{Error, Result},
    fs::{resolve_within, FileSystem},
    policy::Permissions,
    store::{db::now, shares::generate_token, Share, User, UserView},
    FileManager,
};

type AppState = State<Arc<FileManager>>;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Resolve `path` inside the user's scope and check their rules against the
/// result. Returns the resolved path as `/`-separated from the scope root;
/// handlers operate on that form so the checked path is the one touched.
fn authorize(fs: &dyn FileSystem, user: &User, path: &str) -> Result<String> {
    let resolved = relative_to(fs.root(), &fs.resolve(path)?)?;
    if user.permissions.allowed(&resolved) {
        Ok(resolved)
    } else {
        Err(Error::Forbidden)
    }
}

fn require_admin(user: &User) -> Result<()> {
    if user.admin {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Directory listing as JSON, file contents as raw bytes.
fn render(fs: &dyn FileSystem, path: &str) -> Result<Response> {
    let entry = fs.stat(path)?;
    if entry.is_dir {
        let items = fs.list(path)?;
        Ok(Json(json!({ "path": path, "isDir": true, "items": items })).into_response())
    } else {
        let body = fs.read(path)?;
        Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            body,
        )
            .into_response())
    }
}

/// Express an absolute path as `/`-separated and relative to `base`.
fn relative_to(base: &FsPath, abs: &FsPath) -> Result<String> {
    let rel = abs
        .strip_prefix(base)
        .map_err(|_| Error::PathEscape(abs.to_owned()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(format!("/{}", parts.join("/")))
}

// ── Health & settings ────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn settings(State(fm): AppState) -> impl IntoResponse {
    let static_gen = fm.build_hook().map(|h| h.generator().name());
    Json(json!({
        "baseURL": fm.base_url(),
        "prefixURL": fm.prefix_url(),
        "authMethod": fm.auth().as_str(),
        "recaptchaHost": fm.recaptcha().host(),
        "recaptchaKey": fm.recaptcha().site_key(),
        "staticGen": static_gen,
    }))
}

// ── Login ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub recaptcha: String,
}

pub async fn login(State(fm): AppState, Json(req): Json<LoginRequest>) -> Result<Response> {
    if *fm.auth() != AuthMethod::Default {
        return Err(Error::BadRequest(format!(
            "login is not used with '{}' authentication",
            fm.auth()
        )));
    }
    if !fm.recaptcha().verify(&req.recaptcha).await {
        return Err(Error::Forbidden);
    }

    let user = fm
        .store()
        .users
        .get_by_username(&req.username)?
        .filter(|u| auth::verify_password(&req.password, &u.password_hash))
        .ok_or(Error::Unauthorized)?;

    info!(username = %user.username, "login");
    let token = auth::issue_token(fm.signing_key(), &user.username, now());
    Ok(Json(json!({ "token": token, "user": UserView::from(&user) })).into_response())
}

// ── Resources ────────────────────────────────────────────────────────────────

pub async fn get_root(State(fm): AppState, Extension(user): Extension<User>) -> Result<Response> {
    let fs = fm.fs_for(&user)?;
    let path = authorize(fs.as_ref(), &user, "/")?;
    render(fs.as_ref(), &path)
}

pub async fn get_resource(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> Result<Response> {
    let fs = fm.fs_for(&user)?;
    let path = authorize(fs.as_ref(), &user, &path)?;
    render(fs.as_ref(), &path)
}

/// Create or overwrite a file with the request body.
pub async fn put_resource(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let fs = fm.fs_for(&user)?;
    let path = authorize(fs.as_ref(), &user, &path)?;

    let status = match fs.stat(&path) {
        Ok(entry) if entry.is_dir => {
            return Err(Error::BadRequest(format!("{path} is a directory")));
        }
        Ok(_) if !user.permissions.allow_edit => return Err(Error::Forbidden),
        Ok(_) => StatusCode::NO_CONTENT,
        Err(_) if !user.permissions.allow_new => return Err(Error::Forbidden),
        Err(_) => StatusCode::CREATED,
    };

    fs.write(&path, &body)?;
    info!(user = %user.username, %path, bytes = body.len(), "wrote file");
    fm.after_mutation().await?;
    Ok(status.into_response())
}

/// Create a directory (path ends in `/`) or a new file that must not exist.
pub async fn post_resource(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Response> {
    if !user.permissions.allow_new {
        return Err(Error::Forbidden);
    }
    let is_dir = path.ends_with('/');
    let fs = fm.fs_for(&user)?;
    let path = authorize(fs.as_ref(), &user, &path)?;
    if fs.stat(&path).is_ok() {
        return Err(Error::DuplicateKey(format!("path {path}")));
    }

    if is_dir {
        fs.mkdir(&path)?;
        info!(user = %user.username, %path, "created directory");
    } else {
        fs.write(&path, &body)?;
        info!(user = %user.username, %path, bytes = body.len(), "created file");
    }
    fm.after_mutation().await?;
    Ok(StatusCode::CREATED.into_response())
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub to: String,
}

pub async fn patch_resource(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Response> {
    if !user.permissions.allow_edit {
        return Err(Error::Forbidden);
    }
    let fs = fm.fs_for(&user)?;
    let from = authorize(fs.as_ref(), &user, &path)?;
    let to = authorize(fs.as_ref(), &user, &req.to)?;
    fs.rename(&from, &to)?;
    info!(user = %user.username, %from, %to, "renamed");
    fm.after_mutation().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_resource(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(path): Path<String>,
) -> Result<Response> {
    if !user.permissions.allow_edit {
        return Err(Error::Forbidden);
    }
    let fs = fm.fs_for(&user)?;
    let path = authorize(fs.as_ref(), &user, &path)?;
    fs.delete(&path)?;
    info!(user = %user.username, %path, "deleted");
    fm.after_mutation().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── Users ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub admin: bool,
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub admin: Option<bool>,
    pub permissions: Option<Permissions>,
}

/// Reject bad rules, and make sure the scope stays inside the file root.
/// Nothing is created on disk here.
fn check_permissions(fm: &FileManager, permissions: &Permissions) -> Result<()> {
    permissions.validate().map_err(Error::BadRequest)?;
    resolve_within(fm.fs_provider().root(), &permissions.scope)?;
    Ok(())
}

/// Create a stored user's scope directory. The user record is already
/// committed, so a failure here is only logged; the directory is created
/// again on the user's first request.
fn provision_scope(fm: &FileManager, user: &User) {
    if let Err(e) = fm.fs_for(user) {
        warn!(
            username = %user.username,
            scope = %user.permissions.scope,
            error = %e,
            "could not create user scope"
        );
    }
}

pub async fn list_users(
    State(fm): AppState,
    Extension(user): Extension<User>,
) -> Result<Response> {
    require_admin(&user)?;
    let users: Vec<UserView> = fm.store().users.list()?.iter().map(UserView::from).collect();
    Ok(Json(json!({ "users": users })).into_response())
}

pub async fn get_user(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(id): Path<u64>,
) -> Result<Response> {
    if !user.admin && user.id != id {
        return Err(Error::Forbidden);
    }
    let found = fm
        .store()
        .users
        .get(id)?
        .ok_or_else(|| Error::NotFound(format!("user {id}")))?;
    Ok(Json(UserView::from(&found)).into_response())
}

pub async fn create_user(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Response> {
    require_admin(&user)?;
    let username = req.username.trim();
    if username.is_empty() {
        return Err(Error::BadRequest("username must not be empty".into()));
    }

    let permissions = req
        .permissions
        .unwrap_or_else(|| fm.default_permissions().clone());
    check_permissions(&fm, &permissions)?;

    let password_hash = if req.password.is_empty() {
        String::new()
    } else {
        auth::hash_password(&req.password)?
    };

    let created = fm.store().users.create(User {
        id: 0,
        username: username.to_owned(),
        password_hash,
        admin: req.admin,
        permissions,
    })?;

    provision_scope(&fm, &created);
    info!(by = %user.username, id = created.id, username = %created.username, "user created");
    Ok((StatusCode::CREATED, Json(UserView::from(&created))).into_response())
}

pub async fn update_user(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(id): Path<u64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Response> {
    require_admin(&user)?;
    let mut target = fm
        .store()
        .users
        .get(id)?
        .ok_or_else(|| Error::NotFound(format!("user {id}")))?;

    if let Some(username) = req.username {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::BadRequest("username must not be empty".into()));
        }
        target.username = username.to_owned();
    }
    if let Some(password) = req.password {
        target.password_hash = auth::hash_password(&password)?;
    }
    if let Some(admin) = req.admin {
        target.admin = admin;
    }
    if let Some(permissions) = req.permissions {
        check_permissions(&fm, &permissions)?;
        target.permissions = permissions;
    }

    fm.store().users.update(&target)?;
    provision_scope(&fm, &target);
    info!(by = %user.username, id, "user updated");
    Ok(Json(UserView::from(&target)).into_response())
}

pub async fn delete_user(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(id): Path<u64>,
) -> Result<Response> {
    require_admin(&user)?;
    if !fm.store().users.delete(id)? {
        return Err(Error::NotFound(format!("user {id}")));
    }
    info!(by = %user.username, id, "user deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── Shares ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub path: String,
    /// Lifetime such as `24h` or `7d`. Omitted means the link never expires.
    pub expires: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    pub path: Option<String>,
}

pub async fn create_share(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Response> {
    let fs = fm.fs_for(&user)?;
    let scoped = authorize(fs.as_ref(), &user, &req.path)?;
    fs.stat(&scoped)?;
    let path = relative_to(fm.fs_provider().root(), &fs.resolve(&scoped)?)?;

    let now = now();
    let expires_at = req
        .expires
        .as_deref()
        .map(|s| {
            humantime::parse_duration(s)
                .map(|d| now + d.as_secs() as i64)
                .map_err(|e| Error::BadRequest(format!("invalid expiry {s:?}: {e}")))
        })
        .transpose()?;

    let share = Share {
        token: generate_token(),
        path,
        owner: user.id,
        created_at: now,
        expires_at,
    };
    fm.store().shares.create(&share)?;

    info!(user = %user.username, token = %share.token, path = %share.path, "share created");
    Ok((StatusCode::CREATED, Json(share)).into_response())
}

/// Shares for one path (`?path=`), or every share the caller owns.
pub async fn list_shares(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Query(query): Query<ShareQuery>,
) -> Result<Response> {
    let shares = match query.path {
        Some(p) => {
            let fs = fm.fs_for(&user)?;
            let scoped = authorize(fs.as_ref(), &user, &p)?;
            let path = relative_to(fm.fs_provider().root(), &fs.resolve(&scoped)?)?;
            fm.store()
                .shares
                .list_by_path(&path)?
                .into_iter()
                .filter(|s| user.admin || s.owner == user.id)
                .collect()
        }
        None => fm.store().shares.list_by_owner(user.id)?,
    };
    Ok(Json(json!({ "shares": shares })).into_response())
}

pub async fn delete_share(
    State(fm): AppState,
    Extension(user): Extension<User>,
    Path(token): Path<String>,
) -> Result<Response> {
    let share = fm
        .store()
        .shares
        .get_by_token(&token)?
        .ok_or_else(|| Error::NotFound(format!("share {token}")))?;
    if !user.admin && share.owner != user.id {
        return Err(Error::Forbidden);
    }
    fm.store().shares.delete(&token)?;
    info!(user = %user.username, %token, "share revoked");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Unauthenticated access to a shared file or directory.
pub async fn public_share(State(fm): AppState, Path(token): Path<String>) -> Result<Response> {
    let share = fm
        .store()
        .shares
        .get_by_token(&token)?
        .ok_or_else(|| Error::NotFound(format!("share {token}")))?;
    let fs = fm.fs_provider().for_scope(".")?;
    render(fs.as_ref(), &share.path)
}
