use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
    auth::{require_user, AuthMethod},
    config::ServerConfig,
    dirs,
    error::{Error, Result},
    fs::LocalFsProvider,
    handlers::{
        create_share, create_user, delete_resource, delete_share, delete_user, get_resource,
        get_root, get_user, health, list_shares, list_users, login, patch_resource,
        post_resource, public_share, put_resource, settings, update_user,
    },
    recaptcha::Recaptcha,
    staticgen,
    store::Store,
    FileManager,
};

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 1 << 30;

/// Assembly progress. Every step either advances or ends startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Unconfigured,
    Validated,
    StoreOpen,
    Assembled,
    Attached,
    Ready,
}

fn reached(stage: Stage) {
    debug!(?stage, "server assembly");
}

/// Build the serving object from configuration. Nothing listens yet.
pub fn assemble(cfg: &ServerConfig) -> Result<FileManager> {
    reached(Stage::Unconfigured);

    let auth = AuthMethod::validate(&cfg.auth.method, &cfg.auth.header)?;
    reached(Stage::Validated);

    let db_path = dirs::database_path(cfg.database.as_deref())
        .map_err(|e| Error::Config(format!("database path: {e:#}")))?;
    let store = Store::open(&db_path)?;
    info!(database = %db_path.display(), "store opened");
    reached(Stage::StoreOpen);

    let defaults = cfg.defaults.permissions()?;
    let fs = LocalFsProvider::new(&cfg.defaults.scope)?;

    let mut fm = FileManager::new(
        auth,
        Recaptcha::new(cfg.recaptcha.clone()),
        store,
        defaults,
        Arc::new(fs),
    );
    fm.set_base_url(&cfg.base_url)?;
    fm.set_prefix_url(&cfg.prefix_url)?;
    reached(Stage::Assembled);

    fm.setup()?;

    match staticgen::from_name(&cfg.static_gen, &cfg.scope) {
        Some(generator) => {
            fm.attach(generator)?;
            reached(Stage::Attached);
        }
        None if cfg.static_gen.is_empty() => {}
        None => debug!(name = %cfg.static_gen, "unknown static generator, none attached"),
    }

    reached(Stage::Ready);
    Ok(fm)
}

/// HTTP routes, nested under the base URL when one is set.
pub fn router(fm: Arc<FileManager>) -> Router {
    // Public routes (no auth required).
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/settings", get(settings))
        .route("/api/public/share/{token}", get(public_share));

    // Protected routes (identity resolved by the configured auth method).
    let protected = Router::new()
        .route("/api/resources", get(get_root))
        .route(
            "/api/resources/{*path}",
            get(get_resource)
                .put(put_resource)
                .post(post_resource)
                .patch(patch_resource)
                .delete(delete_resource),
        )
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/shares", get(list_shares).post(create_share))
        .route("/api/shares/{token}", delete(delete_share))
        .layer(middleware::from_fn_with_state(fm.clone(), require_user));

    let api = Router::new()
        .merge(public)
        .merge(protected)
        .with_state(fm.clone());

    let app = match fm.base_url() {
        "" => api,
        base => Router::new().nest(base, api),
    };

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Assemble, bind and serve until the process is stopped.
pub async fn run(cfg: ServerConfig) -> Result<()> {
    let fm = assemble(&cfg)?;

    if cfg.sweep_interval_secs > 0 {
        fm.store()
            .clone()
            .spawn_sweep(Duration::from_secs(cfg.sweep_interval_secs));
    }

    let fm = Arc::new(fm);
    let app = router(fm.clone());

    let addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Listen {
            addr: addr.clone(),
            source,
        })?;

    info!(
        addr = %listener.local_addr()?,
        auth = %fm.auth(),
        base_url = fm.base_url(),
        "filedock listening"
    );

    axum::serve(listener, app).await.map_err(Error::Io)
}
