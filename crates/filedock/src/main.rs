mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use filedock_server::{auth, dirs, store::Store, store::User, ServerConfig};
use tracing::{error, info};

use crate::logging::LogSink;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "filedock", about = "filedock: a self-hosted web file manager", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Manage user accounts directly in the database (server stopped)
    Users {
        #[command(flatten)]
        source: ConfigSource,
        #[command(subcommand)]
        command: UsersCommand,
    },
}

/// Where to find the configuration and the database.
#[derive(Args)]
struct ConfigSource {
    /// JSON config file ($FILEDOCK_CONFIG)
    #[arg(short, long, env = "FILEDOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Database file ($FILEDOCK_DATABASE)
    #[arg(long, env = "FILEDOCK_DATABASE")]
    database: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    source: ConfigSource,
    /// Log sink: stdout, stderr, "" to discard, or a file path ($FILEDOCK_LOGGER)
    #[arg(long, env = "FILEDOCK_LOGGER")]
    logger: Option<String>,
    /// Address to bind ($FILEDOCK_ADDRESS)
    #[arg(short, long, env = "FILEDOCK_ADDRESS")]
    address: Option<String>,
    /// Port to listen on ($FILEDOCK_PORT)
    #[arg(short, long, env = "FILEDOCK_PORT")]
    port: Option<u16>,
    /// URL path the server is mounted under ($FILEDOCK_BASE_URL)
    #[arg(short = 'b', long, env = "FILEDOCK_BASE_URL")]
    base_url: Option<String>,
    /// URL prefix added by a reverse proxy ($FILEDOCK_PREFIX_URL)
    #[arg(long, env = "FILEDOCK_PREFIX_URL")]
    prefix_url: Option<String>,
    /// Authentication method: none, default or proxy ($FILEDOCK_AUTH_METHOD)
    #[arg(long, env = "FILEDOCK_AUTH_METHOD")]
    auth_method: Option<String>,
    /// Identity header trusted by proxy auth ($FILEDOCK_AUTH_HEADER)
    #[arg(long, env = "FILEDOCK_AUTH_HEADER")]
    auth_header: Option<String>,
    /// reCAPTCHA host ($FILEDOCK_RECAPTCHA_HOST)
    #[arg(long, env = "FILEDOCK_RECAPTCHA_HOST")]
    recaptcha_host: Option<String>,
    /// reCAPTCHA site key ($FILEDOCK_RECAPTCHA_KEY)
    #[arg(long, env = "FILEDOCK_RECAPTCHA_KEY")]
    recaptcha_key: Option<String>,
    /// reCAPTCHA secret ($FILEDOCK_RECAPTCHA_SECRET)
    #[arg(long, env = "FILEDOCK_RECAPTCHA_SECRET", hide_env_values = true)]
    recaptcha_secret: Option<String>,
    /// Directory served to users ($FILEDOCK_ROOT)
    #[arg(short, long, env = "FILEDOCK_ROOT")]
    root: Option<PathBuf>,
    /// Default locale for new users ($FILEDOCK_LOCALE)
    #[arg(long, env = "FILEDOCK_LOCALE")]
    locale: Option<String>,
    /// Default view mode for new users: list or mosaic ($FILEDOCK_VIEW_MODE)
    #[arg(long, env = "FILEDOCK_VIEW_MODE")]
    view_mode: Option<String>,
    /// Static site generator to rebuild on changes: hugo or jekyll ($FILEDOCK_STATIC_GEN)
    #[arg(long, env = "FILEDOCK_STATIC_GEN")]
    static_gen: Option<String>,
    /// Site root for the static generator ($FILEDOCK_SCOPE)
    #[arg(short, long, env = "FILEDOCK_SCOPE")]
    scope: Option<PathBuf>,
}

#[derive(Subcommand)]
enum UsersCommand {
    /// Create a user with the default permissions
    Add {
        username: String,
        password: String,
        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// List all users
    List,
    /// Remove a user by name
    Rm { username: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => cmd_serve(args).await,
        Commands::Users { source, command } => cmd_users(&source, command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("filedock: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ── Configuration ─────────────────────────────────────────────────────────────

fn load_config(source: &ConfigSource) -> Result<ServerConfig> {
    let mut cfg = match &source.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(db) = &source.database {
        cfg.database = Some(db.clone());
    }
    Ok(cfg)
}

/// Flags and env vars override the config file.
fn apply_overrides(cfg: &mut ServerConfig, args: ServeArgs) {
    fn set<T>(slot: &mut T, value: Option<T>) {
        if let Some(v) = value {
            *slot = v;
        }
    }

    set(&mut cfg.logger, args.logger);
    set(&mut cfg.address, args.address);
    set(&mut cfg.port, args.port);
    set(&mut cfg.base_url, args.base_url);
    set(&mut cfg.prefix_url, args.prefix_url);
    set(&mut cfg.auth.method, args.auth_method);
    set(&mut cfg.auth.header, args.auth_header);
    set(&mut cfg.recaptcha.host, args.recaptcha_host);
    set(&mut cfg.recaptcha.key, args.recaptcha_key);
    set(&mut cfg.recaptcha.secret, args.recaptcha_secret);
    set(&mut cfg.defaults.scope, args.root);
    set(&mut cfg.defaults.locale, args.locale);
    set(&mut cfg.defaults.view_mode, args.view_mode);
    set(&mut cfg.static_gen, args.static_gen);
    set(&mut cfg.scope, args.scope);
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    let mut cfg = load_config(&args.source)?;
    apply_overrides(&mut cfg, args);
    logging::init(&LogSink::parse(&cfg.logger))?;

    if let Err(e) = filedock_server::run(cfg).await {
        error!(error = %e, fatal = e.is_fatal(), "filedock stopped");
        return Err(e.into());
    }
    Ok(())
}

fn open_store(cfg: &ServerConfig) -> Result<Store> {
    let path = dirs::database_path(cfg.database.as_deref())?;
    Store::open(&path).with_context(|| format!("open database {}", path.display()))
}

fn cmd_users(source: &ConfigSource, command: UsersCommand) -> Result<()> {
    logging::init(&LogSink::Stderr)?;
    let cfg = load_config(source)?;
    let store = open_store(&cfg)?;

    match command {
        UsersCommand::Add {
            username,
            password,
            admin,
        } => {
            if username.trim().is_empty() {
                bail!("username must not be empty");
            }
            let user = store.users.create(User {
                id: 0,
                username: username.trim().to_owned(),
                password_hash: auth::hash_password(&password)?,
                admin,
                permissions: cfg.defaults.permissions()?,
            })?;
            info!(id = user.id, username = %user.username, admin, "user created");
            println!("✓ created {} (id {})", user.username, user.id);
        }
        UsersCommand::List => {
            let users = store.users.list()?;
            if users.is_empty() {
                println!("(no users)");
            }
            for u in &users {
                let role = if u.admin { "admin" } else { "user" };
                println!("  {:>4}  {}  {}  scope={}", u.id, u.username, role, u.permissions.scope);
            }
        }
        UsersCommand::Rm { username } => {
            let user = store
                .users
                .get_by_username(&username)?
                .with_context(|| format!("no user named {username}"))?;
            store.users.delete(user.id)?;
            info!(id = user.id, %username, "user removed");
            println!("✓ removed {username}");
        }
    }

    store.close();
    Ok(())
}
