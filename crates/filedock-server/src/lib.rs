pub mod auth;
pub mod config;
pub mod dirs;
pub mod error;
pub mod fs;
pub mod handlers;
pub mod manager;
pub mod policy;
pub mod recaptcha;
pub mod server;
pub mod staticgen;
pub mod store;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use manager::FileManager;
pub use server::{assemble, router, run};
