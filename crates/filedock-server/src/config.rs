use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::policy::{Permissions, ViewMode};

/// Startup options. Built once by the binary and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// Log sink: `stdout`, `stderr`, empty to discard, anything else is a file path.
    pub logger: String,
    pub address: String,
    pub port: u16,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "prefixURL")]
    pub prefix_url: String,
    pub auth: AuthSettings,
    pub recaptcha: RecaptchaSettings,
    pub defaults: Defaults,
    /// Database file. `None` resolves to the platform data directory.
    pub database: Option<PathBuf>,
    /// Static generator to attach: `hugo`, `jekyll`, anything else attaches nothing.
    pub static_gen: String,
    /// Root of the static site (source and public output).
    pub scope: PathBuf,
    /// Seconds between expired-share sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            logger: "stdout".into(),
            address: "0.0.0.0".into(),
            port: 8080,
            base_url: String::new(),
            prefix_url: String::new(),
            auth: AuthSettings::default(),
            recaptcha: RecaptchaSettings::default(),
            defaults: Defaults::default(),
            database: None,
            static_gen: String::new(),
            scope: PathBuf::from("."),
            sweep_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub method: String,
    /// Identity header trusted in `proxy` mode.
    pub header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            method: "default".into(),
            header: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecaptchaSettings {
    pub host: String,
    pub key: String,
    pub secret: String,
}

impl Default for RecaptchaSettings {
    fn default() -> Self {
        Self {
            host: "https://www.google.com".into(),
            key: String::new(),
            secret: String::new(),
        }
    }
}

impl RecaptchaSettings {
    pub fn enabled(&self) -> bool {
        !self.key.is_empty() && !self.secret.is_empty()
    }
}

/// Permission defaults for users without an explicit policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Defaults {
    pub allow_commands: bool,
    pub allow_edit: bool,
    pub allow_new: bool,
    pub allow_publish: bool,
    pub commands: Vec<String>,
    pub locale: String,
    /// Root directory for all user files.
    pub scope: PathBuf,
    pub view_mode: String,
}

impl Default for Defaults {
    fn default() -> Self {
        let policy = Permissions::default();
        Self {
            allow_commands: policy.allow_commands,
            allow_edit: policy.allow_edit,
            allow_new: policy.allow_new,
            allow_publish: policy.allow_publish,
            commands: policy.commands,
            locale: policy.locale,
            scope: PathBuf::from("."),
            view_mode: "mosaic".into(),
        }
    }
}

impl Defaults {
    /// Build the default policy. Its scope is the root of the file tree.
    pub fn permissions(&self) -> Result<Permissions> {
        let view_mode = ViewMode::from_str(&self.view_mode).ok_or_else(|| {
            Error::Config(format!(
                "defaults.viewMode must be 'list' or 'mosaic', got {:?}",
                self.view_mode
            ))
        })?;

        Ok(Permissions {
            allow_commands: self.allow_commands,
            allow_edit: self.allow_edit,
            allow_new: self.allow_new,
            allow_publish: self.allow_publish,
            commands: self.commands.clone(),
            rules: Vec::new(),
            locale: self.locale.clone(),
            scope: ".".into(),
            view_mode,
            custom_css: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filedock.json");
        std::fs::write(
            &path,
            r#"{
                "port": 9000,
                "baseURL": "/files",
                "auth": { "method": "proxy", "header": "X-Forwarded-User" },
                "defaults": { "allowEdit": false, "viewMode": "list" },
                "staticGen": "hugo"
            }"#,
        )
        .unwrap();

        let cfg = ServerConfig::from_file(&path).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.address, "0.0.0.0");
        assert_eq!(cfg.base_url, "/files");
        assert_eq!(cfg.auth.method, "proxy");
        assert_eq!(cfg.auth.header, "X-Forwarded-User");
        assert!(!cfg.defaults.allow_edit);
        assert!(cfg.defaults.allow_new);
        assert_eq!(cfg.static_gen, "hugo");
        assert_eq!(cfg.recaptcha.host, "https://www.google.com");
    }

    #[test]
    fn unknown_key_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("filedock.json");
        std::fs::write(&path, r#"{ "prot": 9000 }"#).unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn default_permissions_from_flags() {
        let defaults = Defaults {
            allow_commands: false,
            commands: vec!["git".into()],
            locale: "fr".into(),
            view_mode: "list".into(),
            ..Default::default()
        };
        let p = defaults.permissions().unwrap();
        assert!(!p.allow_commands);
        assert!(p.allow_edit);
        assert_eq!(p.commands, vec!["git".to_string()]);
        assert_eq!(p.locale, "fr");
        assert_eq!(p.view_mode, ViewMode::List);
        assert!(p.rules.is_empty());
        assert!(p.custom_css.is_empty());
    }

    #[test]
    fn bad_view_mode_rejected() {
        let defaults = Defaults {
            view_mode: "grid".into(),
            ..Default::default()
        };
        assert!(matches!(defaults.permissions(), Err(Error::Config(_))));
    }

    #[test]
    fn recaptcha_needs_key_and_secret() {
        let mut r = RecaptchaSettings::default();
        assert!(!r.enabled());
        r.key = "site".into();
        assert!(!r.enabled());
        r.secret = "shh".into();
        assert!(r.enabled());
    }
}
