use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::{self, AuthMethod};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, FsProvider};
use crate::policy::Permissions;
use crate::recaptcha::Recaptcha;
use crate::staticgen::{BuildHook, StaticGen};
use crate::store::{db::now, Settings, Store, User};

/// Version of the persisted record layout this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

const INITIAL_ADMIN: &str = "admin";

/// The serving object: everything a request handler needs.
///
/// Built by [`crate::server::assemble`]; shared as `Arc<FileManager>` once
/// serving starts, after which it is read-only.
pub struct FileManager {
    auth: AuthMethod,
    recaptcha: Recaptcha,
    store: Store,
    default_permissions: Permissions,
    fs: Arc<dyn FsProvider>,
    base_url: String,
    prefix_url: String,
    signing_key: Vec<u8>,
    hook: Option<BuildHook>,
    /// Set by `setup`; URL setters are rejected afterwards.
    ready: bool,
}

impl FileManager {
    pub fn new(
        auth: AuthMethod,
        recaptcha: Recaptcha,
        store: Store,
        default_permissions: Permissions,
        fs: Arc<dyn FsProvider>,
    ) -> Self {
        Self {
            auth,
            recaptcha,
            store,
            default_permissions,
            fs,
            base_url: String::new(),
            prefix_url: String::new(),
            signing_key: Vec::new(),
            hook: None,
            ready: false,
        }
    }

    pub fn set_base_url(&mut self, url: &str) -> Result<()> {
        self.ensure_configurable("base URL")?;
        self.base_url = normalize_url(url);
        Ok(())
    }

    pub fn set_prefix_url(&mut self, url: &str) -> Result<()> {
        self.ensure_configurable("prefix URL")?;
        self.prefix_url = normalize_url(url);
        Ok(())
    }

    fn ensure_configurable(&self, what: &str) -> Result<()> {
        if self.ready || self.hook.is_some() {
            return Err(Error::Setup(format!(
                "{what} must be set before setup and plugin attachment"
            )));
        }
        Ok(())
    }

    /// Make sure persisted state exists and matches this build.
    ///
    /// On first run this creates the settings record (and its signing key)
    /// and, with `default` auth, an `admin` account with a random password.
    pub fn setup(&mut self) -> Result<()> {
        let existing = self
            .store
            .config
            .get()
            .map_err(|e| Error::Setup(format!("read settings: {e}")))?;

        let mut settings = match existing {
            Some(s) if s.schema_version != SCHEMA_VERSION => {
                return Err(Error::Setup(format!(
                    "database schema v{} is not supported (expected v{SCHEMA_VERSION})",
                    s.schema_version
                )));
            }
            Some(s) => s,
            None => {
                use rand::Rng;
                let key: [u8; 32] = rand::thread_rng().gen();
                info!("initializing new database");
                Settings {
                    base_url: String::new(),
                    prefix_url: String::new(),
                    signing_key: key.to_vec(),
                    schema_version: SCHEMA_VERSION,
                    created_at: now(),
                }
            }
        };

        settings.base_url = self.base_url.clone();
        settings.prefix_url = self.prefix_url.clone();
        self.store
            .config
            .put(&settings)
            .map_err(|e| Error::Setup(format!("write settings: {e}")))?;
        self.signing_key = settings.signing_key;

        if self.auth == AuthMethod::Default {
            self.ensure_admin()?;
        }

        self.ready = true;
        debug!("setup complete");
        Ok(())
    }

    fn ensure_admin(&self) -> Result<()> {
        let empty = self
            .store
            .users
            .is_empty()
            .map_err(|e| Error::Setup(format!("read users: {e}")))?;
        if !empty {
            return Ok(());
        }

        let password = {
            use rand::Rng;
            let bytes: [u8; 8] = rand::thread_rng().gen();
            hex::encode(bytes)
        };
        let admin = User {
            id: 0,
            username: INITIAL_ADMIN.into(),
            password_hash: auth::hash_password(&password)?,
            admin: true,
            permissions: self.default_permissions.clone(),
        };
        self.store
            .users
            .create(admin)
            .map_err(|e| Error::Setup(format!("create initial admin: {e}")))?;

        info!(
            username = INITIAL_ADMIN,
            %password,
            "created initial admin user; change this password after logging in"
        );
        Ok(())
    }

    /// Attach a site generator to run after every content change.
    pub fn attach(&mut self, generator: Arc<dyn StaticGen>) -> Result<()> {
        if let Some(existing) = &self.hook {
            return Err(Error::Setup(format!(
                "site generator {} is already attached",
                existing.generator().name()
            )));
        }

        let root = generator.root();
        if !root.is_dir() {
            return Err(Error::Setup(format!(
                "{} root {} is not a directory",
                generator.name(),
                root.display()
            )));
        }
        if !generator.public().starts_with(root) {
            return Err(Error::Setup(format!(
                "{} public dir {} is outside its root",
                generator.name(),
                generator.public().display()
            )));
        }

        info!(
            generator = generator.name(),
            root = %root.display(),
            "attached site generator"
        );
        self.hook = Some(BuildHook::new(generator));
        Ok(())
    }

    /// Rebuild the site after a committed content change. The change itself
    /// is not rolled back if the rebuild fails.
    pub async fn after_mutation(&self) -> Result<()> {
        match &self.hook {
            Some(hook) => hook.run().await,
            None => Ok(()),
        }
    }

    /// File handle scoped to `user`.
    pub fn fs_for(&self, user: &User) -> Result<Box<dyn FileSystem>> {
        self.fs.for_scope(&user.permissions.scope)
    }

    /// The identity used when authentication is off.
    pub fn default_user(&self) -> User {
        User {
            id: 0,
            username: "default".into(),
            password_hash: String::new(),
            admin: true,
            permissions: self.default_permissions.clone(),
        }
    }

    pub fn auth(&self) -> &AuthMethod {
        &self.auth
    }

    pub fn recaptcha(&self) -> &Recaptcha {
        &self.recaptcha
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fs_provider(&self) -> &dyn FsProvider {
        self.fs.as_ref()
    }

    pub fn default_permissions(&self) -> &Permissions {
        &self.default_permissions
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn prefix_url(&self) -> &str {
        &self.prefix_url
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    pub fn build_hook(&self) -> Option<&BuildHook> {
        self.hook.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

/// `files/` -> `/files`, `/` -> ``. Empty stays empty.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecaptchaSettings;
    use crate::fs::LocalFsProvider;
    use crate::staticgen::{Hugo, Jekyll};
    use tempfile::tempdir;

    fn manager(auth: AuthMethod, dir: &std::path::Path) -> FileManager {
        let store = Store::open(&dir.join("test.db")).unwrap();
        let fs = LocalFsProvider::new(dir).unwrap();
        FileManager::new(
            auth,
            Recaptcha::new(RecaptchaSettings::default()),
            store,
            Permissions::default(),
            Arc::new(fs),
        )
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("/"), "");
        assert_eq!(normalize_url("files"), "/files");
        assert_eq!(normalize_url("/files/"), "/files");
        assert_eq!(normalize_url(" /a/b// "), "/a/b");
    }

    #[test]
    fn setup_creates_settings_and_admin() {
        let dir = tempdir().unwrap();
        let mut fm = manager(AuthMethod::Default, dir.path());
        fm.set_base_url("files/").unwrap();
        fm.setup().unwrap();

        let settings = fm.store().config.get().unwrap().unwrap();
        assert_eq!(settings.base_url, "/files");
        assert_eq!(settings.schema_version, SCHEMA_VERSION);
        assert_eq!(settings.signing_key.len(), 32);
        assert_eq!(fm.signing_key(), settings.signing_key.as_slice());

        let users = fm.store().users.list().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "admin");
        assert!(users[0].admin);
    }

    #[test]
    fn setup_keeps_signing_key_across_restarts() {
        let dir = tempdir().unwrap();
        let first_key = {
            let mut fm = manager(AuthMethod::Default, dir.path());
            fm.setup().unwrap();
            fm.signing_key().to_vec()
        };
        let mut fm = manager(AuthMethod::Default, dir.path());
        fm.set_base_url("/moved").unwrap();
        fm.setup().unwrap();
        assert_eq!(fm.signing_key(), first_key.as_slice());
        assert_eq!(fm.store().users.list().unwrap().len(), 1);
        assert_eq!(fm.store().config.get().unwrap().unwrap().base_url, "/moved");
    }

    #[test]
    fn setup_skips_admin_for_proxy_auth() {
        let dir = tempdir().unwrap();
        let mut fm = manager(
            AuthMethod::Proxy {
                header: "X-User".into(),
            },
            dir.path(),
        );
        fm.setup().unwrap();
        assert!(fm.store().users.is_empty().unwrap());
    }

    #[test]
    fn setup_rejects_unknown_schema() {
        let dir = tempdir().unwrap();
        let mut fm = manager(AuthMethod::None, dir.path());
        fm.store()
            .config
            .put(&Settings {
                base_url: String::new(),
                prefix_url: String::new(),
                signing_key: vec![1; 32],
                schema_version: SCHEMA_VERSION + 1,
                created_at: 0,
            })
            .unwrap();
        assert!(matches!(fm.setup(), Err(Error::Setup(_))));
    }

    #[test]
    fn urls_frozen_after_setup() {
        let dir = tempdir().unwrap();
        let mut fm = manager(AuthMethod::None, dir.path());
        fm.set_prefix_url("/proxy").unwrap();
        fm.setup().unwrap();
        assert!(matches!(fm.set_base_url("/late"), Err(Error::Setup(_))));
        assert!(matches!(fm.set_prefix_url("/late"), Err(Error::Setup(_))));
        assert_eq!(fm.prefix_url(), "/proxy");
    }

    #[test]
    fn attach_validates_root_and_rejects_second_plugin() {
        let dir = tempdir().unwrap();
        let site = dir.path().join("site");
        let mut fm = manager(AuthMethod::None, dir.path());

        let err = fm.attach(Arc::new(Hugo::new(&site))).unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
        assert!(fm.build_hook().is_none());

        std::fs::create_dir(&site).unwrap();
        fm.attach(Arc::new(Hugo::new(&site))).unwrap();
        assert_eq!(fm.build_hook().unwrap().generator().name(), "hugo");

        assert!(matches!(
            fm.attach(Arc::new(Jekyll::new(&site))),
            Err(Error::Setup(_))
        ));
        assert!(matches!(fm.set_base_url("/x"), Err(Error::Setup(_))));
    }

    #[test]
    fn attach_rejects_public_outside_root() {
        let dir = tempdir().unwrap();
        let mut fm = manager(AuthMethod::None, dir.path());
        let mut hugo = Hugo::new(dir.path());
        hugo.public = std::path::PathBuf::from("/tmp/elsewhere");
        assert!(matches!(fm.attach(Arc::new(hugo)), Err(Error::Setup(_))));
    }

    #[tokio::test]
    async fn after_mutation_without_hook_is_noop() {
        let dir = tempdir().unwrap();
        let fm = manager(AuthMethod::None, dir.path());
        fm.after_mutation().await.unwrap();
    }

    #[test]
    fn default_user_carries_default_policy() {
        let dir = tempdir().unwrap();
        let fm = manager(AuthMethod::None, dir.path());
        let u = fm.default_user();
        assert_eq!(&u.permissions, fm.default_permissions());
        let handle = fm.fs_for(&u).unwrap();
        assert_eq!(handle.root(), fm.fs_provider().for_scope(".").unwrap().root());
    }
}
