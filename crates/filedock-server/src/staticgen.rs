use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A static site generator that rebuilds the site after content changes.
pub trait StaticGen: Send + Sync {
    fn name(&self) -> &'static str;
    /// Site source directory; builds run here.
    fn root(&self) -> &Path;
    /// Build output directory.
    fn public(&self) -> &Path;
    fn args(&self) -> &[String];
    /// Wipe `public` before every build.
    fn clean_public(&self) -> bool;

    fn build(&self, args: &[String]) -> Result<()>;
    fn clean(&self, public: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Hugo {
    pub root: PathBuf,
    pub public: PathBuf,
    pub args: Vec<String>,
    pub clean_public: bool,
}

impl Hugo {
    pub fn new(scope: &Path) -> Self {
        Self {
            root: scope.to_owned(),
            public: scope.join("public"),
            args: Vec::new(),
            clean_public: true,
        }
    }
}

impl StaticGen for Hugo {
    fn name(&self) -> &'static str {
        "hugo"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn public(&self) -> &Path {
        &self.public
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn clean_public(&self) -> bool {
        self.clean_public
    }

    fn build(&self, args: &[String]) -> Result<()> {
        run_generator("hugo", &self.root, args)
    }

    fn clean(&self, public: &Path) -> Result<()> {
        clean_dir(&self.root, public)
    }
}

#[derive(Debug, Clone)]
pub struct Jekyll {
    pub root: PathBuf,
    pub public: PathBuf,
    pub args: Vec<String>,
    pub clean_public: bool,
}

impl Jekyll {
    pub fn new(scope: &Path) -> Self {
        Self {
            root: scope.to_owned(),
            public: scope.join("_site"),
            args: vec!["build".into()],
            clean_public: true,
        }
    }
}

impl StaticGen for Jekyll {
    fn name(&self) -> &'static str {
        "jekyll"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn public(&self) -> &Path {
        &self.public
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    fn clean_public(&self) -> bool {
        self.clean_public
    }

    fn build(&self, args: &[String]) -> Result<()> {
        run_generator("jekyll", &self.root, args)
    }

    fn clean(&self, public: &Path) -> Result<()> {
        clean_dir(&self.root, public)
    }
}

/// Pick a generator by its configured name. Unknown names select nothing.
pub fn from_name(name: &str, scope: &Path) -> Option<Arc<dyn StaticGen>> {
    match name {
        "hugo" => Some(Arc::new(Hugo::new(scope))),
        "jekyll" => Some(Arc::new(Jekyll::new(scope))),
        _ => None,
    }
}

fn run_generator(program: &str, root: &Path, args: &[String]) -> Result<()> {
    debug!(program, root = %root.display(), ?args, "running site build");
    let output = Command::new(program)
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| Error::Build(format!("run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Build(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

fn clean_dir(root: &Path, public: &Path) -> Result<()> {
    if public == root || !public.starts_with(root) {
        return Err(Error::Clean(format!(
            "refusing to clean {} outside of {}",
            public.display(),
            root.display()
        )));
    }
    match std::fs::remove_dir_all(public) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Clean(format!("remove {}: {e}", public.display()))),
    }
}

/// An attached generator. Runs are serialized: a trigger that arrives while
/// a build is in flight waits for it, then runs its own clean and build.
#[derive(Clone)]
pub struct BuildHook {
    generator: Arc<dyn StaticGen>,
    gate: Arc<Mutex<()>>,
}

impl BuildHook {
    pub fn new(generator: Arc<dyn StaticGen>) -> Self {
        Self {
            generator,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn generator(&self) -> &dyn StaticGen {
        self.generator.as_ref()
    }

    /// Run one clean (if configured) and build, holding the gate throughout.
    pub fn run_blocking(&self) -> Result<()> {
        let _guard = self.gate.lock();
        let generator = self.generator.as_ref();

        if generator.clean_public() {
            generator.clean(generator.public())?;
        }
        generator.build(generator.args())?;

        info!(generator = generator.name(), "site rebuilt");
        Ok(())
    }

    /// Run on the blocking pool so a slow build never stalls request tasks.
    pub async fn run(&self) -> Result<()> {
        let hook = self.clone();
        let result = tokio::task::spawn_blocking(move || hook.run_blocking())
            .await
            .map_err(|e| Error::Build(format!("build task failed: {e}")))?;
        if let Err(e) = &result {
            warn!(generator = self.generator.name(), error = %e, "site rebuild failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Records every call and tracks how many builds overlap.
    struct Recorder {
        root: PathBuf,
        public: PathBuf,
        args: Vec<String>,
        clean_public: bool,
        events: Mutex<Vec<&'static str>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_build: bool,
    }

    impl Recorder {
        fn new(clean_public: bool) -> Self {
            Self {
                root: PathBuf::from("/site"),
                public: PathBuf::from("/site/public"),
                args: Vec::new(),
                clean_public,
                events: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_build: false,
            }
        }
    }

    impl StaticGen for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn root(&self) -> &Path {
            &self.root
        }
        fn public(&self) -> &Path {
            &self.public
        }
        fn args(&self) -> &[String] {
            &self.args
        }
        fn clean_public(&self) -> bool {
            self.clean_public
        }

        fn build(&self, _args: &[String]) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.events.lock().push("build");
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_build {
                return Err(Error::Build("boom".into()));
            }
            Ok(())
        }

        fn clean(&self, _public: &Path) -> Result<()> {
            self.events.lock().push("clean");
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rapid_triggers_are_serialized() {
        let recorder = Arc::new(Recorder::new(true));
        let hook = BuildHook::new(recorder.clone());

        let (a, b) = tokio::join!(hook.run(), hook.run());
        a.unwrap();
        b.unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec!["clean", "build", "clean", "build"]
        );
        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_clean_when_disabled() {
        let recorder = Arc::new(Recorder::new(false));
        BuildHook::new(recorder.clone()).run().await.unwrap();
        assert_eq!(*recorder.events.lock(), vec!["build"]);
    }

    #[tokio::test]
    async fn build_error_is_returned() {
        let mut recorder = Recorder::new(true);
        recorder.fail_build = true;
        let hook = BuildHook::new(Arc::new(recorder));
        assert!(matches!(hook.run().await, Err(Error::Build(_))));
    }

    #[test]
    fn factory_conventions() {
        let scope = Path::new("/srv/site");

        let hugo = from_name("hugo", scope).unwrap();
        assert_eq!(hugo.name(), "hugo");
        assert_eq!(hugo.public(), Path::new("/srv/site/public"));
        assert!(hugo.args().is_empty());
        assert!(hugo.clean_public());

        let jekyll = from_name("jekyll", scope).unwrap();
        assert_eq!(jekyll.public(), Path::new("/srv/site/_site"));
        assert_eq!(jekyll.args(), ["build".to_string()]);
        assert!(jekyll.clean_public());

        assert!(from_name("gatsby", scope).is_none());
        assert!(from_name("", scope).is_none());
    }

    #[test]
    fn clean_removes_public_only_inside_root() {
        let dir = tempdir().unwrap();
        let hugo = Hugo::new(dir.path());
        std::fs::create_dir_all(hugo.public.join("posts")).unwrap();
        std::fs::write(hugo.public.join("posts/index.html"), b"<p>").unwrap();

        hugo.clean(&hugo.public).unwrap();
        assert!(!hugo.public.exists());
        // Cleaning an already-clean site is fine.
        hugo.clean(&hugo.public).unwrap();

        assert!(matches!(hugo.clean(dir.path()), Err(Error::Clean(_))));
        assert!(matches!(
            hugo.clean(Path::new("/elsewhere")),
            Err(Error::Clean(_))
        ));
    }

    #[test]
    fn build_in_missing_root_fails() {
        let dir = tempdir().unwrap();
        let jekyll = Jekyll::new(&dir.path().join("missing"));
        assert!(matches!(jekyll.build(&jekyll.args), Err(Error::Build(_))));
    }
}
