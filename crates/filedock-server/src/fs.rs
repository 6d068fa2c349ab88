//! Scoped file access.
//!
//! An [`FsProvider`] is bound to the server's file root and hands out one
//! [`FileSystem`] per user or share scope. Every path a handle receives is
//! resolved against its root; anything that would land outside it, through
//! `..` or through a symlink, fails with [`Error::PathEscape`].

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Unix seconds, when the platform reports it.
    pub modified: Option<i64>,
}

/// File operations rooted at one directory.
pub trait FileSystem: Send + Sync {
    fn root(&self) -> &Path;
    /// Map `path` to an absolute location inside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf>;
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    /// Create or truncate a file. Missing parent directories are created.
    fn write(&self, path: &str, contents: &[u8]) -> Result<()>;
    fn list(&self, path: &str) -> Result<Vec<Entry>>;
    /// Remove a file or a whole directory tree.
    fn delete(&self, path: &str) -> Result<()>;
    fn mkdir(&self, path: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn stat(&self, path: &str) -> Result<Entry>;
}

/// Factory for scoped handles. Must be callable from many requests at once.
pub trait FsProvider: Send + Sync {
    /// The directory every scope lives under.
    fn root(&self) -> &Path;
    fn for_scope(&self, scope: &str) -> Result<Box<dyn FileSystem>>;
}

/// Provider over the local disk.
#[derive(Debug, Clone)]
pub struct LocalFsProvider {
    root: PathBuf,
}

impl LocalFsProvider {
    /// The root must exist; it is canonicalized once here.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("file root {} is not usable: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "file root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }
}

impl FsProvider for LocalFsProvider {
    fn root(&self) -> &Path {
        &self.root
    }

    fn for_scope(&self, scope: &str) -> Result<Box<dyn FileSystem>> {
        let dir = resolve_within(&self.root, scope)?;
        fs::create_dir_all(&dir)?;
        Ok(Box::new(Dir { root: dir }))
    }
}

/// A directory on the local disk.
#[derive(Debug, Clone)]
pub struct Dir {
    root: PathBuf,
}

impl FileSystem for Dir {
    fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_within(&self.root, path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(Error::BadRequest("cannot write to the scope root".into()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::write(target, contents)?)
    }

    fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let dir = self.resolve(path)?;
        let mut entries = Vec::new();
        for item in fs::read_dir(dir)? {
            let item = item?;
            let meta = item.metadata()?;
            entries.push(entry(item.file_name().to_string_lossy().into_owned(), &meta));
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(Error::BadRequest("cannot delete the scope root".into()));
        }
        if fs::symlink_metadata(&target)?.is_dir() {
            fs::remove_dir_all(target)?;
        } else {
            fs::remove_file(target)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        Ok(fs::create_dir_all(self.resolve(path)?)?)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if src == self.root || dst == self.root {
            return Err(Error::BadRequest("cannot rename the scope root".into()));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::rename(src, dst)?)
    }

    fn stat(&self, path: &str) -> Result<Entry> {
        let target = self.resolve(path)?;
        let meta = fs::metadata(&target)?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(entry(name, &meta))
    }
}

fn entry(name: String, meta: &fs::Metadata) -> Entry {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    Entry {
        name,
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified,
    }
}

/// Resolve `path` against `root` (which must be canonical) and check that
/// the result stays inside it.
///
/// Leading `/` is ignored so that request paths like `/docs/a.md` are
/// relative to the root. `..` is folded lexically and may never climb above
/// the root. The longest existing prefix is then canonicalized so a symlink
/// pointing elsewhere is caught even when the final component does not exist
/// yet.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf> {
    let escape = || Error::PathEscape(PathBuf::from(path));

    let mut joined = root.to_path_buf();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::ParentDir => {
                if joined == root || !joined.pop() {
                    return Err(escape());
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut existing = joined.as_path();
    let mut rest = Vec::new();
    while fs::symlink_metadata(existing).is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_owned());
                existing = parent;
            }
            _ => return Err(escape()),
        }
    }

    let mut resolved = existing.canonicalize()?;
    if !resolved.starts_with(root) {
        return Err(escape());
    }
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
