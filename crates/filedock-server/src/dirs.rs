use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

const DATABASE_FILE: &str = "filedock.db";

/// Resolve the database file path.
///
/// Priority:
/// 1. the configured path, as given
/// 2. `filedock.db` in the platform data dir (`~/.local/share/filedock/`, etc.)
///
/// The parent directory is only created for the platform default; a configured
/// path must already have one.
pub fn database_path(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_owned());
    }

    let dirs = ProjectDirs::from("", "", "filedock")
        .context("could not determine platform data directory")?;

    let dir = dirs.data_dir();
    std::fs::create_dir_all(dir).context("create platform data dir")?;
    Ok(dir.join(DATABASE_FILE))
}
