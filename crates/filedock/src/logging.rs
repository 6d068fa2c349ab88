use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Rotate the log file once it reaches this size.
const MAX_FILE_BYTES: usize = 100 * 1024 * 1024;
/// Rotated files kept next to the live one.
const MAX_BACKUPS: usize = 10;
/// Rotated files older than this are removed at startup.
const MAX_BACKUP_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Where log lines go, as named by the `logger` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stdout,
    Stderr,
    Discard,
    /// Size-rotated file with numbered backups (`<path>.1`, `<path>.2`, ...).
    File(PathBuf),
}

impl LogSink {
    pub fn parse(logger: &str) -> Self {
        match logger {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            "" => Self::Discard,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

pub fn init(sink: &LogSink) -> Result<()> {
    let filter =
        EnvFilter::try_from_env("FILEDOCK_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match sink {
        LogSink::Stdout => builder.init(),
        LogSink::Stderr => builder.with_writer(std::io::stderr).init(),
        LogSink::Discard => builder.with_writer(std::io::sink).init(),
        LogSink::File(path) => {
            let removed = prune_backups(path, SystemTime::now())?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(rotating_file(path)))
                .init();
            debug!(path = %path.display(), removed, "logging to rotating file");
        }
    }
    Ok(())
}

pub fn rotating_file(path: &Path) -> FileRotate<AppendCount> {
    FileRotate::new(
        path,
        AppendCount::new(MAX_BACKUPS),
        ContentLimit::BytesSurpassed(MAX_FILE_BYTES),
        Compression::None,
        #[cfg(unix)]
        None,
    )
}

/// Delete numbered backups of `path` last modified before `now - MAX_BACKUP_AGE`.
pub fn prune_backups(path: &Path, now: SystemTime) -> Result<usize> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(0);
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("read log dir {}", dir.display())),
    };

    let prefix = format!("{name}.");
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(suffix) = file_name.to_str().and_then(|f| f.strip_prefix(&prefix)) else {
            continue;
        };
        if suffix.parse::<usize>().is_err() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let expired = now
            .duration_since(modified)
            .is_ok_and(|age| age > MAX_BACKUP_AGE);
        if expired {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("remove old log {}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
