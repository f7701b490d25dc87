use crate::monitor::TickOutcome;
use crate::store::CountdownRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The JSON snapshot written after every tick.
///
/// This is the observability surface for operators and MDM reporting: the
/// last decision the monitor took and every countdown currently persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub pid: u32,
    pub last_tick: DateTime<Utc>,
    pub outcome: TickOutcome,
    pub countdowns: Vec<CountdownRecord>,
}

/// Errors from reading or writing the status snapshot.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => {
                write!(f, "failed to serialize status: {source}")
            }
            StatusError::Write { path, source } => {
                write!(f, "failed to write status {}: {}", path.display(), source)
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            StatusError::Read { path, source } => {
                write!(f, "failed to read status {}: {}", path.display(), source)
            }
            StatusError::Parse { path, source } => {
                write!(f, "failed to parse status {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
            StatusError::Read { source, .. } => Some(source),
            StatusError::Parse { source, .. } => Some(source),
        }
    }
}

/// Manages the status snapshot lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write the snapshot.
    ///
    /// Writes to a temporary file in the same directory, then renames, so a
    /// reader never sees a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".tierdown.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Read the last snapshot. Ok(None) when none has been written yet.
    pub fn load(&self) -> Result<Option<StatusData>, StatusError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StatusError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StatusError::Parse {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Remove the snapshot (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
