use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Countdown durations below this are clamped up at use.
pub const TIMEOUT_FLOOR_SECS: u64 = 60;

/// Top-level configuration loaded from tierdown.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatchdogConfig {
    pub monitor: MonitorConfig,
    pub console: ConsoleConfig,
    pub toggle: ToggleConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds an admin grant is allowed to live before revocation.
    pub timeout_seconds: u64,
    /// Cadence of ticks in watch mode; the external scheduler is expected
    /// to use the same interval.
    pub tick_interval_seconds: u64,
    /// Wall-clock cap on any external command invocation.
    pub command_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Command that prints the console user's name on stdout.
    pub command: String,
    pub args: Vec<String>,
    /// Console users with a uid below this are not watchable sessions.
    pub min_uid: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToggleConfig {
    /// The privilege-toggle binary.
    pub command: String,
    /// Argument vectors; `{user}` is substituted at call time.
    pub tier_args: Vec<String>,
    pub grant_args: Vec<String>,
    pub revoke_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: all defaults apply, which is the
    /// common case on a freshly enrolled machine.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Countdown duration with the floor applied.
    pub fn effective_timeout_secs(&self) -> u64 {
        let configured = self.monitor.timeout_seconds;
        if configured < TIMEOUT_FLOOR_SECS {
            tracing::warn!(
                configured,
                floor = TIMEOUT_FLOOR_SECS,
                "timeout_seconds below floor, clamping"
            );
            TIMEOUT_FLOOR_SECS
        } else {
            configured
        }
    }

    /// Log sanity warnings about the resolved settings.
    pub fn check(&self) {
        if self.monitor.tick_interval_seconds > self.effective_timeout_secs() {
            tracing::warn!(
                tick_interval = self.monitor.tick_interval_seconds,
                timeout = self.effective_timeout_secs(),
                "tick interval exceeds countdown timeout; revocation will run late"
            );
        }
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor.command_timeout_seconds)
    }
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 7200,
            tick_interval_seconds: 30,
            command_timeout_seconds: 10,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            command: "/usr/bin/stat".to_string(),
            args: vec![
                "-f".to_string(),
                "%Su".to_string(),
                "/dev/console".to_string(),
            ],
            min_uid: 500,
        }
    }
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self {
            command: "/usr/sbin/dseditgroup".to_string(),
            tier_args: vec![
                "-o".to_string(),
                "checkmember".to_string(),
                "-m".to_string(),
                "{user}".to_string(),
                "admin".to_string(),
            ],
            grant_args: vec![
                "-o".to_string(),
                "edit".to_string(),
                "-a".to_string(),
                "{user}".to_string(),
                "-t".to_string(),
                "user".to_string(),
                "admin".to_string(),
            ],
            revoke_args: vec![
                "-o".to_string(),
                "edit".to_string(),
                "-d".to_string(),
                "{user}".to_string(),
                "-t".to_string(),
                "user".to_string(),
                "admin".to_string(),
            ],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".tierdown"),
        }
    }
}
