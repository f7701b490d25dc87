use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Manages the `.tierdown/` directory layout.
///
/// All watchdog state lives under a single data directory: the countdown
/// database, the status snapshot, and the single-instance lock file.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

/// Holds the exclusive instance lock for as long as it is alive.
///
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `.tierdown/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the countdown database.
    pub fn db(&self) -> PathBuf {
        self.root.join("tierdown.db")
    }

    /// Path to the status snapshot.
    pub fn status(&self) -> PathBuf {
        self.root.join("tierdown.status")
    }

    /// Path to the single-instance lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Path to the config file (e.g. `.tierdown/tierdown.toml`).
    pub fn config(&self) -> PathBuf {
        self.root.join("tierdown.toml")
    }

    /// Default content written to the config file when initializing a new
    /// data directory.
    const DEFAULT_CONFIG: &'static str = "\
# tierdown configuration
# All values shown are the built-in defaults.

[monitor]
timeout_seconds = 7200
tick_interval_seconds = 30
command_timeout_seconds = 10

[console]
command = \"/usr/bin/stat\"
args = [\"-f\", \"%Su\", \"/dev/console\"]
min_uid = 500

[toggle]
command = \"/usr/sbin/dseditgroup\"
tier_args = [\"-o\", \"checkmember\", \"-m\", \"{user}\", \"admin\"]
grant_args = [\"-o\", \"edit\", \"-a\", \"{user}\", \"-t\", \"user\", \"admin\"]
revoke_args = [\"-o\", \"edit\", \"-d\", \"{user}\", \"-t\", \"user\", \"admin\"]
";

    /// Initialize the directory structure.
    ///
    /// Creates the root directory and writes a commented default config if
    /// one doesn't already exist. Returns Ok(true) if the root was created,
    /// Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;

        let config_path = self.config();
        if !config_path.exists() {
            std::fs::write(&config_path, Self::DEFAULT_CONFIG)?;
        }

        Ok(created)
    }

    /// Try to take the exclusive instance lock.
    ///
    /// Returns Ok(Some(guard)) when acquired, Ok(None) when another process
    /// holds it, and Err for real I/O failures. The root directory must
    /// exist.
    pub fn acquire_lock(&self) -> std::io::Result<Option<LockGuard>> {
        std::fs::create_dir_all(&self.root)?;
        let file = File::create(self.lock())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(LockGuard { _file: file })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
