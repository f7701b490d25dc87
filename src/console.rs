use crate::config::ConsoleConfig;
use crate::exec;
use std::time::Duration;

/// The user currently at the graphical console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleUser {
    pub name: String,
    pub uid: u32,
}

/// Resolve the current console user, if there is a watchable one.
///
/// Runs the configured console command and trims its stdout to a name, then
/// resolves the uid through the passwd database. There is no error path: no
/// session, an unknown name, a uid below the threshold, or a failing command
/// all mean "nothing to watch" and the tick idles.
pub async fn resolve(config: &ConsoleConfig, limit: Duration) -> Option<ConsoleUser> {
    let out = match exec::run(&config.command, &config.args, limit).await {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!(error = %e, "console user query failed");
            return None;
        }
    };

    let name = out.stdout.trim();
    if name.is_empty() {
        tracing::debug!("console command reported no user");
        return None;
    }

    let uid = match passwd_uid(name) {
        Some(uid) => uid,
        None => {
            tracing::warn!(name, "console user not found in passwd database");
            return None;
        }
    };

    if uid < config.min_uid {
        tracing::debug!(
            name,
            uid,
            min_uid = config.min_uid,
            "console user below uid threshold"
        );
        return None;
    }

    tracing::debug!(name, uid, "console session resolved");
    Some(ConsoleUser {
        name: name.to_string(),
        uid,
    })
}

/// Look up a user's uid in the passwd database.
fn passwd_uid(name: &str) -> Option<u32> {
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Some(user.uid.as_raw()),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(name, error = %e, "passwd lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str], min_uid: u32) -> ConsoleConfig {
        ConsoleConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            min_uid,
        }
    }

    fn limit() -> Duration {
        Duration::from_secs(5)
    }

    #[tokio::test]
    async fn resolves_a_real_user() {
        // `id -un` prints the invoking user, which always exists in passwd
        let user = resolve(&config("id", &["-un"], 0), limit()).await.unwrap();
        assert!(!user.name.is_empty());
        assert_eq!(user.uid, nix::unistd::getuid().as_raw());
    }

    #[tokio::test]
    async fn uid_threshold_filters_session() {
        let resolved = resolve(&config("id", &["-un"], u32::MAX), limit()).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn unknown_user_is_none() {
        let resolved = resolve(&config("echo", &["no-such-user-abcxyz"], 0), limit()).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn empty_output_is_none() {
        let resolved = resolve(&config("true", &[], 0), limit()).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn failing_command_is_none() {
        let resolved = resolve(&config("nonexistent-console-query", &[], 0), limit()).await;
        assert_eq!(resolved, None);
    }
}
