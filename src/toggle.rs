use crate::config::ToggleConfig;
use crate::exec;
use std::time::Duration;

/// A user's privilege tier as reported by the toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Standard,
    Admin,
}

/// Errors from the elevation toggle boundary.
///
/// A `Query` failure means the tier is unknown; callers must treat it as
/// "do nothing", never as `Standard`.
#[derive(Debug)]
pub enum ToggleError {
    Query { user: String, reason: String },
    Revoke { user: String, reason: String },
    Grant { user: String, reason: String },
}

impl std::fmt::Display for ToggleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToggleError::Query { user, reason } => {
                write!(f, "cannot determine tier for {user}: {reason}")
            }
            ToggleError::Revoke { user, reason } => {
                write!(f, "failed to revoke {user}: {reason}")
            }
            ToggleError::Grant { user, reason } => {
                write!(f, "failed to grant {user}: {reason}")
            }
        }
    }
}

impl std::error::Error for ToggleError {}

/// Drives the external privilege-toggle command.
///
/// The toggle itself is a trusted collaborator; this adapter only builds
/// argument vectors, enforces the command timeout, and maps results onto
/// the tier/revoke/grant contract.
pub struct CommandToggle {
    command: String,
    tier_args: Vec<String>,
    grant_args: Vec<String>,
    revoke_args: Vec<String>,
    limit: Duration,
}

/// Build an argument vector, replacing `{user}` placeholders.
fn build_args(template: &[String], user: &str) -> Vec<String> {
    template.iter().map(|arg| arg.replace("{user}", user)).collect()
}

impl CommandToggle {
    pub fn new(config: &ToggleConfig, limit: Duration) -> Self {
        Self {
            command: config.command.clone(),
            tier_args: config.tier_args.clone(),
            grant_args: config.grant_args.clone(),
            revoke_args: config.revoke_args.clone(),
            limit,
        }
    }

    /// Query the user's current tier.
    ///
    /// The membership check prints `yes ...` or `no ...` on stdout
    /// (the `dseditgroup -o checkmember` contract). Anything else (spawn
    /// failure, timeout, unexpected output) is a query failure, because a
    /// broken check must not read as "standard" and cancel a pending
    /// revocation.
    pub async fn tier(&self, user: &str) -> Result<Tier, ToggleError> {
        let args = build_args(&self.tier_args, user);
        let out = exec::run(&self.command, &args, self.limit)
            .await
            .map_err(|e| ToggleError::Query {
                user: user.to_string(),
                reason: e.to_string(),
            })?;

        let verdict = out.stdout.trim_start().to_ascii_lowercase();
        if verdict.starts_with("yes") {
            Ok(Tier::Admin)
        } else if verdict.starts_with("no") {
            Ok(Tier::Standard)
        } else {
            Err(ToggleError::Query {
                user: user.to_string(),
                reason: format!(
                    "unexpected membership output {:?} (exit {:?})",
                    out.stdout.trim(),
                    out.exit_code
                ),
            })
        }
    }

    /// Revoke the user's admin tier. Exit code 0 is success, nothing else
    /// is inspected. Idempotent at the collaborator: revoking an already
    /// standard user succeeds trivially.
    pub async fn revoke(&self, user: &str) -> Result<(), ToggleError> {
        let args = build_args(&self.revoke_args, user);
        let out = exec::run(&self.command, &args, self.limit)
            .await
            .map_err(|e| ToggleError::Revoke {
                user: user.to_string(),
                reason: e.to_string(),
            })?;

        if out.success() {
            Ok(())
        } else {
            Err(ToggleError::Revoke {
                user: user.to_string(),
                reason: format!("exit code {:?}", out.exit_code),
            })
        }
    }

    /// Grant the user admin tier. Same exit-code contract as revoke. Not
    /// called by the monitor; exposed for operator passthrough.
    pub async fn grant(&self, user: &str) -> Result<(), ToggleError> {
        let args = build_args(&self.grant_args, user);
        let out = exec::run(&self.command, &args, self.limit)
            .await
            .map_err(|e| ToggleError::Grant {
                user: user.to_string(),
                reason: e.to_string(),
            })?;

        if out.success() {
            Ok(())
        } else {
            Err(ToggleError::Grant {
                user: user.to_string(),
                reason: format!("exit code {:?}", out.exit_code),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_toggle(tier: &str, grant: &str, revoke: &str) -> CommandToggle {
        let config = ToggleConfig {
            command: "sh".to_string(),
            tier_args: vec!["-c".to_string(), tier.to_string()],
            grant_args: vec!["-c".to_string(), grant.to_string()],
            revoke_args: vec!["-c".to_string(), revoke.to_string()],
        };
        CommandToggle::new(&config, Duration::from_secs(5))
    }

    #[test]
    fn build_args_replaces_user_placeholder() {
        let template = vec![
            "-o".to_string(),
            "checkmember".to_string(),
            "-m".to_string(),
            "{user}".to_string(),
            "admin".to_string(),
        ];
        let args = build_args(&template, "alice");
        assert_eq!(args, vec!["-o", "checkmember", "-m", "alice", "admin"]);
    }

    #[test]
    fn build_args_replaces_every_occurrence() {
        let template = vec![
            "{user}".to_string(),
            "mid".to_string(),
            "x{user}y".to_string(),
        ];
        assert_eq!(build_args(&template, "bob"), vec!["bob", "mid", "xboby"]);
    }

    #[tokio::test]
    async fn tier_yes_output_is_admin() {
        let toggle = sh_toggle("echo yes alice is a member of admin", "exit 0", "exit 0");
        assert_eq!(toggle.tier("alice").await.unwrap(), Tier::Admin);
    }

    #[tokio::test]
    async fn tier_no_output_is_standard_even_with_nonzero_exit() {
        // dseditgroup exits non-zero on non-members; stdout is authoritative
        let toggle = sh_toggle("echo no alice is NOT a member; exit 64", "exit 0", "exit 0");
        assert_eq!(toggle.tier("alice").await.unwrap(), Tier::Standard);
    }

    #[tokio::test]
    async fn tier_unexpected_output_is_a_query_error() {
        let toggle = sh_toggle("echo membership unclear", "exit 0", "exit 0");
        let err = toggle.tier("alice").await.unwrap_err();
        assert!(matches!(err, ToggleError::Query { .. }));
        assert!(err.to_string().contains("alice"));
    }

    #[tokio::test]
    async fn tier_empty_output_is_a_query_error() {
        let toggle = sh_toggle("true", "exit 0", "exit 0");
        assert!(matches!(
            toggle.tier("alice").await.unwrap_err(),
            ToggleError::Query { .. }
        ));
    }

    #[tokio::test]
    async fn tier_spawn_failure_is_a_query_error() {
        let config = ToggleConfig {
            command: "nonexistent-toggle-xyz".to_string(),
            tier_args: vec![],
            grant_args: vec![],
            revoke_args: vec![],
        };
        let toggle = CommandToggle::new(&config, Duration::from_secs(5));
        assert!(matches!(
            toggle.tier("alice").await.unwrap_err(),
            ToggleError::Query { .. }
        ));
    }

    #[tokio::test]
    async fn tier_timeout_is_a_query_error() {
        let toggle = sh_toggle("sleep 5", "exit 0", "exit 0");
        let toggle = CommandToggle {
            limit: Duration::from_millis(100),
            ..toggle
        };
        let err = toggle.tier("alice").await.unwrap_err();
        assert!(matches!(err, ToggleError::Query { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn revoke_exit_zero_succeeds() {
        let toggle = sh_toggle("echo yes", "exit 0", "exit 0");
        toggle.revoke("alice").await.unwrap();
    }

    #[tokio::test]
    async fn revoke_nonzero_exit_fails_with_code() {
        let toggle = sh_toggle("echo yes", "exit 0", "exit 7");
        let err = toggle.revoke("alice").await.unwrap_err();
        assert!(matches!(err, ToggleError::Revoke { .. }));
        assert!(err.to_string().contains("7"));
    }

    #[tokio::test]
    async fn grant_exit_zero_succeeds() {
        let toggle = sh_toggle("echo no", "exit 0", "exit 0");
        toggle.grant("alice").await.unwrap();
    }

    #[tokio::test]
    async fn grant_nonzero_exit_fails() {
        let toggle = sh_toggle("echo no", "exit 2", "exit 0");
        assert!(matches!(
            toggle.grant("alice").await.unwrap_err(),
            ToggleError::Grant { .. }
        ));
    }
}
