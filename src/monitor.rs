use crate::config::{ConsoleConfig, WatchdogConfig};
use crate::console;
use crate::store::{self, CountdownRecord};
use crate::toggle::{CommandToggle, Tier};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// What a tick should do, as a pure function of the observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Standard tier, no countdown. Nothing to do.
    Idle,
    /// Standard tier but a countdown exists: someone reverted out-of-band.
    Discard,
    /// Admin tier with no countdown yet.
    Start,
    /// Admin tier, countdown running, deadline not reached.
    Wait { deadline: DateTime<Utc> },
    /// Admin tier and the deadline has passed.
    Revoke { deadline: DateTime<Utc> },
}

/// Decide the tick's action from tier, stored countdown, and current time.
///
/// An existing countdown is never restarted: observing admin again while a
/// record exists only waits, so repeated elevation cannot push the deadline
/// out. A record whose deadline has passed demands revocation no matter how
/// long ago the deadline was.
pub fn decide(tier: Tier, record: Option<&CountdownRecord>, now: DateTime<Utc>) -> Action {
    match (tier, record) {
        (Tier::Standard, None) => Action::Idle,
        (Tier::Standard, Some(_)) => Action::Discard,
        (Tier::Admin, None) => Action::Start,
        (Tier::Admin, Some(r)) if now >= r.deadline => Action::Revoke {
            deadline: r.deadline,
        },
        (Tier::Admin, Some(r)) => Action::Wait {
            deadline: r.deadline,
        },
    }
}

/// Externally observable result of one tick, recorded in the status
/// snapshot. Every variant is a survivable state; none terminates the
/// monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No watchable console session.
    NoConsoleUser,
    /// Tier query failed; nothing was decided this tick.
    TierUnknown { user: String },
    /// Countdown store could not be read or written.
    StoreUnavailable { user: String },
    /// Standard tier, no countdown.
    Idle { user: String },
    /// Admin observed for the first time; countdown persisted.
    CountdownStarted {
        user: String,
        deadline: DateTime<Utc>,
    },
    /// Countdown running, deadline not reached.
    Waiting {
        user: String,
        deadline: DateTime<Utc>,
    },
    /// Deadline passed and the toggle revoked the admin tier.
    Revoked { user: String },
    /// Deadline passed but the revoke failed; retried next tick.
    RevokeFailed {
        user: String,
        deadline: DateTime<Utc>,
    },
    /// Tier reverted out-of-band; stale countdown dropped.
    RecordDiscarded { user: String },
}

/// The session monitor: one instance per data directory, one tick per
/// scheduler firing.
pub struct Monitor<'conn> {
    conn: &'conn Connection,
    toggle: CommandToggle,
    console: ConsoleConfig,
    timeout: Duration,
    command_limit: std::time::Duration,
}

impl<'conn> Monitor<'conn> {
    pub fn new(config: &WatchdogConfig, conn: &'conn Connection) -> Self {
        Self {
            conn,
            toggle: CommandToggle::new(&config.toggle, config.command_timeout()),
            console: config.console.clone(),
            timeout: Duration::seconds(config.effective_timeout_secs() as i64),
            command_limit: config.command_timeout(),
        }
    }

    /// Run one tick against the current wall clock.
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick at an explicit instant.
    ///
    /// Observation and decision are separated from effects: resolve the
    /// session, query the tier, load the countdown, then apply `decide`.
    async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Some(session) = console::resolve(&self.console, self.command_limit).await else {
            tracing::debug!("no console session to watch");
            return TickOutcome::NoConsoleUser;
        };
        let user = session.name;

        let tier = match self.toggle.tier(&user).await {
            Ok(tier) => tier,
            Err(e) => {
                // Fail safe: without a confirmed tier, do nothing
                tracing::warn!(user = %user, error = %e, "tier query failed, skipping tick");
                return TickOutcome::TierUnknown { user };
            }
        };

        let record = match store::get(self.conn, &user) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(user = %user, error = %e, "countdown store unavailable");
                return TickOutcome::StoreUnavailable { user };
            }
        };

        match decide(tier, record.as_ref(), now) {
            Action::Idle => {
                tracing::debug!(user = %user, "standard tier, idle");
                TickOutcome::Idle { user }
            }
            Action::Discard => match store::clear(self.conn, &user) {
                Ok(_) => {
                    tracing::info!(user = %user, "tier already reverted, discarding countdown");
                    TickOutcome::RecordDiscarded { user }
                }
                Err(e) => {
                    tracing::error!(user = %user, error = %e, "failed to discard countdown");
                    TickOutcome::StoreUnavailable { user }
                }
            },
            Action::Start => {
                let record = CountdownRecord {
                    user: user.clone(),
                    started_at: now,
                    deadline: now + self.timeout,
                };
                match store::begin(self.conn, &record) {
                    Ok(inserted) => {
                        if !inserted {
                            // Lost a race to another writer; their deadline stands
                            tracing::debug!(user = %user, "countdown already present, keeping it");
                        }
                        tracing::info!(
                            user = %user,
                            deadline = %record.deadline,
                            "admin tier observed, countdown started"
                        );
                        TickOutcome::CountdownStarted {
                            user,
                            deadline: record.deadline,
                        }
                    }
                    Err(e) => {
                        tracing::error!(user = %user, error = %e, "failed to persist countdown");
                        TickOutcome::StoreUnavailable { user }
                    }
                }
            }
            Action::Wait { deadline } => {
                tracing::debug!(
                    user = %user,
                    %deadline,
                    remaining_secs = (deadline - now).num_seconds(),
                    "countdown running"
                );
                TickOutcome::Waiting { user, deadline }
            }
            Action::Revoke { deadline } => {
                tracing::info!(user = %user, %deadline, "deadline passed, revoking admin tier");
                match self.toggle.revoke(&user).await {
                    Ok(()) => {
                        if let Err(e) = store::clear(self.conn, &user) {
                            // The revoke landed; leave the record for the next
                            // tick's standard-tier discard instead of revoking
                            // against unknown state
                            tracing::error!(user = %user, error = %e, "revoked but failed to clear countdown");
                        }
                        tracing::info!(user = %user, "admin tier revoked");
                        TickOutcome::Revoked { user }
                    }
                    Err(e) => {
                        tracing::error!(user = %user, error = %e, "revoke failed, retrying next tick");
                        TickOutcome::RevokeFailed { user, deadline }
                    }
                }
            }
        }
    }
}
