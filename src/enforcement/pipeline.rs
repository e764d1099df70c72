//! Removal pipeline
//!
//! Each flagged user runs through
//! `Detected → Notifying → Removing → Verifying → Succeeded | Retrying | Failed`.
//! Attempts for one user are strictly sequential; the removal call of every
//! attempt is admitted through the shared [`ActionScheduler`].

use derive_more::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ENFORCEMENT_TARGET;
use crate::enforcement::{ActionScheduler, GuildPlatform, MatchResult, PlatformError, RemovalError};

/// Where a removal currently is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum RemovalState {
    #[default]
    Detected,
    Notifying,
    Removing,
    Verifying,
    Retrying,
    Succeeded,
    Failed,
}

/// Knobs for the removal pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub notify_admin: bool,
    pub verify_kick: bool,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub verify_delay: Duration,
    pub verify_timeout: Duration,
    pub notify_template: String,
    pub kick_fail_template: String,
    pub kick_reason_template: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            notify_admin: false,
            verify_kick: false,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            verify_delay: Duration::from_secs(1),
            verify_timeout: Duration::from_secs(5),
            notify_template: "Removing {user} ({id}): {reason}".to_string(),
            kick_fail_template: "Could not remove {user} ({id}): {error}. \
                The bot may be missing the Kick Members permission or its role may be too low."
                .to_string(),
            kick_reason_template: "Blacklisted: {reason}".to_string(),
        }
    }
}

/// Fill `{user}`, `{id}`, `{reason}` and `{error}` placeholders
#[must_use]
pub fn render_template(template: &str, task: &RemovalTask, error: Option<&RemovalError>) -> String {
    let error = error.map_or_else(String::new, ToString::to_string);
    template
        .replace("{user}", &task.display_name)
        .replace("{id}", &task.user_id.to_string())
        .replace("{reason}", &task.reason.describe())
        .replace("{error}", &error)
}

/// A flagged user on their way out
#[derive(Debug, Clone)]
pub struct RemovalTask {
    /// Channel that receives notifications and warnings, if any
    pub context: Option<u64>,
    pub guild_id: u64,
    pub user_id: u64,
    pub display_name: String,
    pub reason: MatchResult,
    pub attempts_used: u32,
    pub state: RemovalState,
}

impl RemovalTask {
    #[must_use]
    pub fn new(
        context: Option<u64>,
        guild_id: u64,
        user_id: u64,
        display_name: impl Into<String>,
        reason: MatchResult,
    ) -> Self {
        Self {
            context,
            guild_id,
            user_id,
            display_name: display_name.into(),
            reason,
            attempts_used: 0,
            state: RemovalState::Detected,
        }
    }

    fn transition(&mut self, state: RemovalState) {
        debug!(
            target: ENFORCEMENT_TARGET,
            guild_id = self.guild_id,
            user_id = self.user_id,
            attempt = self.attempts_used,
            from = %self.state,
            to = %state,
            "Removal state change"
        );
        self.state = state;
    }
}

/// Terminal result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: RemovalError },
}

impl RemovalOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Drives removal tasks against the platform
#[derive(Clone)]
pub struct RemovalPipeline {
    platform: Arc<dyn GuildPlatform>,
    scheduler: ActionScheduler,
    settings: Arc<PipelineSettings>,
}

impl RemovalPipeline {
    #[must_use]
    pub fn new(platform: Arc<dyn GuildPlatform>, scheduler: ActionScheduler, settings: PipelineSettings) -> Self {
        Self {
            platform,
            scheduler,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub const fn scheduler(&self) -> &ActionScheduler {
        &self.scheduler
    }

    /// Run a task to a terminal state
    pub async fn run(&self, mut task: RemovalTask) -> RemovalOutcome {
        let max_attempts = self.settings.retry_attempts.max(1);

        info!(
            target: ENFORCEMENT_TARGET,
            guild_id = task.guild_id,
            user_id = task.user_id,
            display_name = %task.display_name,
            reason = %task.reason.describe(),
            event = "removal_started",
            "Blacklisted member detected"
        );

        if self.settings.notify_admin {
            task.transition(RemovalState::Notifying);
            let text = render_template(&self.settings.notify_template, &task, None);
            self.notify(&task, &text).await;
        }

        let mut last_error = RemovalError::RemovalApi("no attempt made".to_string());
        for attempt in 1..=max_attempts {
            task.attempts_used = attempt;
            task.transition(RemovalState::Removing);

            match self.attempt(&mut task).await {
                Ok(()) => {
                    task.transition(RemovalState::Succeeded);
                    info!(
                        target: ENFORCEMENT_TARGET,
                        guild_id = task.guild_id,
                        user_id = task.user_id,
                        attempts = attempt,
                        event = "removal_succeeded",
                        "Member removed"
                    );
                    return RemovalOutcome::Succeeded { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        target: ENFORCEMENT_TARGET,
                        guild_id = task.guild_id,
                        user_id = task.user_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Removal attempt failed"
                    );
                    last_error = e;
                }
            }

            if attempt < max_attempts {
                task.transition(RemovalState::Retrying);
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        task.transition(RemovalState::Failed);
        error!(
            target: ENFORCEMENT_TARGET,
            guild_id = task.guild_id,
            user_id = task.user_id,
            attempts = max_attempts,
            error = %last_error,
            event = "removal_failed",
            "Giving up on member removal"
        );
        let text = render_template(&self.settings.kick_fail_template, &task, Some(&last_error));
        self.notify(&task, &text).await;

        RemovalOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }

    /// One removal call plus optional verification
    async fn attempt(&self, task: &mut RemovalTask) -> Result<(), RemovalError> {
        let audit_reason = render_template(&self.settings.kick_reason_template, task, None);
        let removal = self
            .scheduler
            .submit(
                self.platform
                    .remove_member(task.guild_id, task.user_id, &audit_reason),
            )
            .await;

        match removal {
            Ok(()) => {}
            // Already gone, nothing left to verify
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(RemovalError::from(e)),
        }

        if !self.settings.verify_kick {
            return Ok(());
        }

        task.transition(RemovalState::Verifying);
        tokio::time::sleep(self.settings.verify_delay).await;
        self.verify_absent(task.guild_id, task.user_id).await
    }

    async fn verify_absent(&self, guild_id: u64, user_id: u64) -> Result<(), RemovalError> {
        let lookup = tokio::time::timeout(
            self.settings.verify_timeout,
            self.platform.fetch_member(guild_id, user_id),
        )
        .await;

        match lookup {
            Ok(Err(PlatformError::NotFound(_))) => Ok(()),
            Ok(Ok(_)) => Err(RemovalError::VerificationMismatch),
            Ok(Err(e)) => Err(RemovalError::VerificationApi(e.to_string())),
            Err(_) => Err(RemovalError::VerificationApi(format!(
                "membership lookup timed out after {} ms",
                self.settings.verify_timeout.as_millis()
            ))),
        }
    }

    /// Best-effort message to the task's channel, or the guild's system channel
    async fn notify(&self, task: &RemovalTask, text: &str) {
        let Some(channel_id) = self.channel_for(task).await else {
            warn!(
                target: ENFORCEMENT_TARGET,
                guild_id = task.guild_id,
                user_id = task.user_id,
                message = %text,
                "No channel to post to, message dropped"
            );
            return;
        };

        if let Err(e) = self.platform.send_message(channel_id, text).await {
            warn!(
                target: ENFORCEMENT_TARGET,
                channel_id,
                user_id = task.user_id,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    async fn channel_for(&self, task: &RemovalTask) -> Option<u64> {
        if task.context.is_some() {
            return task.context;
        }
        match self.platform.system_channel(task.guild_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    target: ENFORCEMENT_TARGET,
                    guild_id = task.guild_id,
                    error = %e,
                    "System channel lookup failed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::platform::MockGuildPlatform;
    use crate::enforcement::testing::FakePlatform;
    use crate::enforcement::{MemberRecord, PlatformError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> PipelineSettings {
        PipelineSettings {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            verify_delay: Duration::from_millis(50),
            verify_timeout: Duration::from_millis(500),
            ..PipelineSettings::default()
        }
    }

    fn task() -> RemovalTask {
        RemovalTask::new(Some(77), 1, 111, "Alice", MatchResult::identifier())
    }

    fn pipeline(platform: impl GuildPlatform + 'static, settings: PipelineSettings) -> RemovalPipeline {
        RemovalPipeline::new(Arc::new(platform), ActionScheduler::new(2), settings)
    }

    #[test]
    fn test_render_template() {
        let task = RemovalTask::new(None, 1, 222, "群管理员小明", MatchResult::nickname("管理员"));
        let text = render_template("{user} ({id}) - {reason} {error}", &task, Some(&RemovalError::VerificationMismatch));
        assert_eq!(
            text,
            "群管理员小明 (222) - nickname matches \"管理员\" Member still present after removal"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_success() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .withf(|guild, user, reason| *guild == 1 && *user == 111 && reason.starts_with("Blacklisted: identifier blacklist"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        platform.expect_send_message().never();

        let outcome = pipeline(platform, settings()).run(task()).await;
        assert_eq!(outcome, RemovalOutcome::Succeeded { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut platform = MockGuildPlatform::new();
        platform.expect_remove_member().times(3).returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PlatformError::Transient("rate limited".to_string()))
            } else {
                Ok(())
            }
        });
        platform.expect_send_message().never();

        let outcome = pipeline(platform, settings()).run(task()).await;
        assert_eq!(outcome, RemovalOutcome::Succeeded { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_failure_warns_once() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(3)
            .returning(|_, _, _| Err(PlatformError::Permission("Missing Permissions".to_string())));
        platform
            .expect_send_message()
            .withf(|channel, text| *channel == 77 && text.contains("Kick Members permission"))
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = pipeline(platform, settings()).run(task()).await;
        assert_eq!(
            outcome,
            RemovalOutcome::Failed {
                attempts: 3,
                error: RemovalError::Permission("Missing Permissions".to_string()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_counts_as_removed() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(1)
            .returning(|_, _, _| Err(PlatformError::NotFound("Unknown Member".to_string())));
        platform.expect_fetch_member().never();

        let outcome = pipeline(
            platform,
            PipelineSettings {
                verify_kick: true,
                ..settings()
            },
        )
        .run(task())
        .await;
        assert!(outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_mismatch_on_every_attempt() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(3)
            .returning(|_, _, _| Ok(()));
        platform
            .expect_fetch_member()
            .times(3)
            .returning(|_, user| Ok(MemberRecord::new(user).with_nick("Alice")));
        platform
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = pipeline(
            platform,
            PipelineSettings {
                verify_kick: true,
                ..settings()
            },
        )
        .run(task())
        .await;
        assert_eq!(
            outcome,
            RemovalOutcome::Failed {
                attempts: 3,
                error: RemovalError::VerificationMismatch,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_api_error_is_not_success() {
        let lookups = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&lookups);

        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(2)
            .returning(|_, _, _| Ok(()));
        platform.expect_fetch_member().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PlatformError::Transient("gateway hiccup".to_string()))
            } else {
                Err(PlatformError::NotFound("Unknown Member".to_string()))
            }
        });
        platform.expect_send_message().never();

        let outcome = pipeline(
            platform,
            PipelineSettings {
                verify_kick: true,
                ..settings()
            },
        )
        .run(task())
        .await;
        assert_eq!(outcome, RemovalOutcome::Succeeded { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_timeout_retries() {
        let platform = FakePlatform::new();
        platform.add_member(MemberRecord::new(111).with_nick("Alice"));
        platform.set_fetch_delay(Duration::from_secs(10));
        platform.set_ignore_removals(true);

        let pipeline = RemovalPipeline::new(
            Arc::new(platform.clone()),
            ActionScheduler::new(1),
            PipelineSettings {
                verify_kick: true,
                retry_attempts: 2,
                ..settings()
            },
        );

        let outcome = pipeline.run(task()).await;
        assert!(matches!(
            outcome,
            RemovalOutcome::Failed { attempts: 2, error: RemovalError::VerificationApi(ref msg) } if msg.contains("timed out")
        ));
        assert_eq!(platform.removal_calls(), 2);
        assert_eq!(platform.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_failure_does_not_block_removal() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut platform = MockGuildPlatform::new();
        platform.expect_send_message().times(1).returning(move |_, text| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(text.contains("Alice"));
            Err(PlatformError::Other("cannot send".to_string()))
        });
        platform
            .expect_remove_member()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = pipeline(
            platform,
            PipelineSettings {
                notify_admin: true,
                ..settings()
            },
        )
        .run(task())
        .await;
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_any_channel_sends_nothing() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(1)
            .returning(|_, _, _| Err(PlatformError::Other("boom".to_string())));
        platform
            .expect_system_channel()
            .withf(|guild| *guild == 1)
            .times(1)
            .returning(|_| Ok(None));
        platform.expect_send_message().never();

        let outcome = pipeline(
            platform,
            PipelineSettings {
                retry_attempts: 1,
                ..settings()
            },
        )
        .run(RemovalTask::new(None, 1, 111, "Alice", MatchResult::identifier()))
        .await;
        assert!(!outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_context_uses_system_channel() {
        let platform = FakePlatform::new();
        platform.add_member(MemberRecord::new(111).with_nick("Alice"));
        platform.deny_removal(111);
        platform.set_system_channel(Some(900));

        let outcome = pipeline(platform.clone(), settings())
            .run(RemovalTask::new(None, 1, 111, "Alice", MatchResult::identifier()))
            .await;
        assert!(!outcome.is_success());

        let messages = platform.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, 900);
        assert!(messages[0].1.contains("Kick Members permission"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_context_skips_system_channel_lookup() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_remove_member()
            .times(1)
            .returning(|_, _, _| Err(PlatformError::Other("boom".to_string())));
        platform.expect_system_channel().never();
        platform
            .expect_send_message()
            .withf(|channel, _| *channel == 77)
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = pipeline(
            platform,
            PipelineSettings {
                retry_attempts: 1,
                ..settings()
            },
        )
        .run(task())
        .await;
        assert!(!outcome.is_success());
    }
}
