//! Warden service
//!
//! Wires the index, scheduler, pipeline, scan coordinator and recheck store
//! together and exposes the operations the bot's handlers and commands call.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::WardenConfig;
use crate::enforcement::names::{NameSources, resolve_display_name};
use crate::enforcement::{
    ActionScheduler, GuildPlatform, MatchIndex, MemberRecord, PendingRecheck, PendingRecheckStore,
    PlatformError, RemovalOutcome, RemovalPipeline, RemovalTask, ScanCoordinator, ScanError,
    ScanReport, ScanResult, Stats, StatsRecorder,
};
use crate::{ENFORCEMENT_TARGET, EVENT_TARGET};

/// Most identifiers echoed back by the list command
const LIST_LIMIT: usize = 50;

/// A member joining a guild
#[derive(Debug, Clone, Default)]
pub struct JoinEvent {
    pub guild_id: u64,
    pub user_id: u64,
    pub member: Option<MemberRecord>,
    /// Name carried by the event payload, if any
    pub session_name: Option<String>,
    /// Channel for notifications about this member when no
    /// `notify_channel_id` is configured
    pub context: Option<u64>,
}

/// What happened to a joining member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Join handling is disabled or the member was skipped
    Ignored,
    /// Not flagged and nothing scheduled
    Clean,
    /// Not flagged now, looked at again later
    RecheckScheduled,
    /// Flagged and run through the removal pipeline
    Removed(RemovalOutcome),
}

/// The parts rebuilt whenever the config changes
#[derive(Clone)]
struct Engine {
    config: Arc<WardenConfig>,
    pipeline: RemovalPipeline,
    scanner: ScanCoordinator,
}

struct WardenInner {
    platform: Arc<dyn GuildPlatform>,
    index: MatchIndex,
    stats: StatsRecorder,
    rechecks: PendingRecheckStore,
    engine: RwLock<Engine>,
    scanning: DashMap<u64, ()>,
    /// Guilds already join-scanned by this process
    join_scanned: DashMap<u64, ()>,
}

/// Blacklist enforcement for every guild the bot is in
#[derive(Clone)]
pub struct Warden {
    inner: Arc<WardenInner>,
}

/// Removes the guild from the running-scan table when dropped
struct ScanGuard<'a> {
    scanning: &'a DashMap<u64, ()>,
    guild_id: u64,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.scanning.remove(&self.guild_id);
    }
}

impl Warden {
    #[must_use]
    pub fn new(platform: Arc<dyn GuildPlatform>, config: WardenConfig) -> Self {
        let index = MatchIndex::new();
        let stats = StatsRecorder::new();
        index.load(&config.blacklist, &config.nickname_blacklist);
        let scheduler = ActionScheduler::new(config.max_concurrent);
        let engine = Self::build_engine(&platform, &index, &stats, scheduler, config);

        Self {
            inner: Arc::new(WardenInner {
                platform,
                index,
                stats,
                rechecks: PendingRecheckStore::new(),
                engine: RwLock::new(engine),
                scanning: DashMap::new(),
                join_scanned: DashMap::new(),
            }),
        }
    }

    fn build_engine(
        platform: &Arc<dyn GuildPlatform>,
        index: &MatchIndex,
        stats: &StatsRecorder,
        scheduler: ActionScheduler,
        config: WardenConfig,
    ) -> Engine {
        let pipeline = RemovalPipeline::new(Arc::clone(platform), scheduler, config.pipeline_settings());
        let scanner = ScanCoordinator::new(
            Arc::clone(platform),
            index.clone(),
            pipeline.clone(),
            stats.clone(),
            config.scan_settings(),
        );
        Engine {
            config: Arc::new(config),
            pipeline,
            scanner,
        }
    }

    fn engine(&self) -> Engine {
        self.inner.engine.read().clone()
    }

    #[must_use]
    pub fn config(&self) -> Arc<WardenConfig> {
        Arc::clone(&self.inner.engine.read().config)
    }

    #[must_use]
    pub fn index(&self) -> &MatchIndex {
        &self.inner.index
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot()
    }

    #[must_use]
    pub fn rechecks(&self) -> &PendingRecheckStore {
        &self.inner.rechecks
    }

    /// Swap in a new configuration and rebuild the index
    pub fn reload_config(&self, config: WardenConfig) {
        self.update_config(|current| *current = config);
    }

    /// Edit the current configuration in place.
    ///
    /// The scheduler is kept when the concurrency limit is unchanged, so
    /// removals already queued still count against the same capacity.
    fn update_config<F>(&self, edit: F)
    where
        F: FnOnce(&mut WardenConfig),
    {
        let mut engine = self.inner.engine.write();
        let mut config = (*engine.config).clone();
        edit(&mut config);

        self.inner.index.reload(&config.blacklist, &config.nickname_blacklist);
        let scheduler = if engine.pipeline.scheduler().max_concurrent() == config.max_concurrent.max(1) {
            engine.pipeline.scheduler().clone()
        } else {
            ActionScheduler::new(config.max_concurrent)
        };
        *engine = Self::build_engine(&self.inner.platform, &self.inner.index, &self.inner.stats, scheduler, config);
    }

    /// Check a member who just joined
    pub async fn handle_member_join(&self, event: JoinEvent) -> JoinOutcome {
        let engine = self.engine();
        let config = &engine.config;

        if !config.enable_member_join {
            return JoinOutcome::Ignored;
        }
        if config.skip_bots && event.member.as_ref().is_some_and(|member| member.bot) {
            debug!(target: EVENT_TARGET, user_id = event.user_id, "Skipping bot account");
            return JoinOutcome::Ignored;
        }

        let sources = NameSources {
            member: event.member.as_ref(),
            session_name: event.session_name.as_deref(),
        };
        let name = resolve_display_name(self.inner.platform.as_ref(), event.user_id, &sources).await;
        let user_key = event.user_id.to_string();
        let result = self.inner.index.classify(&user_key, &name);
        let context = config.notify_channel_id.or(event.context);

        if result.matched {
            self.inner.rechecks.cancel(event.guild_id, event.user_id);
            let task = RemovalTask::new(context, event.guild_id, event.user_id, name, result);
            return JoinOutcome::Removed(engine.pipeline.run(task).await);
        }

        if config.enable_delayed_check && name != user_key {
            let recheck = PendingRecheck::new(event.guild_id, event.user_id, name);
            let warden = self.clone();
            self.inner
                .rechecks
                .register(recheck, config.delayed_check(), move |recheck| async move {
                    warden.run_recheck(recheck, context).await;
                });
            debug!(
                target: EVENT_TARGET,
                guild_id = event.guild_id,
                user_id = event.user_id,
                delay_ms = config.delayed_check_ms,
                "Delayed nickname check scheduled"
            );
            return JoinOutcome::RecheckScheduled;
        }

        JoinOutcome::Clean
    }

    /// Timer body for a pending recheck
    async fn run_recheck(&self, recheck: PendingRecheck, context: Option<u64>) {
        let PendingRecheck {
            guild_id,
            user_id,
            original_nickname,
            ..
        } = recheck;

        let member = match self.inner.platform.fetch_member(guild_id, user_id).await {
            Ok(member) => member,
            Err(PlatformError::NotFound(_)) => {
                debug!(target: ENFORCEMENT_TARGET, guild_id, user_id, "Member left before recheck");
                return;
            }
            Err(e) => {
                warn!(
                    target: ENFORCEMENT_TARGET,
                    guild_id,
                    user_id,
                    error = %e,
                    "Recheck lookup failed, dropping recheck"
                );
                return;
            }
        };

        let sources = NameSources {
            member: Some(&member),
            session_name: None,
        };
        let current = resolve_display_name(self.inner.platform.as_ref(), user_id, &sources).await;
        if current == original_nickname {
            debug!(target: ENFORCEMENT_TARGET, guild_id, user_id, "Name unchanged at recheck");
            return;
        }

        let result = self.inner.index.classify(&user_id.to_string(), &current);
        if !result.matched {
            debug!(target: ENFORCEMENT_TARGET, guild_id, user_id, name = %current, "Renamed member is clean");
            return;
        }

        info!(
            target: ENFORCEMENT_TARGET,
            guild_id,
            user_id,
            from = %original_nickname,
            to = %current,
            "Member renamed to a blacklisted name"
        );
        let task = RemovalTask::new(context, guild_id, user_id, current, result);
        self.engine().pipeline.run(task).await;
    }

    /// Scan a guild, refusing to overlap with a scan already running there
    ///
    /// # Errors
    ///
    /// `ScanError::AlreadyRunning` if the guild is being scanned, or
    /// `ScanError::Listing` if the member list cannot be fetched.
    pub async fn scan_guild(&self, guild_id: u64, context: Option<u64>) -> ScanResult<ScanReport> {
        let _guard = match self.inner.scanning.entry(guild_id) {
            Entry::Occupied(_) => return Err(ScanError::AlreadyRunning(guild_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                ScanGuard {
                    scanning: &self.inner.scanning,
                    guild_id,
                }
            }
        };

        let scanner = self.engine().scanner;
        let result = scanner.scan(guild_id, context).await;
        if let Err(e) = &result {
            error!(target: ENFORCEMENT_TARGET, guild_id, error = %e, "Scan failed");
        }
        result
    }

    /// Scan a guild the first time it becomes available to this process.
    ///
    /// Later availability events for the same guild (gateway resumes,
    /// re-identifies, outages ending) do not scan again; `/blacklist scan`
    /// covers those.
    pub async fn join_scan(
        &self,
        guild_id: u64,
        context: Option<u64>,
    ) -> Option<ScanResult<ScanReport>> {
        let config = self.config();
        if !config.enable_join_scan {
            return None;
        }
        if self.inner.join_scanned.insert(guild_id, ()).is_some() {
            debug!(target: ENFORCEMENT_TARGET, guild_id, "Guild already join-scanned");
            return None;
        }
        Some(self.scan_guild(guild_id, config.notify_channel_id.or(context)).await)
    }

    #[must_use]
    pub fn is_scanning(&self, guild_id: u64) -> bool {
        self.inner.scanning.contains_key(&guild_id)
    }

    /// Manual scan, answered with a one-line status
    pub async fn command_scan(&self, guild_id: u64, channel_id: Option<u64>) -> String {
        match self.scan_guild(guild_id, channel_id).await {
            Ok(report) => format!("Scan complete. {report}."),
            Err(ScanError::AlreadyRunning(_)) => "A scan is already running for this server.".to_string(),
            Err(e) => format!("Scan failed: {e}"),
        }
    }

    /// Add an identifier to the blacklist
    pub fn command_add(&self, id: &str) -> String {
        let id = id.trim();
        if id.is_empty() {
            return "Please provide a user ID.".to_string();
        }
        if self.inner.index.match_identifier(id) {
            return format!("{id} is already blacklisted.");
        }

        let id = id.to_string();
        self.update_config(|config| config.blacklist.push(id.clone()));
        info!(target: ENFORCEMENT_TARGET, user_id = %id, "Identifier added to blacklist");
        format!(
            "Added {id} to the blacklist ({} entries).",
            self.inner.index.identifier_count()
        )
    }

    /// Remove an identifier from the blacklist
    pub fn command_remove(&self, id: &str) -> String {
        let id = id.trim();
        if id.is_empty() {
            return "Please provide a user ID.".to_string();
        }
        if !self.inner.index.match_identifier(id) {
            return format!("{id} is not on the blacklist.");
        }

        self.update_config(|config| config.blacklist.retain(|entry| entry.trim() != id));
        info!(target: ENFORCEMENT_TARGET, user_id = %id, "Identifier removed from blacklist");
        format!(
            "Removed {id} from the blacklist ({} entries).",
            self.inner.index.identifier_count()
        )
    }

    /// Size and contents of the blacklist
    #[must_use]
    pub fn command_list(&self) -> String {
        let listing = self.inner.index.listing();
        let ids = &listing.identifiers;
        let mut text = if ids.is_empty() {
            "The identifier blacklist is empty.".to_string()
        } else {
            let mut text = format!("Blacklist ({} entries): ", ids.len());
            text.push_str(&ids.iter().take(LIST_LIMIT).cloned().collect::<Vec<_>>().join(", "));
            if ids.len() > LIST_LIMIT {
                let _ = write!(text, " and {} more", ids.len() - LIST_LIMIT);
            }
            text.push('.');
            text
        };
        let _ = write!(text, " Nickname patterns: {}.", listing.pattern_count);
        if !listing.degraded.is_empty() {
            let _ = write!(
                text,
                " Invalid regex matched as plain text: {}.",
                listing.degraded.join(", ")
            );
        }
        text
    }

    /// Cumulative scan statistics
    #[must_use]
    pub fn command_stats(&self) -> String {
        if !self.config().enable_stats {
            return "Statistics are disabled.".to_string();
        }
        self.stats().to_string()
    }

    /// Drop every pending recheck; removals already running finish on their own
    pub fn shutdown(&self) {
        info!(
            target: ENFORCEMENT_TARGET,
            pending = self.inner.rechecks.len(),
            "Shutting down warden"
        );
        self.inner.rechecks.clear();
    }
}
