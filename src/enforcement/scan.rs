//! Full guild scans
//!
//! A scan lists the guild once, walks the members in fixed-size batches and
//! hands every match to the removal pipeline. Two pauses keep the bot under
//! the platform's rate limits: a short one after each group of removals and
//! a longer one between batches.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::ENFORCEMENT_TARGET;
use crate::enforcement::names::{NameSources, resolve_display_name};
use crate::enforcement::{
    GuildPlatform, MatchIndex, MemberRecord, RemovalPipeline, RemovalTask, ScanError, ScanReport,
    ScanResult, StatsRecorder,
};

/// Pacing and filtering for scans
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub skip_bots: bool,
    pub batch_size: usize,
    /// Pause after each group of removals inside a batch
    pub kick_delay: Duration,
    /// Pause between batches
    pub scan_delay: Duration,
    pub enable_stats: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            skip_bots: true,
            batch_size: 50,
            kick_delay: Duration::from_secs(1),
            scan_delay: Duration::from_secs(3),
            enable_stats: true,
        }
    }
}

/// Runs scans over a guild's membership
#[derive(Clone)]
pub struct ScanCoordinator {
    platform: Arc<dyn GuildPlatform>,
    index: MatchIndex,
    pipeline: RemovalPipeline,
    stats: StatsRecorder,
    settings: ScanSettings,
}

impl ScanCoordinator {
    #[must_use]
    pub fn new(
        platform: Arc<dyn GuildPlatform>,
        index: MatchIndex,
        pipeline: RemovalPipeline,
        stats: StatsRecorder,
        settings: ScanSettings,
    ) -> Self {
        Self {
            platform,
            index,
            pipeline,
            stats,
            settings,
        }
    }

    /// Scan every member of the guild.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::Listing` when the member list cannot be fetched;
    /// stats are left untouched in that case.
    pub async fn scan(&self, guild_id: u64, context: Option<u64>) -> ScanResult<ScanReport> {
        let started = Instant::now();
        let mut report = ScanReport::new(guild_id);

        let members = self
            .platform
            .list_members(guild_id)
            .await
            .map_err(|source| ScanError::Listing { guild_id, source })?;

        let candidates: Vec<MemberRecord> = members
            .into_iter()
            .filter(|member| {
                let skip = self.settings.skip_bots && member.bot;
                if skip {
                    report.skipped_bots += 1;
                }
                !skip
            })
            .collect();

        info!(
            target: ENFORCEMENT_TARGET,
            scan_id = %report.scan_id,
            guild_id,
            members = candidates.len(),
            skipped_bots = report.skipped_bots,
            event = "scan_started",
            "Scanning guild members"
        );

        let batch_size = self.settings.batch_size.max(1);
        let batch_count = candidates.len().div_ceil(batch_size);

        for (batch_index, batch) in candidates.chunks(batch_size).enumerate() {
            let flagged = self.classify_batch(guild_id, context, batch, &mut report).await;
            self.remove_flagged(flagged, &mut report).await;

            debug!(
                target: ENFORCEMENT_TARGET,
                scan_id = %report.scan_id,
                batch = batch_index + 1,
                batches = batch_count,
                "Batch done"
            );
            if batch_index + 1 < batch_count {
                tokio::time::sleep(self.settings.scan_delay).await;
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            target: ENFORCEMENT_TARGET,
            scan_id = %report.scan_id,
            guild_id,
            scanned = report.scanned,
            matched = report.matched,
            kicked = report.kicked,
            failed_kick = report.failed_kick,
            duration_ms = report.duration_ms,
            event = "scan_completed",
            "Scan completed"
        );

        if self.settings.enable_stats {
            self.stats.record(&report);
        }

        Ok(report)
    }

    async fn classify_batch(
        &self,
        guild_id: u64,
        context: Option<u64>,
        batch: &[MemberRecord],
        report: &mut ScanReport,
    ) -> Vec<RemovalTask> {
        let mut flagged = Vec::new();
        for member in batch {
            report.scanned += 1;
            let sources = NameSources {
                member: Some(member),
                session_name: None,
            };
            let name = resolve_display_name(self.platform.as_ref(), member.user_id, &sources).await;
            let result = self.index.classify(&member.user_id.to_string(), &name);
            if result.matched {
                report.matched += 1;
                flagged.push(RemovalTask::new(context, guild_id, member.user_id, name, result));
            }
        }
        flagged
    }

    /// Run removals in groups of the scheduler's width, pausing between groups
    async fn remove_flagged(&self, flagged: Vec<RemovalTask>, report: &mut ScanReport) {
        let group_size = self.pipeline.scheduler().max_concurrent();
        let group_count = flagged.len().div_ceil(group_size);

        for (group_index, group) in flagged.chunks(group_size).enumerate() {
            let outcomes = join_all(group.iter().cloned().map(|task| self.pipeline.run(task))).await;
            for outcome in outcomes {
                if outcome.is_success() {
                    report.kicked += 1;
                } else {
                    report.failed_kick += 1;
                }
            }

            if group_index + 1 < group_count {
                tokio::time::sleep(self.settings.kick_delay).await;
            }
        }
    }
}
