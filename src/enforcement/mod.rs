//! Blacklist enforcement
//!
//! Classifies members against the identifier blacklist and the nickname
//! patterns, then removes the ones that match. Removals go through a bounded
//! scheduler with retries and post-removal verification; members with a clean
//! name at join time are looked at again after a delay.

mod error;
mod matcher;
pub mod names;
mod pipeline;
pub mod platform;
mod recheck;
mod scan;
mod scheduler;
mod stats;
mod warden;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PlatformError, RemovalError, ScanError, ScanResult};
pub use matcher::{IndexListing, MatchIndex, MatchReason, MatchResult, NicknamePattern, PatternMode};
pub use pipeline::{PipelineSettings, RemovalOutcome, RemovalPipeline, RemovalState, RemovalTask, render_template};
pub use platform::{GuildPlatform, MemberRecord, SerenityPlatform, UserRecord};
pub use recheck::{PendingRecheck, PendingRecheckStore};
pub use scan::{ScanCoordinator, ScanSettings};
pub use scheduler::ActionScheduler;
pub use stats::{ScanReport, Stats, StatsRecorder};
pub use warden::{JoinEvent, JoinOutcome, Warden};
