//! Scan statistics

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Summary of one completed scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub guild_id: u64,
    pub scanned: u64,
    pub matched: u64,
    pub kicked: u64,
    pub failed_kick: u64,
    pub skipped_bots: u64,
    pub duration_ms: u64,
}

impl ScanReport {
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            guild_id,
            scanned: 0,
            matched: 0,
            kicked: 0,
            failed_kick: 0,
            skipped_bots: 0,
            duration_ms: 0,
        }
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanned {} members in {} ms: {} matched, {} removed, {} failed",
            self.scanned, self.duration_ms, self.matched, self.kicked, self.failed_kick
        )
    }
}

/// Cumulative counters for the lifetime of the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub scanned: u64,
    pub kicked: u64,
    pub failed: u64,
    pub scans: u64,
    pub last_scan_duration_ms: u64,
    pub average_scan_duration_ms: f64,
}

impl Stats {
    /// A new value with the report folded in
    #[must_use]
    pub fn with_report(&self, report: &ScanReport) -> Self {
        let scans = self.scans + 1;
        #[allow(clippy::cast_precision_loss)]
        let average = self.average_scan_duration_ms
            + (report.duration_ms as f64 - self.average_scan_duration_ms) / scans as f64;
        Self {
            scanned: self.scanned + report.scanned,
            kicked: self.kicked + report.kicked,
            failed: self.failed + report.failed_kick,
            scans,
            last_scan_duration_ms: report.duration_ms,
            average_scan_duration_ms: average,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scans: {}. Scanned: {}. Removed: {}. Failed: {}. Last scan: {} ms. Average: {:.1} ms.",
            self.scans,
            self.scanned,
            self.kicked,
            self.failed,
            self.last_scan_duration_ms,
            self.average_scan_duration_ms
        )
    }
}

/// Shared handle to the running stats; every update replaces the whole value
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    inner: Arc<RwLock<Stats>>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &ScanReport) -> Stats {
        let mut stats = self.inner.write();
        let next = stats.with_report(report);
        *stats = next;
        next
    }

    #[must_use]
    pub fn snapshot(&self) -> Stats {
        *self.inner.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(scanned: u64, kicked: u64, failed: u64, duration_ms: u64) -> ScanReport {
        ScanReport {
            scanned,
            matched: kicked + failed,
            kicked,
            failed_kick: failed,
            duration_ms,
            ..ScanReport::new(1)
        }
    }

    #[test]
    fn test_running_average() {
        let recorder = StatsRecorder::new();
        recorder.record(&report(10, 1, 0, 100));
        recorder.record(&report(20, 2, 1, 200));
        let stats = recorder.record(&report(30, 0, 0, 600));

        assert_eq!(stats.scans, 3);
        assert_eq!(stats.scanned, 60);
        assert_eq!(stats.kicked, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.last_scan_duration_ms, 600);
        assert!((stats.average_scan_duration_ms - 300.0).abs() < f64::EPSILON);
        assert_eq!(recorder.snapshot(), stats);
    }

    #[test]
    fn test_report_display() {
        let text = report(5, 1, 1, 42).to_string();
        assert_eq!(text, "Scanned 5 members in 42 ms: 2 matched, 1 removed, 1 failed");
    }
}
