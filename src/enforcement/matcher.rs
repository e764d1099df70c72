//! Blacklist matching
//!
//! Holds the identifier blacklist and the ordered nickname patterns as one
//! immutable snapshot. Reloads build a fresh snapshot and swap it in, so a
//! reader always sees either the old or the new lists, never a mix.

use derive_more::Display;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ENFORCEMENT_TARGET;

/// How a nickname pattern is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// Case-insensitive substring
    #[default]
    #[display("contains")]
    Contains,
    /// Case-insensitive regular expression search (not anchored)
    #[display("regex")]
    Regex,
}

/// A configured nickname pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicknamePattern {
    pub keyword: String,
    #[serde(default)]
    pub mode: PatternMode,
}

impl NicknamePattern {
    pub fn contains(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            mode: PatternMode::Contains,
        }
    }

    pub fn regex(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            mode: PatternMode::Regex,
        }
    }
}

/// Why a candidate was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum MatchReason {
    #[display("identifier blacklist")]
    IdentifierBlacklist,
    #[display("nickname pattern")]
    NicknamePattern,
}

/// Outcome of classifying a candidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub reason: Option<MatchReason>,
    pub matched_pattern: Option<String>,
}

impl MatchResult {
    /// A negative result
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn identifier() -> Self {
        Self {
            matched: true,
            reason: Some(MatchReason::IdentifierBlacklist),
            matched_pattern: None,
        }
    }

    #[must_use]
    pub fn nickname(pattern: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: Some(MatchReason::NicknamePattern),
            matched_pattern: Some(pattern.into()),
        }
    }

    /// Human readable reason used by notification templates
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.reason, &self.matched_pattern) {
            (Some(MatchReason::NicknamePattern), Some(pattern)) => {
                format!("nickname matches \"{pattern}\"")
            }
            (Some(reason), _) => reason.to_string(),
            (None, _) => "no match".to_string(),
        }
    }
}

/// A pattern ready for matching
#[derive(Debug)]
enum CompiledPattern {
    Contains { keyword: String, lowered: String },
    Regex { keyword: String, regex: Regex },
    /// Regex that failed to compile, evaluated as a substring check
    Degraded { keyword: String, lowered: String },
}

impl CompiledPattern {
    fn compile(pattern: &NicknamePattern) -> Self {
        let keyword = pattern.keyword.trim().to_string();
        match pattern.mode {
            PatternMode::Contains => Self::Contains {
                lowered: keyword.to_lowercase(),
                keyword,
            },
            PatternMode::Regex => match RegexBuilder::new(&keyword).case_insensitive(true).build() {
                Ok(regex) => Self::Regex { keyword, regex },
                Err(e) => {
                    warn!(
                        target: ENFORCEMENT_TARGET,
                        pattern = %keyword,
                        error = %e,
                        "Invalid nickname regex, falling back to substring matching"
                    );
                    Self::Degraded {
                        lowered: keyword.to_lowercase(),
                        keyword,
                    }
                }
            },
        }
    }

    fn keyword(&self) -> &str {
        match self {
            Self::Contains { keyword, .. }
            | Self::Regex { keyword, .. }
            | Self::Degraded { keyword, .. } => keyword,
        }
    }

    fn is_match(&self, name: &str, lowered_name: &str) -> bool {
        match self {
            Self::Contains { lowered, .. } => lowered_name.contains(lowered.as_str()),
            Self::Regex { regex, .. } => regex.is_match(name),
            Self::Degraded { keyword, lowered } => {
                warn!(
                    target: ENFORCEMENT_TARGET,
                    pattern = %keyword,
                    "Evaluating invalid regex as substring"
                );
                lowered_name.contains(lowered.as_str())
            }
        }
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    identifiers: HashSet<String>,
    patterns: Vec<CompiledPattern>,
}

impl Snapshot {
    fn match_identifier(&self, id: &str) -> bool {
        self.identifiers.contains(id.trim())
    }

    fn match_nickname(&self, name: &str) -> MatchResult {
        let lowered = name.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| pattern.is_match(name, &lowered))
            .map_or_else(MatchResult::none, |pattern| {
                MatchResult::nickname(pattern.keyword())
            })
    }

    fn degraded(&self) -> Vec<String> {
        self.patterns
            .iter()
            .filter_map(|pattern| match pattern {
                CompiledPattern::Degraded { keyword, .. } => Some(keyword.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Contents of one snapshot, for display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexListing {
    /// Sorted identifier blacklist
    pub identifiers: Vec<String>,
    pub pattern_count: usize,
    /// Regex patterns evaluated as substrings
    pub degraded: Vec<String>,
}

/// Identifier set plus ordered nickname patterns behind one swappable reference
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
}

impl MatchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from the given lists
    #[must_use]
    pub fn with_lists<I, S>(identifiers: I, patterns: &[NicknamePattern]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = Self::new();
        index.load(identifiers, patterns);
        index
    }

    /// Replace the whole index
    pub fn load<I, S>(&self, identifiers: I, patterns: &[NicknamePattern])
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers: HashSet<String> = identifiers
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        let patterns: Vec<CompiledPattern> = patterns
            .iter()
            .filter(|pattern| !pattern.keyword.trim().is_empty())
            .map(CompiledPattern::compile)
            .collect();

        info!(
            target: ENFORCEMENT_TARGET,
            identifiers = identifiers.len(),
            patterns = patterns.len(),
            "Blacklist index loaded"
        );

        let next = Arc::new(Snapshot {
            identifiers,
            patterns,
        });
        *self.snapshot.write() = next;
    }

    /// Alias of [`MatchIndex::load`] used by the config poller
    pub fn reload<I, S>(&self, identifiers: I, patterns: &[NicknamePattern])
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.load(identifiers, patterns);
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Exact membership of the trimmed identifier
    #[must_use]
    pub fn match_identifier(&self, id: &str) -> bool {
        self.current().match_identifier(id)
    }

    /// First pattern, in configured order, that matches the name
    #[must_use]
    pub fn match_nickname(&self, name: &str) -> MatchResult {
        self.current().match_nickname(name)
    }

    /// Identifier first, nickname second, both against the same snapshot
    #[must_use]
    pub fn classify(&self, id: &str, name: &str) -> MatchResult {
        let snapshot = self.current();
        if snapshot.match_identifier(id) {
            return MatchResult::identifier();
        }
        snapshot.match_nickname(name)
    }

    #[must_use]
    pub fn identifier_count(&self) -> usize {
        self.current().identifiers.len()
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.current().patterns.len()
    }

    /// Sorted copy of the identifier blacklist
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.listing().identifiers
    }

    /// Regex patterns that failed to compile
    #[must_use]
    pub fn degraded_patterns(&self) -> Vec<String> {
        self.current().degraded()
    }

    /// Identifiers, pattern count and degraded patterns from one snapshot
    #[must_use]
    pub fn listing(&self) -> IndexListing {
        let snapshot = self.current();
        let mut identifiers: Vec<String> = snapshot.identifiers.iter().cloned().collect();
        identifiers.sort();
        IndexListing {
            identifiers,
            pattern_count: snapshot.patterns.len(),
            degraded: snapshot.degraded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_trim_and_dedupe() {
        let index = MatchIndex::with_lists([" 111 ", "111", "", "222\n", "  "], &[]);
        assert_eq!(index.identifier_count(), 2);
        assert!(index.match_identifier("111"));
        assert!(index.match_identifier(" 222 "));
        assert!(!index.match_identifier("333"));
        assert_eq!(index.identifiers(), vec!["111", "222"]);
    }

    #[test]
    fn test_reload_replaces_everything() {
        let index = MatchIndex::with_lists(["111"], &[NicknamePattern::contains("spam")]);
        index.reload(["222"], &[]);
        assert!(!index.match_identifier("111"));
        assert!(index.match_identifier("222"));
        assert!(!index.match_nickname("spammer").matched);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let index = MatchIndex::with_lists(Vec::<String>::new(), &[NicknamePattern::contains("Admin")]);
        let result = index.match_nickname("the ADMIN team");
        assert!(result.matched);
        assert_eq!(result.reason, Some(MatchReason::NicknamePattern));
        assert_eq!(result.matched_pattern.as_deref(), Some("Admin"));
    }

    #[test]
    fn test_contains_with_cjk_keyword() {
        let index = MatchIndex::with_lists(Vec::<String>::new(), &[NicknamePattern::contains("管理员")]);
        let result = index.classify("222", "群管理员小明");
        assert_eq!(result, MatchResult::nickname("管理员"));
    }

    #[test]
    fn test_regex_search_is_unanchored_and_case_insensitive() {
        let index = MatchIndex::with_lists(
            Vec::<String>::new(),
            &[NicknamePattern::regex(r"free\s+nitro")],
        );
        assert!(index.match_nickname("Get FREE   Nitro here").matched);
        assert!(!index.match_nickname("nitro free").matched);
    }

    #[test]
    fn test_invalid_regex_degrades_to_substring() {
        let index = MatchIndex::with_lists(Vec::<String>::new(), &[NicknamePattern::regex("vip[")]);
        assert_eq!(index.degraded_patterns(), vec!["vip["]);
        assert!(index.match_nickname("super VIP[ member").matched);
        assert!(!index.match_nickname("vip member").matched);
    }

    #[test]
    fn test_first_pattern_wins() {
        let index = MatchIndex::with_lists(
            Vec::<String>::new(),
            &[
                NicknamePattern::contains("bot"),
                NicknamePattern::regex("b.t"),
            ],
        );
        let result = index.match_nickname("robot");
        assert_eq!(result.matched_pattern.as_deref(), Some("bot"));
    }

    #[test]
    fn test_empty_patterns_are_dropped() {
        let index = MatchIndex::with_lists(
            Vec::<String>::new(),
            &[NicknamePattern::contains("  "), NicknamePattern::regex("")],
        );
        assert_eq!(index.pattern_count(), 0);
        assert!(!index.match_nickname("anything").matched);
    }

    #[test]
    fn test_identifier_takes_priority() {
        let index = MatchIndex::with_lists(["111"], &[NicknamePattern::contains("alice")]);
        let result = index.classify("111", "Alice");
        assert_eq!(result.reason, Some(MatchReason::IdentifierBlacklist));
        assert!(result.matched_pattern.is_none());
    }

    #[test]
    fn test_clones_share_snapshot() {
        let index = MatchIndex::new();
        let reader = index.clone();
        index.load(["999"], &[]);
        assert!(reader.match_identifier("999"));
    }

    #[test]
    fn test_listing_reports_degraded_patterns() {
        let index = MatchIndex::with_lists(
            ["222", "111"],
            &[NicknamePattern::contains("spam"), NicknamePattern::regex("vip[")],
        );
        let listing = index.listing();
        assert_eq!(listing.identifiers, vec!["111", "222"]);
        assert_eq!(listing.pattern_count, 2);
        assert_eq!(listing.degraded, vec!["vip["]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_mixed_lists_during_reloads() {
        // List A flags "x" by identifier; list B has no identifiers and flags
        // "beta". The name matches both "alpha" (only in A) and "beta" (only in
        // B), so a read mixing A's identifiers with B's patterns would come
        // back unmatched, and B's identifiers with A's patterns as "alpha".
        let alpha = [NicknamePattern::contains("alpha")];
        let beta = [NicknamePattern::contains("beta")];
        let index = MatchIndex::with_lists(["x"], &alpha);
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let index = index.clone();
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let mut reads = 0_u32;
                    while !done.load(std::sync::atomic::Ordering::Relaxed) {
                        let result = index.classify("x", "beta alpha");
                        assert!(
                            result == MatchResult::identifier()
                                || result == MatchResult::nickname("beta"),
                            "mixed read: {result:?}"
                        );
                        reads += 1;
                        if reads % 64 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    reads
                })
            })
            .collect();

        for round in 0..500 {
            if round % 2 == 0 {
                index.load(Vec::<String>::new(), &beta);
            } else {
                index.load(["x"], &alpha);
            }
            tokio::task::yield_now().await;
        }
        done.store(true, std::sync::atomic::Ordering::Relaxed);

        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(MatchResult::identifier().describe(), "identifier blacklist");
        assert_eq!(
            MatchResult::nickname("spam").describe(),
            "nickname matches \"spam\""
        );
    }
}
