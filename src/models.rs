//! Core data models used throughout delta-harvest.
//!
//! These types represent the communities, items, and replies that flow
//! through the harvesting pipeline, plus the checkpoint/watermark types the
//! delta engine keeps between runs.

use chrono::{DateTime, Utc};

/// A top-level post fetched from the upstream listing, before storage.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub platform_id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub upvote_ratio: Option<f64>,
    pub reply_count: i64,
    pub created_utc: i64,
    pub url: Option<String>,
    pub permalink: Option<String>,
}

/// A comment fetched for one item, before storage.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub platform_id: String,
    pub parent_platform_id: Option<String>,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: i64,
    pub depth: i64,
}

/// Community metadata as reported by the upstream source.
#[derive(Debug, Clone, Default)]
pub struct CommunityInfo {
    pub title: Option<String>,
    pub subscribers: Option<i64>,
    pub description: Option<String>,
}

/// A community row as stored in SQLite.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Community {
    pub id: i64,
    pub name: String,
    pub title: Option<String>,
    pub subscribers: Option<i64>,
    pub description: Option<String>,
    pub first_seen_at: i64,
    pub updated_at: i64,
}

/// The resume point persisted per community.
///
/// Ordering is `(created_utc, id)`: creation time first, platform id as the
/// tiebreak when the upstream returns identical timestamps. Reddit-style
/// base36 ids grow with creation order, so id comparison is numeric
/// (shorter ids are older; equal lengths compare lexicographically).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub platform_id: String,
    pub created_utc: i64,
}

impl Watermark {
    pub fn new(platform_id: impl Into<String>, created_utc: i64) -> Self {
        Self {
            platform_id: platform_id.into(),
            created_utc,
        }
    }

    /// True if `self` is strictly newer than `other` in the platform ordering.
    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        match self.created_utc.cmp(&other.created_utc) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => id_newer(&self.platform_id, &other.platform_id),
        }
    }
}

/// Compare two base36 platform ids by creation order: `a` newer than `b`.
pub fn id_newer(a: &str, b: &str) -> bool {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a > b,
    }
}

/// A checkpoint row, 1:1 with a community.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub community_id: i64,
    /// Newest item observed by the last successful harvest. `None` means
    /// the next harvest behaves as first-time.
    pub watermark: Option<Watermark>,
    pub last_harvest_at: Option<i64>,
    pub item_count: i64,
    pub reply_count: i64,
    pub last_mode: Option<String>,
}

/// Caller-selectable harvest mode. `Auto` resolves to `Delta` or `Full`
/// exactly once during planning; downstream code never re-interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestMode {
    Auto,
    Delta,
    Full,
}

/// The mode a plan actually resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Delta,
    Full,
}

impl ResolvedMode {
    /// String form used for checkpoint storage and reporting.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedMode::Delta => "delta",
            ResolvedMode::Full => "full",
        }
    }
}

/// Why the fetch cursor stopped walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Hit the resume point — everything older is already stored.
    CaughtUp,
    /// Page or item budget exhausted; more content may remain upstream.
    BudgetExhausted,
    /// Upstream returned an empty page or no continuation token.
    SourceExhausted,
}

impl StopReason {
    pub fn describe(&self) -> &'static str {
        match self {
            StopReason::CaughtUp => "caught up to checkpoint",
            StopReason::BudgetExhausted => "budget exhausted, more may remain",
            StopReason::SourceExhausted => "exhausted upstream history",
        }
    }
}

/// Outcome of harvesting a single community.
#[derive(Debug)]
pub enum HarvestOutcome {
    Done {
        community: String,
        mode: ResolvedMode,
        reason: &'static str,
        items_new: u64,
        replies_new: u64,
        items_total_in_store: i64,
        stop: StopReason,
    },
    Failed {
        community: String,
        error: anyhow::Error,
    },
}

/// Aggregate result of one `harvest()` call across communities.
#[derive(Debug, Default)]
pub struct HarvestSummary {
    pub outcomes: Vec<HarvestOutcome>,
    pub communities_done: usize,
    pub communities_failed: usize,
    pub items_new: u64,
    pub replies_new: u64,
    pub all_delta: bool,
}

/// Aggregate store counts for reporting.
#[derive(Debug)]
pub struct StoreStats {
    pub total_communities: i64,
    pub total_items: i64,
    pub total_replies: i64,
    pub per_community: Vec<CommunityStats>,
}

/// Per-community breakdown row.
#[derive(Debug)]
pub struct CommunityStats {
    pub name: String,
    pub item_count: i64,
    pub reply_count: i64,
    pub newest_item_utc: Option<i64>,
    pub last_harvest_at: Option<i64>,
    pub last_mode: Option<String>,
}

/// Timestamp helper for display. Falls back to the epoch for out-of-range
/// values rather than failing a report.
pub fn utc_from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
