//! Fetch cursor: walks a community's newest-first listing page by page.
//!
//! The walk stops at the first of: the resume point's id is encountered
//! (caught up — that item and everything older is dropped), the item or
//! page budget runs out, or the upstream has no more history. The cursor
//! does not assume the upstream returns items in strict order; it tracks
//! the maximum watermark seen across the whole walk, and that maximum is
//! what the orchestrator commits.
//!
//! Transient upstream errors (rate limit, timeout, 5xx) are retried here
//! with exponential backoff up to a bounded attempt count. A configurable
//! politeness delay runs between pages.

use std::time::Duration;

use tracing::{debug, warn};

use crate::checkpoint::Budget;
use crate::config::UpstreamConfig;
use crate::models::{RawItem, StopReason, Watermark};
use crate::source::{ContentSource, Page, SourceError};

#[derive(Debug, Clone)]
pub struct CursorConfig {
    pub page_size: u32,
    pub pacing: Duration,
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub retry_base: Duration,
}

impl From<&UpstreamConfig> for CursorConfig {
    fn from(cfg: &UpstreamConfig) -> Self {
        Self {
            page_size: cfg.page_size,
            pacing: Duration::from_millis(cfg.pacing_ms),
            max_retries: cfg.max_retries,
            retry_base: Duration::from_millis(500),
        }
    }
}

pub struct Cursor<'a, S: ContentSource + ?Sized> {
    source: &'a S,
    community: &'a str,
    resume: Option<Watermark>,
    budget: Budget,
    cfg: CursorConfig,

    page_token: Option<String>,
    pages_fetched: u32,
    items_yielded: u32,
    newest: Option<Watermark>,
    stopped: Option<StopReason>,
}

impl<'a, S: ContentSource + ?Sized> Cursor<'a, S> {
    pub fn new(
        source: &'a S,
        community: &'a str,
        resume: Option<Watermark>,
        budget: Budget,
        cfg: CursorConfig,
    ) -> Self {
        Self {
            source,
            community,
            resume,
            budget,
            cfg,
            page_token: None,
            pages_fetched: 0,
            items_yielded: 0,
            newest: None,
            stopped: None,
        }
    }

    /// Yield the next batch of unseen items, or `None` once a stop
    /// condition has been reached. After `None`, [`stop_reason`] says which
    /// terminal condition ended the walk.
    ///
    /// [`stop_reason`]: Cursor::stop_reason
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawItem>>, SourceError> {
        if self.stopped.is_some() {
            return Ok(None);
        }

        if self.pages_fetched >= self.budget.max_pages {
            self.stopped = Some(StopReason::BudgetExhausted);
            return Ok(None);
        }

        if self.pages_fetched > 0 && !self.cfg.pacing.is_zero() {
            tokio::time::sleep(self.cfg.pacing).await;
        }

        let page = self.fetch_page_with_retry().await?;
        self.pages_fetched += 1;

        let mut kept = Vec::with_capacity(page.items.len());
        for item in page.items {
            if let Some(resume) = &self.resume {
                if item.platform_id == resume.platform_id {
                    debug!(
                        community = self.community,
                        item = %item.platform_id,
                        "reached resume point"
                    );
                    self.stopped = Some(StopReason::CaughtUp);
                    break;
                }
            }

            let mark = Watermark::new(item.platform_id.clone(), item.created_utc);
            match &self.newest {
                Some(current) if !mark.is_newer_than(current) => {}
                _ => self.newest = Some(mark),
            }

            kept.push(item);
            self.items_yielded += 1;
            if self.items_yielded >= self.budget.max_items {
                self.stopped = Some(StopReason::BudgetExhausted);
                break;
            }
        }

        if self.stopped.is_none() {
            match page.next_token {
                Some(token) if !kept.is_empty() => self.page_token = Some(token),
                _ => self.stopped = Some(StopReason::SourceExhausted),
            }
        }

        if kept.is_empty() {
            // Nothing new on this page and a stop condition is set.
            return Ok(None);
        }
        Ok(Some(kept))
    }

    async fn fetch_page_with_retry(&self) -> Result<Page, SourceError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .source
                .list_newest(
                    self.community,
                    self.page_token.as_deref(),
                    self.cfg.page_size,
                )
                .await;

            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let delay = self.cfg.retry_base * 2u32.saturating_pow(attempt);
                    warn!(
                        community = self.community,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch one item's replies under the same retry policy the listing
    /// walk uses.
    pub async fn fetch_replies_with_retry(
        &self,
        item_id: &str,
    ) -> Result<Vec<crate::models::RawReply>, SourceError> {
        let mut attempt = 0u32;
        loop {
            match self.source.list_replies(self.community, item_id).await {
                Ok(replies) => return Ok(replies),
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let delay = self.cfg.retry_base * 2u32.saturating_pow(attempt);
                    warn!(
                        community = self.community,
                        item = item_id,
                        attempt = attempt + 1,
                        error = %e,
                        "transient error fetching replies, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Which terminal condition ended the walk. `None` while still walking.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Maximum watermark observed across the whole walk, regardless of the
    /// order the upstream returned items in.
    pub fn newest_seen(&self) -> Option<&Watermark> {
        self.newest.as_ref()
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }
}
