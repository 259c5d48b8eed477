//! The upstream-source seam.
//!
//! The harvest engine talks to the content platform exclusively through
//! [`ContentSource`], which mirrors the platform's two read operations:
//! list the newest items of a community (token-paginated, newest first) and
//! list the replies of one item. Implement this trait to plug in a real
//! platform client or a scripted source for tests.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CommunityInfo, RawItem, RawReply};

/// Errors an upstream call can produce, split into retryable and
/// non-retryable classes. The fetch cursor retries transient errors with
/// backoff; permanent errors fail the community immediately.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream server error: {status}")]
    Server { status: u16 },

    #[error("community not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected upstream response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl SourceError {
    /// Transient errors are worth retrying; anything else is permanent for
    /// the current community.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::RateLimited | SourceError::Timeout | SourceError::Server { .. } => true,
            SourceError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// One page of the newest-first listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RawItem>,
    /// Continuation token for the next (older) page. `None` means the
    /// upstream history is exhausted.
    pub next_token: Option<String>,
}

/// A paginated read-only view of one content platform.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch community metadata. Fails with [`SourceError::NotFound`] /
    /// [`SourceError::Forbidden`] for missing or private communities.
    async fn community_info(&self, community: &str) -> Result<CommunityInfo, SourceError>;

    /// One page of the community's newest items, strictly newer pages
    /// first. `page_token` of `None` starts at the newest item.
    async fn list_newest(
        &self,
        community: &str,
        page_token: Option<&str>,
        limit: u32,
    ) -> Result<Page, SourceError>;

    /// All harvestable replies for one item, flattened. Implementations
    /// skip deleted/removed bodies and unexpanded "load more" stubs.
    async fn list_replies(
        &self,
        community: &str,
        item_id: &str,
    ) -> Result<Vec<RawReply>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SourceError::RateLimited.is_transient());
        assert!(SourceError::Timeout.is_transient());
        assert!(SourceError::Server { status: 503 }.is_transient());
        assert!(!SourceError::NotFound("x".into()).is_transient());
        assert!(!SourceError::Forbidden("x".into()).is_transient());
        assert!(!SourceError::Auth("bad secret".into()).is_transient());
    }
}
