//! Reddit implementation of [`ContentSource`].
//!
//! Talks to the public OAuth API with application-only (client
//! credentials) auth. The access token is an explicit short-lived
//! credential held by the source — it carries its own expiry and is
//! refreshed on demand, never cached process-wide.
//!
//! # Environment Variables
//!
//! - `REDDIT_CLIENT_ID` — required
//! - `REDDIT_CLIENT_SECRET` — required
//!
//! # Endpoints
//!
//! | Call | Endpoint |
//! |------|----------|
//! | token | `POST https://www.reddit.com/api/v1/access_token` |
//! | listing | `GET https://oauth.reddit.com/r/{name}/new` |
//! | metadata | `GET https://oauth.reddit.com/r/{name}/about` |
//! | replies | `GET https://oauth.reddit.com/r/{name}/comments/{id}` |
//!
//! Listings paginate with `after` fullname tokens. Comment trees arrive
//! nested; they are flattened here, skipping `[deleted]`/`[removed]`
//! bodies and unexpanded `more` stubs (delta harvests do not chase them).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{Credentials, UpstreamConfig};
use crate::models::{CommunityInfo, RawItem, RawReply};
use crate::source::{ContentSource, Page, SourceError};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// Refresh this many seconds before the token's stated expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// A short-lived bearer credential with its own expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in_secs: i64) -> Self {
        Self {
            value: value.into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + chrono::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

pub struct RedditSource {
    client: reqwest::Client,
    creds: Credentials,
    token: Mutex<Option<AccessToken>>,
}

impl RedditSource {
    pub fn new(creds: Credentials, upstream: &UpstreamConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(upstream.user_agent.clone())
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            creds,
            token: Mutex::new(None),
        })
    }

    /// Return a valid bearer token, refreshing if missing or expired.
    async fn bearer(&self) -> Result<String, SourceError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if !token.is_expired() {
                return Ok(token.value.clone());
            }
        }

        debug!("refreshing access token");
        let resp = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!(
                "token endpoint rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            return Err(status_error(status.as_u16()));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("token response: {e}")))?;
        let token = AccessToken::new(body.access_token, body.expires_in);
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked out from under us; drop it so the next call
            // refreshes.
            *self.token.lock().await = None;
            return Err(SourceError::Auth("bearer token rejected".to_string()));
        }
        if !status.is_success() {
            return Err(status_error(status.as_u16()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(format!("{path}: {e}")))
    }
}

fn classify_transport(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Transport(e)
    }
}

fn status_error(status: u16) -> SourceError {
    match status {
        404 => SourceError::NotFound("upstream returned 404".to_string()),
        403 => SourceError::Forbidden("upstream returned 403".to_string()),
        429 => SourceError::RateLimited,
        s if s >= 500 => SourceError::Server { status: s },
        s => SourceError::Malformed(format!("unexpected status {s}")),
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn community_info(&self, community: &str) -> Result<CommunityInfo, SourceError> {
        let about: Thing<AboutData> = self
            .get_json(&format!("/r/{community}/about"), &[("raw_json", "1".into())])
            .await
            .map_err(|e| match e {
                SourceError::NotFound(_) => {
                    SourceError::NotFound(format!("community '{community}' not found"))
                }
                SourceError::Forbidden(_) => {
                    SourceError::Forbidden(format!("community '{community}' is private"))
                }
                other => other,
            })?;

        let data = about.data;
        Ok(CommunityInfo {
            title: data.title.filter(|t| !t.is_empty()),
            subscribers: data.subscribers,
            description: data
                .public_description
                .filter(|d| !d.is_empty())
                .map(|d| d.chars().take(500).collect()),
        })
    }

    async fn list_newest(
        &self,
        community: &str,
        page_token: Option<&str>,
        limit: u32,
    ) -> Result<Page, SourceError> {
        let mut query = vec![
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = page_token {
            query.push(("after", after.to_string()));
        }

        let listing: Thing<Listing<Thing<PostData>>> = self
            .get_json(&format!("/r/{community}/new"), &query)
            .await?;

        let items = listing
            .data
            .children
            .into_iter()
            .map(|child| post_to_item(child.data))
            .collect();

        Ok(Page {
            items,
            next_token: listing.data.after,
        })
    }

    async fn list_replies(
        &self,
        community: &str,
        item_id: &str,
    ) -> Result<Vec<RawReply>, SourceError> {
        // The comments endpoint returns [post listing, comment listing].
        let listings: Vec<serde_json::Value> = self
            .get_json(
                &format!("/r/{community}/comments/{item_id}"),
                &[("limit", "500".into()), ("raw_json", "1".into())],
            )
            .await?;

        let comment_listing = listings
            .into_iter()
            .nth(1)
            .ok_or_else(|| SourceError::Malformed("comments response missing listing".into()))?;

        let mut replies = Vec::new();
        flatten_comments(&comment_listing, 0, &mut replies);
        Ok(replies)
    }
}

fn post_to_item(post: PostData) -> RawItem {
    RawItem {
        platform_id: post.id,
        title: post.title,
        body: post.selftext.unwrap_or_default(),
        author: post.author.unwrap_or_else(|| "[deleted]".to_string()),
        score: post.score,
        upvote_ratio: post.upvote_ratio,
        reply_count: post.num_comments,
        created_utc: post.created_utc as i64,
        url: post.url,
        permalink: post.permalink,
    }
}

/// Walk a comment listing recursively, collecting harvestable replies.
/// Skips `more` stubs and deleted/removed bodies; nested `replies` fields
/// are either an empty string or another listing.
fn flatten_comments(listing: &serde_json::Value, depth: i64, out: &mut Vec<RawReply>) {
    let Some(children) = listing
        .get("data")
        .and_then(|d| d.get("children"))
        .and_then(|c| c.as_array())
    else {
        return;
    };

    for child in children {
        if child.get("kind").and_then(|k| k.as_str()) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };
        let body = data.get("body").and_then(|b| b.as_str()).unwrap_or("");
        if body.is_empty() || body == "[deleted]" || body == "[removed]" {
            // Thread below a tombstone can still hold live replies.
        } else if let Some(id) = data.get("id").and_then(|i| i.as_str()) {
            out.push(RawReply {
                platform_id: id.to_string(),
                parent_platform_id: data
                    .get("parent_id")
                    .and_then(|p| p.as_str())
                    .map(|p| p.to_string()),
                author: data
                    .get("author")
                    .and_then(|a| a.as_str())
                    .unwrap_or("[deleted]")
                    .to_string(),
                body: body.to_string(),
                score: data.get("score").and_then(|s| s.as_i64()).unwrap_or(0),
                created_utc: data
                    .get("created_utc")
                    .and_then(|c| c.as_f64())
                    .unwrap_or(0.0) as i64,
                depth,
            });
        }

        if let Some(nested) = data.get("replies") {
            if nested.is_object() {
                flatten_comments(nested, depth + 1, out);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    children: Vec<T>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AboutData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subscribers: Option<i64>,
    #[serde(default)]
    public_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    upvote_ratio: Option<f64>,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
}
