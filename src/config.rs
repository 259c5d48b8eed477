use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub communities: CommunitiesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Items requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Politeness delay between listing pages, in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            page_size: default_page_size(),
            pacing_ms: default_pacing_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    "delta-harvest/0.3".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_pacing_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Item cap for a community's very first harvest. First harvests are
    /// bounded delta scans, not full history walks; callers wanting full
    /// history must force full mode.
    #[serde(default = "default_first_harvest_limit")]
    pub first_harvest_limit: u32,
    /// Item cap for delta harvests against an existing checkpoint.
    #[serde(default = "default_delta_max_items")]
    pub delta_max_items: u32,
    /// Page-count budget for forced full harvests.
    #[serde(default = "default_full_page_budget")]
    pub full_page_budget: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            first_harvest_limit: default_first_harvest_limit(),
            delta_max_items: default_delta_max_items(),
            full_page_budget: default_full_page_budget(),
        }
    }
}

fn default_first_harvest_limit() -> u32 {
    200
}
fn default_delta_max_items() -> u32 {
    200
}
fn default_full_page_budget() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommunitiesConfig {
    /// Communities harvested when none are named on the command line.
    #[serde(default)]
    pub defaults: Vec<String>,
}

/// API credentials, read from the environment rather than the config file.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    /// Read `REDDIT_CLIENT_ID` / `REDDIT_CLIENT_SECRET`. Missing values are
    /// a configuration-class error: the whole harvest call fails before any
    /// community is planned.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("REDDIT_CLIENT_ID")
            .context("REDDIT_CLIENT_ID not set in environment")?;
        let client_secret = std::env::var("REDDIT_CLIENT_SECRET")
            .context("REDDIT_CLIENT_SECRET not set in environment")?;
        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Validate a community name before any upstream call is made. Platform
/// names are 2-21 characters of letters, digits, and underscores.
pub fn validate_community_name(name: &str) -> Result<()> {
    let ok = (2..=21).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        anyhow::bail!("invalid community name: '{}'", name);
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.upstream.page_size == 0 || config.upstream.page_size > 100 {
        anyhow::bail!("upstream.page_size must be in 1..=100");
    }

    if config.harvest.first_harvest_limit == 0 {
        anyhow::bail!("harvest.first_harvest_limit must be > 0");
    }

    if config.harvest.delta_max_items == 0 {
        anyhow::bail!("harvest.delta_max_items must be > 0");
    }

    if config.harvest.full_page_budget == 0 {
        anyhow::bail!("harvest.full_page_budget must be > 0");
    }

    for name in &config.communities.defaults {
        validate_community_name(name)?;
    }

    Ok(config)
}
