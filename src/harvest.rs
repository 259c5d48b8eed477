//! Harvest orchestration.
//!
//! Carries each target community through the planning → fetching → storing
//! → committing sequence, with failure isolation between communities: one
//! community's error is captured in its result record and the batch moves
//! on. The checkpoint is only advanced after its batch has committed to
//! storage, so an interrupted run re-fetches a small overlap window that
//! idempotent upserts absorb.

use anyhow::Result;
use tracing::{error, info};

use crate::checkpoint;
use crate::config::{self, Config};
use crate::cursor::{Cursor, CursorConfig};
use crate::models::{
    HarvestMode, HarvestOutcome, HarvestSummary, RawReply, ResolvedMode, StopReason,
};
use crate::source::ContentSource;
use crate::store;

/// Harvest a batch of communities sequentially.
///
/// Community names are validated up front; an invalid name is a
/// configuration error and aborts the whole call before any community is
/// planned. Everything after that is per-community and isolated.
pub async fn run_harvest(
    pool: &sqlx::SqlitePool,
    source: &dyn ContentSource,
    config: &Config,
    communities: &[String],
    mode: HarvestMode,
    item_budget: Option<u32>,
    dry_run: bool,
) -> Result<HarvestSummary> {
    for name in communities {
        config::validate_community_name(name)?;
    }

    let mut summary = HarvestSummary {
        all_delta: true,
        ..Default::default()
    };

    for (i, name) in communities.iter().enumerate() {
        println!(
            "[{}/{}] harvesting {}",
            i + 1,
            communities.len(),
            name
        );

        let outcome = harvest_one(pool, source, config, name, mode, item_budget, dry_run).await;

        match &outcome {
            HarvestOutcome::Done {
                mode,
                reason,
                items_new,
                replies_new,
                stop,
                ..
            } => {
                summary.communities_done += 1;
                summary.items_new += items_new;
                summary.replies_new += replies_new;
                if *mode == ResolvedMode::Full {
                    summary.all_delta = false;
                }
                match (mode, items_new) {
                    (ResolvedMode::Full, _) => {
                        println!("  full scan completed: +{} items, +{} replies", items_new, replies_new)
                    }
                    (ResolvedMode::Delta, 0) => println!("  delta: nothing new"),
                    (ResolvedMode::Delta, n) => {
                        println!("  delta: +{} items, +{} replies", n, replies_new)
                    }
                }
                println!("  reason: {} | stop: {}", reason, stop.describe());
            }
            HarvestOutcome::Failed { error, .. } => {
                summary.communities_failed += 1;
                println!("  failed: {:#}", error);
            }
        }

        summary.outcomes.push(outcome);
    }

    if summary.outcomes.is_empty() {
        summary.all_delta = false;
    }

    println!();
    println!(
        "harvest summary: {} done, {} failed, +{} items, +{} replies{}",
        summary.communities_done,
        summary.communities_failed,
        summary.items_new,
        summary.replies_new,
        if summary.all_delta && summary.communities_done > 0 {
            " (all delta)"
        } else {
            ""
        }
    );

    Ok(summary)
}

/// Carry one community through its state machine. Every error becomes a
/// `Failed` outcome; the checkpoint is never touched on failure.
async fn harvest_one(
    pool: &sqlx::SqlitePool,
    source: &dyn ContentSource,
    config: &Config,
    name: &str,
    mode: HarvestMode,
    item_budget: Option<u32>,
    dry_run: bool,
) -> HarvestOutcome {
    match harvest_one_inner(pool, source, config, name, mode, item_budget, dry_run).await {
        Ok(outcome) => outcome,
        Err(error) => {
            error!(community = name, error = %error, "harvest failed");
            HarvestOutcome::Failed {
                community: name.to_string(),
                error,
            }
        }
    }
}

async fn harvest_one_inner(
    pool: &sqlx::SqlitePool,
    source: &dyn ContentSource,
    config: &Config,
    name: &str,
    mode: HarvestMode,
    item_budget: Option<u32>,
    dry_run: bool,
) -> Result<HarvestOutcome> {
    // Planning: confirm the community exists upstream, refresh its
    // metadata, and pick a strategy from the checkpoint.
    let info = source.community_info(name).await?;
    let community_id = store::upsert_community(pool, name, &info).await?;
    let plan =
        checkpoint::plan_harvest(pool, community_id, mode, &config.harvest, item_budget).await?;

    info!(
        community = name,
        mode = plan.mode.as_str(),
        reason = plan.reason,
        resume = plan.resume.as_ref().map(|w| w.platform_id.as_str()),
        "planned harvest"
    );

    if dry_run {
        println!(
            "  plan: {} ({}), resume at {}, up to {} items / {} pages",
            plan.mode.as_str(),
            plan.reason,
            plan.resume
                .as_ref()
                .map(|w| w.platform_id.as_str())
                .unwrap_or("newest"),
            plan.budget.max_items,
            plan.budget.max_pages,
        );
        return Ok(HarvestOutcome::Done {
            community: name.to_string(),
            mode: plan.mode,
            reason: plan.reason,
            items_new: 0,
            replies_new: 0,
            items_total_in_store: store::item_total(pool, community_id).await?,
            stop: StopReason::CaughtUp,
        });
    }

    // Fetching: drive the cursor to one of its stop conditions,
    // accumulating items and their replies.
    let mut cursor = Cursor::new(
        source,
        name,
        plan.resume.clone(),
        plan.budget,
        CursorConfig::from(&config.upstream),
    );

    let mut items = Vec::new();
    let mut replies: Vec<(String, Vec<RawReply>)> = Vec::new();
    let mut fetched = 0usize;

    while let Some(batch) = cursor.next_batch().await? {
        for item in batch {
            let item_replies = cursor.fetch_replies_with_retry(&item.platform_id).await?;
            if !item_replies.is_empty() {
                replies.push((item.platform_id.clone(), item_replies));
            }
            items.push(item);
            fetched += 1;
            if fetched % 25 == 0 {
                info!(community = name, fetched, "walk in progress");
            }
        }
    }

    let stop = cursor
        .stop_reason()
        .unwrap_or(StopReason::SourceExhausted);
    let newest = cursor.newest_seen().cloned();

    // Storing: the whole batch lands atomically, then and only then the
    // checkpoint advances.
    let written = store::store_batch(pool, community_id, &items, &replies).await?;
    checkpoint::commit(
        pool,
        community_id,
        newest.as_ref(),
        written.items_new,
        written.replies_new,
        plan.mode,
    )
    .await?;

    info!(
        community = name,
        items_new = written.items_new,
        replies_new = written.replies_new,
        stop = stop.describe(),
        "harvest committed"
    );

    Ok(HarvestOutcome::Done {
        community: name.to_string(),
        mode: plan.mode,
        reason: plan.reason,
        items_new: written.items_new,
        replies_new: written.replies_new,
        items_total_in_store: store::item_total(pool, community_id).await?,
        stop,
    })
}

/// Clear a community's checkpoint so the next harvest behaves as
/// first-time. The community must already be known to the store.
pub async fn reset_checkpoint(pool: &sqlx::SqlitePool, name: &str) -> Result<()> {
    config::validate_community_name(name)?;
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM communities WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    match id {
        Some(id) => checkpoint::reset(pool, id).await,
        None => anyhow::bail!("unknown community: '{}'", name),
    }
}
