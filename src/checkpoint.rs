//! Checkpoint manager: decides how to harvest each community and records
//! progress after batches land.
//!
//! The plan decision is made exactly once here; downstream code receives a
//! resolved [`ResolvedMode`] and never re-interprets mode strings. A commit
//! is only valid after the corresponding batch has been durably stored, and
//! the watermark never moves backwards.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::HarvestConfig;
use crate::models::{HarvestMode, ResolvedMode, Watermark};
use crate::store;

/// Bounds one harvest call's upstream work.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub max_items: u32,
    pub max_pages: u32,
}

/// What the orchestrator should do for one community.
#[derive(Debug, Clone)]
pub struct HarvestPlan {
    pub mode: ResolvedMode,
    /// Resume point for delta walks. `None` walks until the budget or the
    /// upstream history runs out.
    pub resume: Option<Watermark>,
    pub reason: &'static str,
    pub budget: Budget,
}

/// Decide the harvest strategy for a community, in order: caller override,
/// first harvest (bounded), resume from checkpoint.
///
/// A brand-new community deliberately gets a bounded delta scan rather than
/// an unbounded historical crawl; callers needing full history must force
/// full mode.
pub async fn plan_harvest(
    pool: &SqlitePool,
    community_id: i64,
    override_mode: HarvestMode,
    harvest_cfg: &HarvestConfig,
    item_budget: Option<u32>,
) -> Result<HarvestPlan> {
    let checkpoint = store::get_checkpoint(pool, community_id).await?;
    let watermark = checkpoint.and_then(|cp| cp.watermark);

    let plan = match override_mode {
        HarvestMode::Full => HarvestPlan {
            mode: ResolvedMode::Full,
            resume: None,
            reason: "forced",
            budget: Budget {
                max_items: item_budget.unwrap_or(u32::MAX),
                max_pages: harvest_cfg.full_page_budget,
            },
        },
        HarvestMode::Delta => HarvestPlan {
            mode: ResolvedMode::Delta,
            resume: watermark,
            reason: "forced",
            budget: Budget {
                max_items: item_budget.unwrap_or(harvest_cfg.delta_max_items),
                max_pages: u32::MAX,
            },
        },
        HarvestMode::Auto => match watermark {
            None => HarvestPlan {
                mode: ResolvedMode::Delta,
                resume: None,
                reason: "first harvest (bounded)",
                budget: Budget {
                    max_items: item_budget.unwrap_or(harvest_cfg.first_harvest_limit),
                    max_pages: u32::MAX,
                },
            },
            Some(watermark) => HarvestPlan {
                mode: ResolvedMode::Delta,
                resume: Some(watermark),
                reason: "resume from checkpoint",
                budget: Budget {
                    max_items: item_budget.unwrap_or(harvest_cfg.delta_max_items),
                    max_pages: u32::MAX,
                },
            },
        },
    };

    Ok(plan)
}

/// Advance the checkpoint after a batch has been durably stored.
///
/// Monotonic: if `newest` is not strictly newer than the stored watermark
/// (or there is nothing new to record), only the harvest timestamp and
/// cumulative counters are refreshed. Committing the same watermark twice
/// is therefore a no-op beyond the timestamp.
pub async fn commit(
    pool: &SqlitePool,
    community_id: i64,
    newest: Option<&Watermark>,
    items_stored: u64,
    replies_stored: u64,
    mode: ResolvedMode,
) -> Result<()> {
    let current = store::get_checkpoint(pool, community_id)
        .await?
        .and_then(|cp| cp.watermark);

    let advance = match (newest, &current) {
        (Some(newest), Some(current)) => newest.is_newer_than(current),
        (Some(_), None) => true,
        (None, _) => false,
    };

    if advance {
        // Unwrap is safe: advance implies newest is Some.
        let newest = newest.unwrap();
        store::put_checkpoint(
            pool,
            community_id,
            newest,
            items_stored,
            replies_stored,
            mode.as_str(),
        )
        .await?;
    } else {
        store::touch_checkpoint(pool, community_id, items_stored, replies_stored, mode.as_str())
            .await?;
    }
    Ok(())
}

/// Clear a community's watermark so the next harvest behaves as
/// first-time. Operator action, used when history must be re-walked.
pub async fn reset(pool: &SqlitePool, community_id: i64) -> Result<()> {
    store::clear_checkpoint(pool, community_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::CommunityInfo;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool, i64) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("cp.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let cid = store::upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();
        (tmp, pool, cid)
    }

    fn cfg() -> HarvestConfig {
        HarvestConfig::default()
    }

    #[tokio::test]
    async fn first_harvest_is_bounded_delta() {
        let (_tmp, pool, cid) = test_pool().await;
        let plan = plan_harvest(&pool, cid, HarvestMode::Auto, &cfg(), None)
            .await
            .unwrap();
        assert_eq!(plan.mode, ResolvedMode::Delta);
        assert!(plan.resume.is_none());
        assert_eq!(plan.reason, "first harvest (bounded)");
        assert_eq!(plan.budget.max_items, cfg().first_harvest_limit);
    }

    #[tokio::test]
    async fn later_harvests_resume_from_watermark() {
        let (_tmp, pool, cid) = test_pool().await;
        commit(
            &pool,
            cid,
            Some(&Watermark::new("abc", 100)),
            3,
            0,
            ResolvedMode::Delta,
        )
        .await
        .unwrap();

        let plan = plan_harvest(&pool, cid, HarvestMode::Auto, &cfg(), None)
            .await
            .unwrap();
        assert_eq!(plan.mode, ResolvedMode::Delta);
        assert_eq!(plan.resume, Some(Watermark::new("abc", 100)));
        assert_eq!(plan.reason, "resume from checkpoint");
    }

    #[tokio::test]
    async fn forced_full_ignores_checkpoint() {
        let (_tmp, pool, cid) = test_pool().await;
        commit(
            &pool,
            cid,
            Some(&Watermark::new("abc", 100)),
            3,
            0,
            ResolvedMode::Delta,
        )
        .await
        .unwrap();

        let plan = plan_harvest(&pool, cid, HarvestMode::Full, &cfg(), None)
            .await
            .unwrap();
        assert_eq!(plan.mode, ResolvedMode::Full);
        assert!(plan.resume.is_none());
        assert_eq!(plan.reason, "forced");
        assert_eq!(plan.budget.max_pages, cfg().full_page_budget);
    }

    #[tokio::test]
    async fn item_budget_override_wins() {
        let (_tmp, pool, cid) = test_pool().await;
        let plan = plan_harvest(&pool, cid, HarvestMode::Auto, &cfg(), Some(50))
            .await
            .unwrap();
        assert_eq!(plan.budget.max_items, 50);
    }

    #[tokio::test]
    async fn commit_never_moves_watermark_backwards() {
        let (_tmp, pool, cid) = test_pool().await;
        commit(
            &pool,
            cid,
            Some(&Watermark::new("abd", 200)),
            1,
            0,
            ResolvedMode::Delta,
        )
        .await
        .unwrap();

        // An older watermark (e.g. from a forced full walk) does not regress.
        commit(
            &pool,
            cid,
            Some(&Watermark::new("abc", 100)),
            1,
            0,
            ResolvedMode::Full,
        )
        .await
        .unwrap();

        let cp = store::get_checkpoint(&pool, cid).await.unwrap().unwrap();
        assert_eq!(cp.watermark, Some(Watermark::new("abd", 200)));
        // Counters still accumulated and the mode was recorded.
        assert_eq!(cp.item_count, 2);
        assert_eq!(cp.last_mode.as_deref(), Some("full"));
    }

    #[tokio::test]
    async fn commit_same_watermark_is_idempotent() {
        let (_tmp, pool, cid) = test_pool().await;
        let wm = Watermark::new("abc", 100);
        commit(&pool, cid, Some(&wm), 5, 2, ResolvedMode::Delta)
            .await
            .unwrap();
        commit(&pool, cid, Some(&wm), 0, 0, ResolvedMode::Delta)
            .await
            .unwrap();

        let cp = store::get_checkpoint(&pool, cid).await.unwrap().unwrap();
        assert_eq!(cp.watermark, Some(wm));
        assert_eq!(cp.item_count, 5);
        assert_eq!(cp.reply_count, 2);
    }

    #[tokio::test]
    async fn reset_restores_first_time_planning() {
        let (_tmp, pool, cid) = test_pool().await;
        commit(
            &pool,
            cid,
            Some(&Watermark::new("abc", 100)),
            3,
            0,
            ResolvedMode::Delta,
        )
        .await
        .unwrap();

        reset(&pool, cid).await.unwrap();

        let plan = plan_harvest(&pool, cid, HarvestMode::Auto, &cfg(), None)
            .await
            .unwrap();
        assert!(plan.resume.is_none());
        assert_eq!(plan.reason, "first harvest (bounded)");
    }
}
