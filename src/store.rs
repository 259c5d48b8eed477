//! Storage layer: durable tables for communities, items, replies, and
//! checkpoints.
//!
//! All writes are keyed by natural keys — `communities.name`,
//! `items(community_id, platform_id)`, `replies(item_id, platform_id)` —
//! and use `ON CONFLICT ... DO UPDATE` so re-fetching an already-stored row
//! updates mutable fields in place and never duplicates. One harvest batch
//! (items plus their replies) lands in a single transaction: either all of
//! it commits or none of it does, which is what lets the checkpoint manager
//! promise "commit only after store".

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::models::{
    Checkpoint, CommunityInfo, CommunityStats, RawItem, RawReply, StoreStats, Watermark,
};

/// Counts produced by one atomic batch write.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchWritten {
    pub items_new: u64,
    pub replies_new: u64,
}

/// Get or create a community by name, opportunistically refreshing any
/// metadata the upstream reported. Returns the row id.
pub async fn upsert_community(
    pool: &SqlitePool,
    name: &str,
    info: &CommunityInfo,
) -> Result<i64> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO communities (name, title, subscribers, description, first_seen_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            title = COALESCE(excluded.title, title),
            subscribers = COALESCE(excluded.subscribers, subscribers),
            description = COALESCE(excluded.description, description),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(&info.title)
    .bind(info.subscribers)
    .bind(&info.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM communities WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Store one harvest batch atomically: all items and their replies, or
/// nothing. Duplicate keys within the input are tolerated (last write
/// wins); the new-row counts only count first sightings.
pub async fn store_batch(
    pool: &SqlitePool,
    community_id: i64,
    items: &[RawItem],
    replies: &[(String, Vec<RawReply>)],
) -> Result<BatchWritten> {
    let mut tx = pool.begin().await?;
    let now = Utc::now().timestamp();
    let mut written = BatchWritten::default();

    for item in items {
        if upsert_item(&mut tx, community_id, item, now).await? {
            written.items_new += 1;
        }
    }

    for (item_platform_id, item_replies) in replies {
        let item_row_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM items WHERE community_id = ? AND platform_id = ?")
                .bind(community_id)
                .bind(item_platform_id)
                .fetch_optional(&mut *tx)
                .await?;
        // Replies for an item outside this batch and store are dropped;
        // the next walk over that item picks them up.
        let Some(item_row_id) = item_row_id else {
            continue;
        };
        for reply in item_replies {
            if upsert_reply(&mut tx, item_row_id, reply, now).await? {
                written.replies_new += 1;
            }
        }
    }

    tx.commit().await?;
    Ok(written)
}

/// Upsert one item inside the batch transaction. Returns true if the row
/// was not previously stored.
async fn upsert_item(
    tx: &mut Transaction<'_, Sqlite>,
    community_id: i64,
    item: &RawItem,
    now: i64,
) -> Result<bool> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM items WHERE community_id = ? AND platform_id = ?")
            .bind(community_id)
            .bind(&item.platform_id)
            .fetch_optional(&mut **tx)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO items (platform_id, community_id, title, body, author, score,
                           upvote_ratio, reply_count, created_utc, url, permalink,
                           harvested_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(community_id, platform_id) DO UPDATE SET
            body = excluded.body,
            score = excluded.score,
            upvote_ratio = excluded.upvote_ratio,
            reply_count = excluded.reply_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&item.platform_id)
    .bind(community_id)
    .bind(&item.title)
    .bind(&item.body)
    .bind(&item.author)
    .bind(item.score)
    .bind(item.upvote_ratio)
    .bind(item.reply_count)
    .bind(item.created_utc)
    .bind(&item.url)
    .bind(&item.permalink)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(existing.is_none())
}

/// Upsert one reply inside the batch transaction. Returns true if the row
/// was not previously stored.
async fn upsert_reply(
    tx: &mut Transaction<'_, Sqlite>,
    item_row_id: i64,
    reply: &RawReply,
    now: i64,
) -> Result<bool> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM replies WHERE item_id = ? AND platform_id = ?")
            .bind(item_row_id)
            .bind(&reply.platform_id)
            .fetch_optional(&mut **tx)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO replies (platform_id, item_id, parent_platform_id, author, body,
                             score, created_utc, depth, harvested_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(item_id, platform_id) DO UPDATE SET
            body = excluded.body,
            score = excluded.score,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&reply.platform_id)
    .bind(item_row_id)
    .bind(&reply.parent_platform_id)
    .bind(&reply.author)
    .bind(&reply.body)
    .bind(reply.score)
    .bind(reply.created_utc)
    .bind(reply.depth)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(existing.is_none())
}

pub async fn get_checkpoint(pool: &SqlitePool, community_id: i64) -> Result<Option<Checkpoint>> {
    let row = sqlx::query(
        r#"
        SELECT community_id, last_seen_id, last_seen_created_utc,
               last_harvest_at, item_count, reply_count, last_mode
        FROM checkpoints WHERE community_id = ?
        "#,
    )
    .bind(community_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let last_seen_id: Option<String> = row.get("last_seen_id");
        let last_seen_created: Option<i64> = row.get("last_seen_created_utc");
        let watermark = match (last_seen_id, last_seen_created) {
            (Some(id), Some(created)) => Some(Watermark::new(id, created)),
            _ => None,
        };
        Checkpoint {
            community_id: row.get("community_id"),
            watermark,
            last_harvest_at: row.get("last_harvest_at"),
            item_count: row.get("item_count"),
            reply_count: row.get("reply_count"),
            last_mode: row.get("last_mode"),
        }
    }))
}

/// Write a checkpoint row, creating it if absent. Cumulative counts are
/// incremented, not replaced.
pub async fn put_checkpoint(
    pool: &SqlitePool,
    community_id: i64,
    watermark: &Watermark,
    items_added: u64,
    replies_added: u64,
    mode: &str,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (community_id, last_seen_id, last_seen_created_utc,
                                 last_harvest_at, item_count, reply_count, last_mode)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(community_id) DO UPDATE SET
            last_seen_id = excluded.last_seen_id,
            last_seen_created_utc = excluded.last_seen_created_utc,
            last_harvest_at = excluded.last_harvest_at,
            item_count = item_count + excluded.item_count,
            reply_count = reply_count + excluded.reply_count,
            last_mode = excluded.last_mode
        "#,
    )
    .bind(community_id)
    .bind(&watermark.platform_id)
    .bind(watermark.created_utc)
    .bind(now)
    .bind(items_added as i64)
    .bind(replies_added as i64)
    .bind(mode)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh `last_harvest_at` and counters without moving the watermark.
/// Used when a harvest completed but observed nothing newer.
pub async fn touch_checkpoint(
    pool: &SqlitePool,
    community_id: i64,
    items_added: u64,
    replies_added: u64,
    mode: &str,
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (community_id, last_harvest_at, item_count, reply_count, last_mode)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(community_id) DO UPDATE SET
            last_harvest_at = excluded.last_harvest_at,
            item_count = item_count + excluded.item_count,
            reply_count = reply_count + excluded.reply_count,
            last_mode = excluded.last_mode
        "#,
    )
    .bind(community_id)
    .bind(now)
    .bind(items_added as i64)
    .bind(replies_added as i64)
    .bind(mode)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear the watermark so the next harvest behaves as first-time. The row
/// and its cumulative counters are kept.
pub async fn clear_checkpoint(pool: &SqlitePool, community_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE checkpoints SET last_seen_id = NULL, last_seen_created_utc = NULL
         WHERE community_id = ?",
    )
    .bind(community_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn item_total(pool: &SqlitePool, community_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE community_id = ?")
        .bind(community_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Aggregate counts for reporting. Read-only.
pub async fn stats(pool: &SqlitePool) -> Result<StoreStats> {
    let total_communities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM communities")
        .fetch_one(pool)
        .await?;
    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;
    let total_replies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replies")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT c.name,
               COUNT(DISTINCT i.id) AS item_count,
               COUNT(DISTINCT r.id) AS reply_count,
               MAX(i.created_utc) AS newest_item_utc,
               cp.last_harvest_at,
               cp.last_mode
        FROM communities c
        LEFT JOIN items i ON i.community_id = c.id
        LEFT JOIN replies r ON r.item_id = i.id
        LEFT JOIN checkpoints cp ON cp.community_id = c.id
        GROUP BY c.id
        ORDER BY item_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let per_community = rows
        .iter()
        .map(|row| CommunityStats {
            name: row.get("name"),
            item_count: row.get("item_count"),
            reply_count: row.get("reply_count"),
            newest_item_utc: row.get("newest_item_utc"),
            last_harvest_at: row.get("last_harvest_at"),
            last_mode: row.get("last_mode"),
        })
        .collect();

    Ok(StoreStats {
        total_communities,
        total_items,
        total_replies,
        per_community,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("store.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    fn item(id: &str, created: i64, score: i64) -> RawItem {
        RawItem {
            platform_id: id.to_string(),
            title: format!("post {id}"),
            body: "body".to_string(),
            author: "alice".to_string(),
            score,
            upvote_ratio: Some(0.9),
            reply_count: 0,
            created_utc: created,
            url: None,
            permalink: Some(format!("/r/test/{id}")),
        }
    }

    fn reply(id: &str, created: i64) -> RawReply {
        RawReply {
            platform_id: id.to_string(),
            parent_platform_id: None,
            author: "bob".to_string(),
            body: "a reply".to_string(),
            score: 1,
            created_utc: created,
            depth: 0,
        }
    }

    #[tokio::test]
    async fn item_upsert_updates_in_place() {
        let (_tmp, pool) = test_pool().await;
        let cid = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();

        let written = store_batch(&pool, cid, &[item("aaa", 100, 5)], &[])
            .await
            .unwrap();
        assert_eq!(written.items_new, 1);

        // Re-store with a new score: no new row, score updated.
        let written = store_batch(&pool, cid, &[item("aaa", 100, 42)], &[])
            .await
            .unwrap();
        assert_eq!(written.items_new, 0);
        assert_eq!(item_total(&pool, cid).await.unwrap(), 1);

        let score: i64 = sqlx::query_scalar("SELECT score FROM items WHERE platform_id = 'aaa'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(score, 42);
    }

    #[tokio::test]
    async fn duplicate_input_within_one_batch_is_safe() {
        let (_tmp, pool) = test_pool().await;
        let cid = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();

        let written = store_batch(&pool, cid, &[item("aaa", 100, 5), item("aaa", 100, 6)], &[])
            .await
            .unwrap();
        assert_eq!(written.items_new, 1);
        assert_eq!(item_total(&pool, cid).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replies_attach_to_their_item() {
        let (_tmp, pool) = test_pool().await;
        let cid = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();

        let written = store_batch(
            &pool,
            cid,
            &[item("aaa", 100, 5)],
            &[("aaa".to_string(), vec![reply("c1", 101), reply("c2", 102)])],
        )
        .await
        .unwrap();
        assert_eq!(written.replies_new, 2);

        // Restoring the same replies adds nothing.
        let written = store_batch(
            &pool,
            cid,
            &[],
            &[("aaa".to_string(), vec![reply("c1", 101)])],
        )
        .await
        .unwrap();
        assert_eq!(written.replies_new, 0);
    }

    #[tokio::test]
    async fn community_metadata_refreshes_without_clobbering() {
        let (_tmp, pool) = test_pool().await;
        let info = CommunityInfo {
            title: Some("Test Community".to_string()),
            subscribers: Some(1000),
            description: Some("about".to_string()),
        };
        let cid = upsert_community(&pool, "test", &info).await.unwrap();

        // A later upsert with no metadata keeps the old values.
        let cid2 = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();
        assert_eq!(cid, cid2);

        let subs: Option<i64> =
            sqlx::query_scalar("SELECT subscribers FROM communities WHERE name = 'test'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(subs, Some(1000));
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_and_clear() {
        let (_tmp, pool) = test_pool().await;
        let cid = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();

        assert!(get_checkpoint(&pool, cid).await.unwrap().is_none());

        put_checkpoint(&pool, cid, &Watermark::new("abc", 100), 10, 20, "delta")
            .await
            .unwrap();
        let cp = get_checkpoint(&pool, cid).await.unwrap().unwrap();
        assert_eq!(cp.watermark, Some(Watermark::new("abc", 100)));
        assert_eq!(cp.item_count, 10);
        assert_eq!(cp.reply_count, 20);
        assert_eq!(cp.last_mode.as_deref(), Some("delta"));

        // Counts accumulate across commits.
        put_checkpoint(&pool, cid, &Watermark::new("abd", 200), 5, 0, "delta")
            .await
            .unwrap();
        let cp = get_checkpoint(&pool, cid).await.unwrap().unwrap();
        assert_eq!(cp.item_count, 15);

        clear_checkpoint(&pool, cid).await.unwrap();
        let cp = get_checkpoint(&pool, cid).await.unwrap().unwrap();
        assert!(cp.watermark.is_none());
        // Cumulative counters survive a reset.
        assert_eq!(cp.item_count, 15);
    }

    #[tokio::test]
    async fn stats_counts_are_correct() {
        let (_tmp, pool) = test_pool().await;
        let cid = upsert_community(&pool, "test", &CommunityInfo::default())
            .await
            .unwrap();
        store_batch(
            &pool,
            cid,
            &[item("aaa", 100, 1), item("aab", 200, 2)],
            &[("aaa".to_string(), vec![reply("c1", 101)])],
        )
        .await
        .unwrap();

        let s = stats(&pool).await.unwrap();
        assert_eq!(s.total_communities, 1);
        assert_eq!(s.total_items, 2);
        assert_eq!(s.total_replies, 1);
        assert_eq!(s.per_community.len(), 1);
        assert_eq!(s.per_community[0].item_count, 2);
        assert_eq!(s.per_community[0].newest_item_utc, Some(200));
    }
}
