use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Every statement is idempotent so `init` can run any
/// number of times against the same database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Communities table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS communities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            title TEXT,
            subscribers INTEGER,
            description TEXT,
            first_seen_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Items table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id TEXT NOT NULL,
            community_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '[deleted]',
            score INTEGER NOT NULL DEFAULT 0,
            upvote_ratio REAL,
            reply_count INTEGER NOT NULL DEFAULT 0,
            created_utc INTEGER NOT NULL,
            url TEXT,
            permalink TEXT,
            harvested_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(community_id, platform_id),
            FOREIGN KEY (community_id) REFERENCES communities(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Replies table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS replies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            parent_platform_id TEXT,
            author TEXT NOT NULL DEFAULT '[deleted]',
            body TEXT NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            created_utc INTEGER NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            harvested_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(item_id, platform_id),
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Checkpoints table, 1:1 with communities
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            community_id INTEGER PRIMARY KEY,
            last_seen_id TEXT,
            last_seen_created_utc INTEGER,
            last_harvest_at INTEGER,
            item_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            last_mode TEXT,
            FOREIGN KEY (community_id) REFERENCES communities(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes: resume queries walk "items newer than X" per community
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_community_created
         ON items(community_id, created_utc DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_platform_id ON items(platform_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_replies_item ON replies(item_id)")
        .execute(pool)
        .await?;

    Ok(())
}
