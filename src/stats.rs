//! Store statistics overview.
//!
//! Summarizes what has been harvested: community/item/reply totals and a
//! per-community breakdown with checkpoint ages. Used by `dh stats` to give
//! confidence that delta harvests are landing as expected.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::models::StoreStats;
use crate::store;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, pool: &SqlitePool) -> Result<StoreStats> {
    let stats = store::stats(pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("delta-harvest — Store Stats");
    println!("===========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Communities:  {}", stats.total_communities);
    println!("  Items:        {}", stats.total_items);
    println!("  Replies:      {}", stats.total_replies);

    if !stats.per_community.is_empty() {
        println!();
        println!("  By community:");
        println!(
            "  {:<24} {:>6} {:>8}   {:<18} {}",
            "COMMUNITY", "ITEMS", "REPLIES", "LAST HARVEST", "MODE"
        );
        println!("  {}", "-".repeat(68));

        for c in &stats.per_community {
            let harvest_display = match c.last_harvest_at {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>8}   {:<18} {}",
                c.name,
                c.item_count,
                c.reply_count,
                harvest_display,
                c.last_mode.as_deref().unwrap_or("-")
            );
        }
    }

    println!();
    Ok(stats)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    crate::models::utc_from_timestamp(ts)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_format() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 10), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 3 * 86400), "3 days ago");
    }
}
