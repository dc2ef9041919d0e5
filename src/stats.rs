//! Database statistics.
//!
//! A quick summary of what is stored: channel, message, document and chunk
//! counts, plus a per-channel breakdown. Used by `recall stats` to confirm
//! that imports and ingestion are landing.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

struct ChannelStats {
    channel: String,
    messages: i64,
    chunks: i64,
    last_message_us: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.dims());
    let totals = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Channel Recall: Database Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Channels:    {}", totals.channels);
    println!("  Messages:    {}", totals.messages);
    println!("  Documents:   {}", totals.documents);
    println!("  Chunks:      {}", totals.chunks);

    let rows = sqlx::query(
        r#"
        SELECT
            ids.channel_id AS channel_id,
            COALESCE(c.name, ids.channel_id) AS label,
            (SELECT COUNT(*) FROM messages m WHERE m.channel_id = ids.channel_id) AS messages,
            (SELECT COUNT(*) FROM chunks k WHERE k.channel_id = ids.channel_id) AS chunks,
            (SELECT MAX(sent) FROM messages m WHERE m.channel_id = ids.channel_id) AS last_sent
        FROM (
            SELECT channel_id FROM messages
            UNION
            SELECT channel_id FROM chunks WHERE channel_id IS NOT NULL
        ) ids
        LEFT JOIN channels c ON c.id = ids.channel_id
        ORDER BY messages DESC, label ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let per_channel: Vec<ChannelStats> = rows
        .iter()
        .map(|row| ChannelStats {
            channel: row.get("label"),
            messages: row.get("messages"),
            chunks: row.get("chunks"),
            last_message_us: row.get("last_sent"),
        })
        .collect();

    if !per_channel.is_empty() {
        println!();
        println!("  By channel:");
        println!(
            "  {:<24} {:>8} {:>8}   {}",
            "CHANNEL", "MESSAGES", "CHUNKS", "LAST MESSAGE"
        );
        println!("  {}", "-".repeat(66));

        for s in &per_channel {
            let last = match s.last_message_us {
                Some(us) => format_ts_relative(us / 1_000_000, chrono::Utc::now().timestamp()),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>8} {:>8}   {}",
                s.channel, s.messages, s.chunks, last
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
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

/// Format a Unix timestamp relative to `now` (e.g. "3 hours ago").
fn format_ts_relative(ts: i64, now: i64) -> String {
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
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
