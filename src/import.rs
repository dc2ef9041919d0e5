//! Message import from JSON Lines.
//!
//! The message stream belongs to the messaging subsystem; `recall
//! import-messages` loads an export of it so search can run locally. Each
//! non-empty line is one message:
//!
//! ```json
//! {"id":"m1","channel_id":"c1","channel_name":"general","sender":"ana","sent":"2024-05-01T12:00:00Z","text":"hello"}
//! ```
//!
//! `channel_name`, `text` and `content` are optional. Re-importing a line
//! with the same `id` replaces the stored message.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use channel_recall_core::models::Message;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Deserialize)]
struct MessageRecord {
    id: String,
    channel_id: String,
    #[serde(default)]
    channel_name: Option<String>,
    sender: String,
    sent: DateTime<Utc>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl MessageRecord {
    fn into_message(self) -> (Message, Option<String>) {
        let message = Message {
            id: self.id,
            channel_id: self.channel_id,
            sender: self.sender,
            sent: self.sent,
            text: self.text,
            content: self.content,
        };
        (message, self.channel_name)
    }
}

/// Counts reported by an import.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub messages: usize,
    pub channels: usize,
}

fn parse_line(line: &str, line_no: usize) -> Result<MessageRecord> {
    let record: MessageRecord = serde_json::from_str(line)
        .with_context(|| format!("line {}: invalid message record", line_no))?;
    if record.id.trim().is_empty() || record.channel_id.trim().is_empty() {
        bail!("line {}: id and channel_id must be non-empty", line_no);
    }
    Ok(record)
}

/// Parse every line up front so a malformed file imports nothing.
fn parse_records(contents: &str) -> Result<Vec<MessageRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_line(line, i + 1))
        .collect()
}

/// Import messages from `contents` into `store`.
pub async fn import_messages(store: &SqliteStore, contents: &str) -> Result<ImportSummary> {
    let records = parse_records(contents)?;
    let mut channels = HashSet::new();
    let mut summary = ImportSummary::default();

    for record in records {
        let (message, channel_name) = record.into_message();
        if let Some(name) = channel_name {
            if channels.insert(message.channel_id.clone()) {
                store.add_channel(&message.channel_id, &name).await?;
                summary.channels += 1;
            }
        }
        store.add_message(&message).await?;
        summary.messages += 1;
    }
    Ok(summary)
}

/// `recall import-messages <file>`
pub async fn run_import_messages(config: &Config, path: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read message file: {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone(), config.dims());
    let result = import_messages(&store, &contents).await;
    pool.close().await;
    let summary = result?;

    info!(
        messages = summary.messages,
        channels = summary.channels,
        "imported messages"
    );
    println!("import {}", path.display());
    println!("  messages: {}", summary.messages);
    println!("  channels named: {}", summary.channels);
    println!("ok");
    Ok(())
}
