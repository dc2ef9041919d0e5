//! Substring search over chat history, with conversational context.
//!
//! Every match is returned together with the message directly before and
//! directly after it in the same channel, so a reader sees the exchange the
//! match belongs to. Matches are ordered newest first; there is no
//! relevance ranking and every score is `1.0`.

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::debug;

use channel_recall_core::models::{Message, SearchMatch};
use channel_recall_core::search::{search_messages, MessageQuery};
use channel_recall_core::RecallError;

use crate::config::Config;
use crate::engine::{RetrievalEngine, Services};

impl RetrievalEngine {
    /// Find messages containing `query` (case-insensitive), newest first,
    /// each with its previous and next message in the same channel.
    ///
    /// An empty query returns no matches.
    pub async fn search(
        &self,
        query: &str,
        channel_id: Option<&str>,
    ) -> Result<Vec<SearchMatch>, RecallError> {
        let request = MessageQuery {
            query,
            channel_id,
            limit: self.settings.max_matches,
        };
        let matches = search_messages(self.history.as_ref(), &request).await?;
        debug!(query, channel_id, matches = matches.len(), "message search");
        Ok(matches)
    }

    /// Messages sent within the last `window`, oldest first.
    pub async fn recent_messages(
        &self,
        channel_id: Option<&str>,
        window: Duration,
    ) -> Result<Vec<Message>, RecallError> {
        let since = Utc::now() - window;
        self.history.messages_since(channel_id, since).await
    }
}

fn excerpt(message: &Message) -> String {
    message.body().replace('\n', " ").trim().to_string()
}

/// `recall search "<query>"`
pub async fn run_search(config: &Config, query: &str, channel: Option<&str>) -> Result<()> {
    let services = Services::connect(config).await?;
    let matches = services.engine.search(query, channel).await;
    services.close().await;
    let matches = matches?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let channel_display = m.channel_name.as_deref().unwrap_or(&m.message.channel_id);
        println!(
            "{}. [{}] #{} {}",
            i + 1,
            m.message.sent.format("%Y-%m-%d %H:%M"),
            channel_display,
            m.message.sender
        );
        if let Some(ref prev) = m.previous_message {
            println!("    before: {}: \"{}\"", prev.sender, excerpt(prev));
        }
        println!("    match:  \"{}\"", excerpt(&m.message));
        if let Some(ref next) = m.next_message {
            println!("    after:  {}: \"{}\"", next.sender, excerpt(next));
        }
        println!("    id: {}", m.message.id);
        println!();
    }
    Ok(())
}

/// `recall recent`
pub async fn run_recent(config: &Config, channel: Option<&str>, hours: i64) -> Result<()> {
    let services = Services::connect(config).await?;
    let messages = services
        .engine
        .recent_messages(channel, Duration::hours(hours))
        .await;
    services.close().await;
    let messages = messages?;

    if messages.is_empty() {
        println!("No messages in the last {} hour(s).", hours);
        return Ok(());
    }
    for message in &messages {
        println!(
            "[{}] {} {}: {}",
            message.sent.format("%Y-%m-%d %H:%M"),
            message.channel_id,
            message.sender,
            excerpt(message)
        );
    }
    Ok(())
}
