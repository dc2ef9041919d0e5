//! Nearest-neighbor ranking and message context stitching.
//!
//! Both algorithms operate purely through the [`store`](crate::store)
//! traits and plain data, with no database or configuration dependencies.
//! Storage backends call [`rank_nearest`] after applying their scope
//! filter; the orchestrator calls [`search_messages`] with whatever
//! [`MessageHistory`] it was assembled with.
//!
//! # Ranking
//!
//! 1. Keep only candidates inside the scope (done by the backend).
//! 2. Compute cosine distance to the query for each candidate.
//! 3. Sort by distance ascending, then exact embedding match first, then
//!    chunk id ascending.
//! 4. Truncate to `clamp_k(k)`.
//!
//! # Stitching
//!
//! For every substring match, newest first, look up the message directly
//! before and directly after it in the same channel. Neighbors need not
//! match the query themselves.

use std::collections::HashMap;

use crate::embedding::cosine_distance;
use crate::error::RecallError;
use crate::models::{Chunk, ChunkHit, SearchMatch};
use crate::store::{clamp_k, MessageHistory};

/// Rank `candidates` by cosine distance to `query`.
///
/// Candidates must already be restricted to the requested scope; ranking
/// globally and filtering afterwards would starve narrow scopes.
pub fn rank_nearest<I>(query: &[f32], candidates: I, k: usize) -> Vec<ChunkHit>
where
    I: IntoIterator<Item = Chunk>,
{
    let mut ranked: Vec<(ChunkHit, bool)> = candidates
        .into_iter()
        .map(|chunk| {
            let distance = cosine_distance(query, &chunk.embedding);
            let exact = chunk.embedding.as_slice() == query;
            (ChunkHit { chunk, distance }, exact)
        })
        .collect();

    // Parallel vectors all sit at distance zero; the stored copy of the
    // query itself must still come first.
    ranked.sort_by(|(a, a_exact), (b, b_exact)| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| b_exact.cmp(a_exact))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    ranked.truncate(clamp_k(k));
    ranked.into_iter().map(|(hit, _)| hit).collect()
}

/// Inputs for a single message search.
#[derive(Debug, Clone)]
pub struct MessageQuery<'a> {
    /// Substring to look for, matched case-insensitively.
    pub query: &'a str,
    /// Only search this channel.
    pub channel_id: Option<&'a str>,
    /// Maximum matches to return.
    pub limit: usize,
}

/// Find messages containing `req.query` and attach their neighbors.
///
/// Returns matches ordered by `sent` descending. An empty query returns no
/// matches. Each neighbor lookup is an independent read, so a message
/// inserted concurrently is either seen whole or not at all.
pub async fn search_messages<H>(
    history: &H,
    req: &MessageQuery<'_>,
) -> Result<Vec<SearchMatch>, RecallError>
where
    H: MessageHistory + ?Sized,
{
    if req.query.trim().is_empty() || req.limit == 0 {
        return Ok(Vec::new());
    }

    let found = history
        .find_messages(req.query, req.channel_id, req.limit)
        .await?;

    let mut names: HashMap<String, Option<String>> = HashMap::new();
    let mut matches = Vec::with_capacity(found.len());

    for message in found {
        let channel_name = match names.get(&message.channel_id) {
            Some(name) => name.clone(),
            None => {
                let name = history.channel_name(&message.channel_id).await?;
                names.insert(message.channel_id.clone(), name.clone());
                name
            }
        };
        let previous_message = history.previous_message(&message).await?;
        let next_message = history.next_message(&message).await?;

        matches.push(SearchMatch {
            message,
            channel_name,
            previous_message,
            next_message,
            score: 1.0,
        });
    }

    Ok(matches)
}
