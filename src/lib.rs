//! # Channel Recall
//!
//! Message-history retrieval for chat platforms.
//!
//! Channel Recall answers two kinds of queries over a growing, per-channel
//! stream of messages and uploaded documents:
//!
//! - **substring search** over message text, each match returned with the
//!   message directly before and after it in the same channel
//! - **semantic retrieval** over chunked document text, producing a context
//!   bundle that grounds an AI-composed answer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  Documents  │──▶│ Extract → Chunk  │──▶│    SQLite    │
//! │ txt/md/pdf  │   │   → Embed        │   │ chunks+vecs  │
//! └─────────────┘   └──────────────────┘   └──────┬───────┘
//!                                                 │
//!          ┌──────────────────────────────────────┤
//!          ▼                                      ▼
//!   ┌─────────────┐                        ┌─────────────┐
//!   │ RAG query   │──▶ deferred answer     │  message    │
//!   │ (nearest k) │    tasks (generator)   │  search     │
//!   └─────────────┘                        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init
//! recall register ./notes.md --content-type text/markdown --channel c1
//! recall ingest <document-id>
//! recall import-messages ./history.jsonl
//! recall search "deploy"
//! recall ask "What did we decide about the release?" --channel c1
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Vector index and message history on SQLite |
//! | [`blobs`] | Filesystem-backed document source |
//! | [`import`] | Message import from JSON Lines |
//! | [`extract`] | Text extraction for uploaded documents |
//! | [`embedding`] | HTTP embedding providers |
//! | [`generation`] | Text-generation boundary and prompt composition |
//! | [`engine`] | The retrieval orchestrator |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Message search with conversational context |
//! | [`rag`] | Retrieval-augmented queries |
//! | [`tasks`] | Deferred answer tasks |
//! | [`stats`] | Database statistics |
//!
//! Storage-independent pieces (data model, chunker, ranking, stitching,
//! storage traits) live in the `channel-recall-core` crate.

pub mod blobs;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod import;
pub mod ingest;
pub mod migrate;
pub mod rag;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod tasks;

#[cfg(test)]
mod testing;
