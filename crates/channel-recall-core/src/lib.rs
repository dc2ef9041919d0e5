//! # Channel Recall Core
//!
//! Runtime-agnostic logic for Channel Recall: data models, the error
//! taxonomy, the overlapping text chunker, the embedder boundary, storage
//! traits with an in-memory backend, and the two retrieval algorithms
//! (nearest-neighbor ranking and message context stitching).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! application crate supplies concrete storage and embedding backends.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{EmbedError, RecallError};
