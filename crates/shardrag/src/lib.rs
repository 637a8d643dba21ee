//! # shardrag
//!
//! **Retrieval-augmented generation over a cluster of secret-sharing storage nodes.**
//!
//! Document chunks and their embeddings are split into additive shares, one
//! per node. A query embedding is split the same way and every node computes
//! the element-wise difference between its stored shares and its query
//! share. Only the client, holding the [`SecretKey`](shardrag_core::codec::SecretKey),
//! can combine the N difference shares and rank records by distance. No
//! single node ever sees a plaintext embedding, query or chunk.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │   RetrievalClient    │
//!                    │ chunk · embed · split │
//!                    └──────────┬───────────┘
//!            share 0            │ share 1            share N-1
//!        ┌──────────────────────┼──────────────────────┐
//!        ▼                      ▼                      ▼
//!   ┌──────────┐           ┌──────────┐           ┌──────────┐
//!   │  node 0  │           │  node 1  │    ...    │ node N-1 │
//!   │ Σ share  │           │ Σ share  │           │ Σ share  │
//!   └────┬─────┘           └────┬─────┘           └────┬─────┘
//!        └──────────────────────┼──────────────────────┘
//!                               ▼
//!                 group by _id · combine · rank
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`registry`] | Ordered node list; party index = node position |
//! | [`auth`] | ES256K bearer tokens per node |
//! | [`transport`] | `NodeTransport` trait, HTTP and in-memory implementations |
//! | [`provision`] | Schema and difference-query registration |
//! | [`executor`] | Concurrent fan-out to every node |
//! | [`embedding`] | Embedding providers |
//! | [`chat`] | Chat-completion client |
//! | [`client`] | End-to-end ingestion and retrieval |
//! | [`error`] | Error taxonomy |
//!
//! The pure parts (codec, chunking, pipeline, aggregation, ranking) live in
//! the `shardrag-core` crate; its result types are re-exported here.
//!
//! ## Failure model
//!
//! Reconstruction needs every share, so every operation is N-of-N: one node
//! that times out, errors or returns an incomplete result fails the whole
//! call with [`Error::Quorum`]. There is no degraded mode.
//!
//! ## Logging
//!
//! The crate logs through `tracing` and installs no subscriber. Tokens,
//! secret keys and plaintext never appear in log fields.

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod provision;
pub mod registry;
pub mod transport;

pub use auth::Authenticator;
pub use client::RetrievalClient;
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use registry::{Node, NodeRegistry};
pub use shardrag_core::codec::SecretKey;
pub use shardrag_core::models::{RankedRecord, RetrievedChunk};
pub use transport::{HttpTransport, NodeTransport};
