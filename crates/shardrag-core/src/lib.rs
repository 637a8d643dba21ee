//! # shardrag core
//!
//! Network-free logic for shardrag: the secret-sharing codec, the text
//! chunker, the declarative difference pipeline, share aggregation and
//! distance ranking.
//!
//! This crate has no tokio, HTTP or filesystem dependencies. Storage nodes
//! can depend on it to interpret [`pipeline::Pipeline`] definitions, and
//! clients use it to split queries and reconstruct results.

pub mod aggregate;
pub mod chunk;
pub mod codec;
pub mod models;
pub mod pipeline;
pub mod rank;
