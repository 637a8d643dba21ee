//! Client-side orchestration.
//!
//! [`RetrievalClient`] ties the pieces together:
//!
//! ```text
//!  ingest:  text ─▶ chunk ─▶ embed ─▶ split ─▶ data/create ×N
//!
//!  query:   text ─▶ embed ─▶ split ─▶ queries/execute ×N
//!                                          │
//!           ranked chunks ◀─ combine ◀─ group by _id
//!                 ▲
//!                 └── data/read ×N ─▶ group ─▶ combine strings
//! ```
//!
//! Plaintext embeddings and chunk text never leave this process; each node
//! only ever receives its own share.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use shardrag_core::aggregate::{
    group_shares_by_id, integer_field, reconstruct_differences, string_field, QuorumError,
};
use shardrag_core::chunk::chunk_text;
use shardrag_core::codec::{
    decrypt_string_list, encrypt_float_list, encrypt_string_list, SecretKey,
};
use shardrag_core::models::{Chunk, RankedRecord, RetrievedChunk, StoredRecord};
use shardrag_core::pipeline::DIFFERENCE_FIELD;
use shardrag_core::rank::rank_by_distance;

use crate::auth::Authenticator;
use crate::chat::{build_messages, ChatClient};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::{Error, Result};
use crate::executor::DiffQueryExecutor;
use crate::provision::{init_diff_query, init_schema};
use crate::registry::NodeRegistry;
use crate::transport::{HttpTransport, NodeTransport};

pub struct RetrievalClient {
    registry: NodeRegistry,
    key: SecretKey,
    transport: Arc<dyn NodeTransport>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    top_k: usize,
    timeout: Duration,
}

impl RetrievalClient {
    /// `key` must have one mask per node in `registry`.
    pub fn new(
        registry: NodeRegistry,
        key: SecretKey,
        transport: Arc<dyn NodeTransport>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if key.parties() != registry.len() {
            return Err(Error::Configuration(format!(
                "secret key covers {} parties but the cluster has {} nodes",
                key.parties(),
                registry.len()
            )));
        }
        Ok(Self {
            registry,
            key,
            transport,
            embedder,
            chunking: ChunkingConfig::default(),
            top_k: 5,
            timeout: Duration::from_secs(30),
        })
    }

    /// Build a client talking HTTP to the configured nodes.
    ///
    /// Reads the signing key and the sharing seed from the environment,
    /// issues credentials and picks the embedding provider. Provisioning is
    /// a separate step, see [`RetrievalClient::provision`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = NodeRegistry::from_config(config)?;

        let secret_key = config
            .auth
            .secret_key()
            .map_err(|e| Error::Configuration(format!("{:#}", e)))?;
        Authenticator::from_secret_key(&secret_key)?
            .issue_credentials(&mut registry, config.auth.token_ttl())?;

        let seed = config
            .sharing
            .seed()
            .map_err(|e| Error::Configuration(format!("{:#}", e)))?;
        let key = SecretKey::derive(registry.len(), seed.as_bytes());

        let transport = HttpTransport::new(config.transport.timeout())?;
        let embedder = create_embedder(&config.embedding).map_err(Error::Embedding)?;

        Ok(Self::new(registry, key, Arc::new(transport), Arc::from(embedder))?
            .with_chunking(config.chunking.clone())
            .with_top_k(config.retrieval.top_k)
            .with_timeout(config.transport.timeout()))
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Reissue every node's bearer token, e.g. after `AuthExpired`.
    pub fn authenticate(&mut self, secret_key: &str, ttl: Duration) -> Result<()> {
        Authenticator::from_secret_key(secret_key)?.issue_credentials(&mut self.registry, ttl)
    }

    /// Ensure the schema and the difference query exist on every node.
    ///
    /// Returns `(schema_id, diff_query_id)`.
    pub async fn provision(&mut self) -> Result<(Uuid, Uuid)> {
        let schema_id = init_schema(&mut self.registry, self.transport.as_ref(), self.timeout).await?;
        let query_id = init_diff_query(&mut self.registry, self.transport.as_ref(), self.timeout).await?;
        Ok((schema_id, query_id))
    }

    fn executor(&self) -> DiffQueryExecutor<'_> {
        DiffQueryExecutor::new(&self.registry, self.transport.as_ref(), self.timeout)
    }

    fn provisioned_schema(&self) -> Result<Uuid> {
        self.registry
            .schema_id()?
            .ok_or_else(|| Error::Configuration("schema has not been provisioned".into()))
    }

    /// Chunk, embed and upload a document. Returns the new record ids.
    pub async fn ingest_text(&self, text: &str) -> Result<Vec<Uuid>> {
        let chunks = chunk_text(text, self.chunking.chunk_size, self.chunking.overlap);
        self.ingest_chunks(&chunks).await
    }

    /// Embed and upload pre-chunked text.
    pub async fn ingest_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Uuid>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await.map_err(Error::Embedding)?;
        self.ingest_embedded(chunks, &embeddings).await
    }

    /// Upload chunks whose embeddings were computed elsewhere.
    ///
    /// Each record is split once; node `i` receives share `i` of every
    /// embedding dimension and of the chunk text.
    pub async fn ingest_embedded(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<Vec<Uuid>> {
        if chunks.len() != embeddings.len() {
            return Err(Error::Embedding(anyhow::anyhow!(
                "{} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }
        let schema_id = self.provisioned_schema()?;
        let parties = self.registry.len();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let text_shares = encrypt_string_list(&self.key, &texts)?;

        let mut per_party: Vec<Vec<StoredRecord>> = vec![Vec::with_capacity(chunks.len()); parties];
        for ((chunk, embedding), chunk_shares) in chunks.iter().zip(embeddings).zip(text_shares) {
            let values: Vec<f64> = embedding.iter().map(|&x| f64::from(x)).collect();
            let dimension_shares = encrypt_float_list(&self.key, &values)?;
            for (party, (records, chunk_share)) in per_party.iter_mut().zip(chunk_shares).enumerate() {
                records.push(StoredRecord {
                    id: chunk.id,
                    embedding: dimension_shares.iter().map(|s| s[party]).collect(),
                    chunk: chunk_share,
                });
            }
        }

        self.executor().store_records(schema_id, &per_party).await?;
        info!(records = chunks.len(), nodes = parties, "ingested");
        Ok(chunks.iter().map(|c| c.id).collect())
    }

    /// Rank every stored record by distance to `query`, closest first.
    ///
    /// Only this party's share of the query reaches each node, and only the
    /// combined difference vectors are ever seen in the clear.
    pub async fn top_k_for_embedding(&self, query: &[f32], top_k: usize) -> Result<Vec<RankedRecord>> {
        let values: Vec<f64> = query.iter().map(|&x| f64::from(x)).collect();
        let query_shares = encrypt_float_list(&self.key, &values)?;

        let per_party = self.executor().execute(&query_shares).await?;
        let grouped = group_shares_by_id(&per_party, |row| integer_field(row, DIFFERENCE_FIELD))?;
        debug!(records = grouped.len(), "difference shares grouped");

        let differences = reconstruct_differences(&self.key, grouped)?;
        Ok(rank_by_distance(differences, top_k))
    }

    /// Rank, then fetch and reassemble the chunk text of the winners.
    pub async fn retrieve_for_embedding(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let ranked = self.top_k_for_embedding(query, top_k).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }
        let schema_id = self.provisioned_schema()?;
        let ids: Vec<String> = ranked.iter().map(|r| r.id.clone()).collect();

        let per_party = self.executor().read_records(schema_id, &ids).await?;
        let mut grouped = group_shares_by_id(&per_party, |row| string_field(row, "chunk"))?;

        let mut out = Vec::with_capacity(ranked.len());
        for record in ranked {
            let shares = grouped
                .remove(&record.id)
                .ok_or_else(|| QuorumError::IncompleteRecord {
                    id: record.id.clone(),
                    found: 0,
                    expected: self.registry.len(),
                })?;
            let text = decrypt_string_list(&self.key, &[shares])?
                .into_iter()
                .next()
                .unwrap_or_default();
            out.push(RetrievedChunk {
                id: record.id,
                text,
                distance: record.distance,
            });
        }
        debug!(chunks = out.len(), "chunks reassembled");
        Ok(out)
    }

    /// Embed `query` and return the configured number of closest chunks.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let embedding = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(Error::Embedding)?;
        self.retrieve_for_embedding(&embedding, self.top_k).await
    }

    /// Retrieve context for `query` and hand it to the chat model.
    pub async fn ask(&self, chat: &ChatClient, query: &str) -> Result<String> {
        let chunks = self.retrieve(query).await?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let messages = build_messages(query, &texts);
        chat.complete(&messages).await.map_err(Error::Chat)
    }
}
