//! `HttpTransport` and `ChatClient` against mock servers over real HTTP.
//!
//! Each mock is a small axum router bound to an ephemeral port. Handlers
//! record what they received so the tests can assert on headers and bodies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use shardrag::auth::Authenticator;
use shardrag::chat::ChatClient;
use shardrag::config::ChatConfig;
use shardrag::embedding::Embedder;
use shardrag::error::Error;
use shardrag::executor::DiffQueryExecutor;
use shardrag::registry::{Node, NodeRegistry};
use shardrag::transport::memory::InMemoryCluster;
use shardrag::transport::{paths, HttpTransport, NodeTransport};
use shardrag::RetrievalClient;

use shardrag_core::aggregate::QuorumError;
use shardrag_core::codec::{encrypt_float_list, SecretKey};
use shardrag_core::models::Chunk;

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn record(seen: &Seen, headers: &HeaderMap, body: &Value) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push((auth, body.clone()));
}

async fn echo(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&seen, &headers, &body);
    Json(json!({ "data": [body] }))
}

async fn unauthorized() -> StatusCode {
    StatusCode::UNAUTHORIZED
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

fn node_at(base: &str, id: &str, token: &str) -> Node {
    let mut node = Node::new(&format!("{}/api/v1/", base), id, "acme").unwrap();
    node.bearer_token = Some(token.to_string());
    node
}

// ─── HttpTransport ──────────────────────────────────────────────────

#[tokio::test]
async fn test_bearer_token_and_body_reach_node() {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/api/v1/queries/execute", post(echo))
        .with_state(seen.clone());
    let base = spawn(app).await;

    let node = node_at(&base, "n0", "tok-0");
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let body = json!({"id": Uuid::nil(), "variables": {"query_embedding": [1, 2]}});

    let response = transport.post(&node, paths::EXECUTE, &body).await.unwrap();
    assert_eq!(response["data"][0], body);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer tok-0"));
}

#[tokio::test]
async fn test_unauthorized_is_auth_expired() {
    let app = Router::new().route("/api/v1/schemas", post(unauthorized));
    let base = spawn(app).await;

    let node = node_at(&base, "n0", "stale");
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let err = transport.post(&node, paths::SCHEMAS, &json!({})).await.unwrap_err();
    assert!(matches!(err, Error::AuthExpired { ref node } if node == "n0"));
}

#[tokio::test]
async fn test_server_error_is_node_rejected() {
    let app = Router::new().route("/api/v1/data/read", post(broken));
    let base = spawn(app).await;

    let node = node_at(&base, "n0", "tok");
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let err = transport.post(&node, paths::DATA_READ, &json!({})).await.unwrap_err();
    match err {
        Error::NodeRejected { node, status, body } => {
            assert_eq!(node, "n0");
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_missing_token_is_configuration_error() {
    let node = Node::new("http://127.0.0.1:9", "n0", "acme").unwrap();
    let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
    let err = transport.post(&node, paths::SCHEMAS, &json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_one_failing_http_node_fails_the_query() {
    let seen: Seen = Arc::default();
    let healthy = spawn(
        Router::new()
            .route("/api/v1/queries/execute", post(echo))
            .with_state(seen.clone()),
    )
    .await;
    let failing = spawn(Router::new().route("/api/v1/queries/execute", post(broken))).await;

    let query_id = Uuid::new_v4();
    let mut nodes = vec![node_at(&healthy, "n0", "t0"), node_at(&failing, "n1", "t1")];
    for node in &mut nodes {
        node.schema_id = Some(Uuid::new_v4());
        node.diff_query_id = Some(query_id);
    }
    let registry = NodeRegistry::new(nodes).unwrap();
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let exec = DiffQueryExecutor::new(&registry, &transport, Duration::from_secs(5));

    let shares = encrypt_float_list(&SecretKey::generate(2), &[0.5]).unwrap();
    let err = exec.execute(&shares).await.unwrap_err();
    assert!(matches!(err, Error::Quorum(QuorumError::NodeFailed { party: 1, .. })));

    // The healthy node still got only its own share.
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1["variables"]["query_embedding"], json!([shares[0][0]]));
    assert_eq!(seen[0].1["id"], json!(query_id));
}

// ─── Chat ───────────────────────────────────────────────────────────

struct ConstantEmbedder;

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5, -0.5]).collect())
    }
}

async fn completion(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&seen, &headers, &body);
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": "Use cargo."}}]
    }))
}

#[tokio::test]
async fn test_ask_sends_retrieved_context_to_chat() {
    let seen: Seen = Arc::default();
    let base = spawn(
        Router::new()
            .route("/v1/chat/completions", post(completion))
            .with_state(seen.clone()),
    )
    .await;

    let nodes = (0..2)
        .map(|i| Node::new(&format!("http://sim{}", i), &format!("n{}", i), "acme").unwrap())
        .collect();
    let mut registry = NodeRegistry::new(nodes).unwrap();
    let auth = Authenticator::from_secret_key(
        "4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c",
    )
    .unwrap();
    auth.issue_credentials(&mut registry, Duration::from_secs(60))
        .unwrap();
    let sim = Arc::new(InMemoryCluster::new(&registry, auth.verifying_key()));
    let mut client = RetrievalClient::new(
        registry,
        SecretKey::generate(2),
        sim,
        Arc::new(ConstantEmbedder),
    )
    .unwrap();
    client.provision().await.unwrap();

    let chunk = Chunk {
        id: Uuid::new_v4(),
        index: 0,
        text: "Build crates with cargo build.".to_string(),
    };
    client.ingest_chunks(&[chunk]).await.unwrap();

    let chat = ChatClient::with_api_key(
        &ChatConfig {
            url: format!("{}/v1/chat/completions", base),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_tokens: 64,
            api_key_env: "UNUSED".to_string(),
            timeout_secs: 5,
        },
        "sk-test".to_string(),
    )
    .unwrap();

    let answer = client.ask(&chat, "how do I build?").await.unwrap();
    assert_eq!(answer, "Use cargo.");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-test"));
    let request = &seen[0].1;
    assert_eq!(request["model"], "test-model");
    assert_eq!(request["stream"], false);
    let user = request["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("Build crates with cargo build."));
    assert!(user.contains("how do I build?"));
}
