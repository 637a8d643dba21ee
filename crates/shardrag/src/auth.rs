//! Per-node, audience-scoped bearer tokens.
//!
//! One secp256k1 key signs a compact ES256K JWT for every node. All tokens
//! share the issuer (the node's configured org) but each carries the
//! node's own id as its audience, so a token captured from one node is
//! useless against another.
//!
//! ```text
//! base64url({"alg":"ES256K","typ":"JWT"}) . base64url(claims) . base64url(r ‖ s)
//! ```

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::registry::NodeRegistry;

/// Token lifetime used when none is configured.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

const ALGORITHM: &str = "ES256K";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer: the org the client acts for.
    pub iss: String,
    /// Audience: the node id this token is valid for.
    pub aud: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Why a node refused a token.
#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token is not a compact JWS")]
    Malformed,
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature does not verify")]
    BadSignature,
    #[error("token is addressed to {found}, not {expected}")]
    WrongAudience { expected: String, found: String },
    #[error("token expired at {0}")]
    Expired(i64),
}

/// Signs node credentials with a single secp256k1 key.
pub struct Authenticator {
    signing_key: SigningKey,
}

impl Authenticator {
    /// Parse a 32-byte hex secret key (an `0x` prefix is allowed).
    pub fn from_secret_key(secret_key: &str) -> Result<Self> {
        let trimmed = secret_key.trim();
        let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::Configuration(format!("secret key is not valid hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(Error::Configuration(format!(
                "secret key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|_| Error::Configuration("secret key is not a valid secp256k1 scalar".into()))?;
        Ok(Self { signing_key })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key().clone()
    }

    /// Compressed SEC1 public key, hex encoded; what nodes register.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_encoded_point(true).as_bytes())
    }

    /// Sign one token.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| Error::Configuration(format!("cannot encode token header: {}", e)))?;
        let claims_json = serde_json::to_vec(claims)
            .map_err(|e| Error::Configuration(format!("cannot encode token claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature: Signature = self
            .signing_key
            .try_sign(signing_input.as_bytes())
            .map_err(|e| Error::Configuration(format!("signing failed: {}", e)))?;

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Issue a fresh token for every node in the registry.
    ///
    /// All tokens are minted before any is stored, so a failure leaves the
    /// registry's existing credentials untouched.
    pub fn issue_credentials(&self, registry: &mut NodeRegistry, ttl: Duration) -> Result<()> {
        self.issue_credentials_at(registry, ttl, chrono::Utc::now().timestamp())
    }

    pub(crate) fn issue_credentials_at(
        &self,
        registry: &mut NodeRegistry,
        ttl: Duration,
        now: i64,
    ) -> Result<()> {
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl_secs| now.checked_add(ttl_secs))
            .ok_or_else(|| Error::Configuration("token ttl is too large".into()))?;

        let tokens = registry
            .nodes()
            .iter()
            .map(|node| {
                self.sign(&Claims {
                    iss: node.org.clone(),
                    aud: node.node_id.clone(),
                    iat: now,
                    exp,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for (node, token) in registry.nodes_mut().iter_mut().zip(tokens) {
            debug!(node = %node.node_id, "issued bearer token");
            node.bearer_token = Some(token);
        }
        info!(nodes = registry.len(), ttl_secs = ttl.as_secs(), "credentials issued");
        Ok(())
    }
}

/// Issue credentials for every node from a hex secret key.
pub fn issue_credentials(registry: &mut NodeRegistry, secret_key: &str, ttl: Duration) -> Result<()> {
    Authenticator::from_secret_key(secret_key)?.issue_credentials(registry, ttl)
}

/// Node-side token check: algorithm, signature, audience and expiry.
pub fn verify_token(
    token: &str,
    key: &VerifyingKey,
    audience: &str,
    now: i64,
) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => (h, c, s),
        _ => return Err(TokenError::Malformed),
    };

    let header: Header = decode_json(header_b64)?;
    if header.alg != ALGORITHM {
        return Err(TokenError::UnsupportedAlgorithm(header.alg));
    }

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| TokenError::Malformed)?;
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| TokenError::BadSignature)?;
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    key.verify(signing_input.as_bytes(), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    let claims: Claims = decode_json(claims_b64)?;
    if claims.aud != audience {
        return Err(TokenError::WrongAudience {
            expected: audience.to_string(),
            found: claims.aud,
        });
    }
    if claims.exp <= now {
        return Err(TokenError::Expired(claims.exp));
    }
    Ok(claims)
}

fn decode_json<T: for<'de> Deserialize<'de>>(part: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(part).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
