//! # API Key Authentication
//!
//! API keys are random 256-bit tokens. Only an Argon2id hash and a SHA-256
//! fingerprint are persisted; the plaintext is returned exactly once at
//! creation. Verification finds candidates by fingerprint and confirms with
//! the Argon2id hash.
//!
//! ## Invariants
//! - Plaintext tokens are never stored or logged
//! - Secret comparison is constant-time (inside argon2 verification)

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::HeaderMap;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::store::{ApiKeyRecord, MetaStore, Role};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated caller identity
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub id: String,
    pub role: Role,
}

/// Generate a cryptographically secure random token (256-bit, base64)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// SHA-256 fingerprint of a token, used to index stored keys without a
/// plaintext and without running argon2 against every record.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, result)
}

/// Hash a token for storage using Argon2id
pub fn hash_token(token: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ApiError::Internal("token hashing failed".to_string()))
}

fn verify_token(token: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(token.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Issue a new API key, persisting only its hashes. Returns the plaintext
/// token; it cannot be recovered afterwards.
pub fn issue_key(store: &MetaStore, role: Role) -> ApiResult<String> {
    let token = generate_token();
    let record = ApiKeyRecord {
        id: Uuid::new_v4().simple().to_string(),
        role,
        hash: hash_token(&token)?,
        fingerprint: fingerprint(&token),
        created_at: Utc::now(),
    };
    store.add_api_key_record(record)?;
    Ok(token)
}

/// Validate a presented token against the stored keys.
pub fn validate_key(store: &MetaStore, token: &str) -> Option<AuthContext> {
    if token.is_empty() {
        return None;
    }
    let fp = fingerprint(token);
    store
        .list_api_keys()
        .into_iter()
        .filter(|k| k.fingerprint == fp)
        .find(|k| verify_token(token, &k.hash))
        .map(|k| AuthContext {
            id: k.id,
            role: k.role,
        })
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Authenticate any valid API key (consumer or admin).
pub fn require_key(store: &MetaStore, headers: &HeaderMap) -> ApiResult<AuthContext> {
    let token =
        header_token(headers).ok_or_else(|| ApiError::Auth("missing api key".to_string()))?;
    validate_key(store, token)
        .ok_or_else(|| ApiError::Auth("missing or invalid api key".to_string()))
}

/// Authenticate an admin-role API key. When `dev_mode` is set the check is
/// bypassed and a synthetic dev-admin identity is returned; this is for
/// local operation only and is off by default.
pub fn require_admin(
    store: &MetaStore,
    headers: &HeaderMap,
    dev_mode: bool,
) -> ApiResult<AuthContext> {
    if dev_mode {
        return Ok(AuthContext {
            id: "dev-admin".to_string(),
            role: Role::Admin,
        });
    }
    let ctx = require_key(store, headers)?;
    if ctx.role != Role::Admin {
        return Err(ApiError::Forbidden("admin only".to_string()));
    }
    Ok(ctx)
}
