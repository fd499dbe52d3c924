//! Bearer token authorization against the `api_keys` bucket.
//!
//! Tokens are never stored in the clear; the bucket is keyed by the
//! SHA-512 digest of each token.

use crate::metrics::Metrics;
use crate::storage::{KeyValueStore, StorageError};
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tracing::{debug, warn};

/// Value stored next to each authorized digest. Only presence matters.
pub const TOKEN_MARKER: &[u8] = b"active";

/// Bucket key for a token.
pub fn token_digest(token: &str) -> Vec<u8> {
    Sha512::digest(token.as_bytes()).to_vec()
}

/// Extract the token from an `Authorization` header value.
///
/// The value is split at the first space and the scheme must be exactly
/// `Bearer`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if scheme != "Bearer" || token.is_empty() {
        return None;
    }
    Some(token)
}

#[derive(Clone)]
pub struct TokenAuthenticator {
    api_keys: Arc<dyn KeyValueStore>,
}

impl TokenAuthenticator {
    pub fn new(api_keys: Arc<dyn KeyValueStore>) -> Self {
        Self { api_keys }
    }

    /// Allow iff the header carries a known bearer token. Store failures deny.
    pub async fn authorize(&self, header: Option<&str>) -> bool {
        let Some(token) = header.and_then(bearer_token) else {
            debug!("Missing or malformed Authorization header");
            Metrics::get().record_auth_failure();
            return false;
        };

        match self.api_keys.get(&token_digest(token)).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!("Unknown API token");
                Metrics::get().record_auth_failure();
                false
            }
            Err(e) => {
                warn!("API token lookup failed: {}", e);
                Metrics::get().record_auth_failure();
                false
            }
        }
    }

    /// Authorize a token. Adding an existing token is not an error.
    pub async fn add_token(&self, token: &str) -> Result<(), StorageError> {
        self.api_keys.put(&token_digest(token), TOKEN_MARKER).await
    }

    /// Revoke a token. Fails with `DoesNotExist` for unknown tokens.
    pub async fn revoke_token(&self, token: &str) -> Result<(), StorageError> {
        self.api_keys.delete(&token_digest(token)).await
    }
}
