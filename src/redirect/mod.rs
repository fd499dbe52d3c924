//! Redirect mappings: the model, request validation and the services that
//! resolve and write them.

pub mod ids;
pub mod resolve;
pub mod write;

use crate::error::RedirectError;
use serde::{Deserialize, Serialize};

pub use ids::{IdGenerator, NanoIdGenerator};
pub use resolve::{Mode, RequestOrigin, Resolution};
pub use write::UpdateOutcome;

use crate::qr::{PngRenderer, QrRenderer};
use crate::storage::KeyValueStore;
use std::sync::Arc;

/// Longest key a caller may choose.
pub const MAX_KEY_LEN: usize = 100;

/// Length of keys generated when the caller does not pick one.
pub const GENERATED_KEY_LEN: usize = 12;

/// A stored mapping from key to target URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
    pub key: String,
}

/// JSON body accepted by create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl RedirectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The target URL, which must be present and absolute.
    fn validated_url(&self) -> Result<&str, RedirectError> {
        let url = match self.url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => return Err(RedirectError::Validation("url is required".to_string())),
        };
        validate_url(url)?;
        Ok(url)
    }
}

/// Only absolute URLs are accepted as redirect targets.
///
/// The URL parser silently drops tabs and line breaks, so control
/// characters are rejected up front; the raw string ends up in `Location`.
pub fn validate_url(raw: &str) -> Result<(), RedirectError> {
    if raw.chars().any(|c| c.is_control()) {
        return Err(RedirectError::Validation(format!(
            "invalid url {raw:?}: contains control characters"
        )));
    }
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|e| RedirectError::Validation(format!("invalid url {raw:?}: {e}")))
}

/// Keys are limited to [`MAX_KEY_LEN`] characters.
pub fn validate_key(key: &str) -> Result<(), RedirectError> {
    let len = key.chars().count();
    if len > MAX_KEY_LEN {
        return Err(RedirectError::Validation(format!("key too long ({len})")));
    }
    Ok(())
}

/// Resolves, creates and updates redirects on top of the `redirects` bucket.
///
/// The service never opens transactions itself; each store call is one
/// atomic unit.
pub struct RedirectService {
    store: Arc<dyn KeyValueStore>,
    ids: Arc<dyn IdGenerator>,
    renderer: Arc<dyn QrRenderer>,
}

impl RedirectService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_components(store, Arc::new(NanoIdGenerator), Arc::new(PngRenderer))
    }

    pub fn with_components(
        store: Arc<dyn KeyValueStore>,
        ids: Arc<dyn IdGenerator>,
        renderer: Arc<dyn QrRenderer>,
    ) -> Self {
        Self {
            store,
            ids,
            renderer,
        }
    }
}
