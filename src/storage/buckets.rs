//! The three buckets the service runs on, opened once at startup.

use super::instrumented::InstrumentedStore;
use super::{KeyValueStore, StorageBackend, StorageError};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const REDIRECTS: &str = "redirects";
pub const API_KEYS: &str = "api_keys";
pub const HEALTH_CHECKS: &str = "health_checks";

/// Sentinel key in `health_checks` and the only value it may hold.
pub const HEALTH_KEY: &[u8] = b"health";
pub const HEALTH_MARKER: &[u8] = b"ok";

/// Handles to every bucket. Cheap to clone; all handles share the backend.
#[derive(Clone)]
pub struct Buckets {
    pub redirects: Arc<dyn KeyValueStore>,
    pub api_keys: Arc<dyn KeyValueStore>,
    pub health_checks: Arc<dyn KeyValueStore>,
}

impl Buckets {
    /// Create the buckets if needed and seed the health sentinel.
    ///
    /// The sentinel is only written when absent. A value that was changed
    /// behind the service's back stays as it is so health checks report it.
    pub async fn initialize(backend: &dyn StorageBackend) -> Result<Self, StorageError> {
        let open = |name: &str| -> Result<Arc<dyn KeyValueStore>, StorageError> {
            debug!(bucket = name, backend = backend.name(), "Opening bucket");
            let inner = backend.bucket(name)?;
            Ok(Arc::new(InstrumentedStore::new(inner, name)))
        };

        let buckets = Self {
            redirects: open(REDIRECTS)?,
            api_keys: open(API_KEYS)?,
            health_checks: open(HEALTH_CHECKS)?,
        };

        match buckets
            .health_checks
            .exclusive_put(HEALTH_KEY, HEALTH_MARKER)
            .await
        {
            Ok(()) => info!("Seeded health check sentinel"),
            Err(StorageError::AlreadyExists(_)) => {
                let current = buckets.health_checks.get(HEALTH_KEY).await?;
                if current.as_deref() != Some(HEALTH_MARKER) {
                    warn!("Health check sentinel holds an unexpected value");
                }
            }
            Err(e) => return Err(e),
        }

        Ok(buckets)
    }
}
