use crate::storage::buckets::{HEALTH_KEY, HEALTH_MARKER};
use crate::storage::{KeyValueStore, StorageError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("expected \"ok\", got: {found:?}")]
    Unexpected { found: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Liveness check over the `health_checks` sentinel.
#[derive(Clone)]
pub struct HealthCheck {
    health_checks: Arc<dyn KeyValueStore>,
}

impl HealthCheck {
    pub fn new(health_checks: Arc<dyn KeyValueStore>) -> Self {
        Self { health_checks }
    }

    /// Healthy only while the sentinel holds its marker. A missing sentinel
    /// reads as an empty value.
    pub async fn check(&self) -> Result<(), HealthError> {
        let value = self.health_checks.get(HEALTH_KEY).await?;
        match value.as_deref() {
            Some(HEALTH_MARKER) => Ok(()),
            other => Err(HealthError::Unexpected {
                found: String::from_utf8_lossy(other.unwrap_or_default()).into_owned(),
            }),
        }
    }
}
