use super::{validate_key, Redirect, RedirectRequest, RedirectService};
use crate::error::RedirectError;
use crate::metrics::Metrics;
use serde::Serialize;
use tracing::{error, info, warn};

/// Result of a successful update: the new mapping and the one it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub redirect: Redirect,
    pub replaced: Redirect,
}

impl RedirectService {
    /// Create a redirect. A key in the path wins over one in the body; with
    /// neither, a key is generated.
    ///
    /// Generated keys are not checked for uniqueness up front. A collision
    /// surfaces as a conflict from the exclusive write.
    pub async fn create(
        &self,
        path_key: Option<&str>,
        request: &RedirectRequest,
    ) -> Result<Redirect, RedirectError> {
        let url = request.validated_url()?;

        let chosen = path_key
            .filter(|k| !k.is_empty())
            .or_else(|| request.key.as_deref().filter(|k| !k.is_empty()));
        let generated = chosen.is_none();
        let key = match chosen {
            Some(key) => key.to_string(),
            None => self.ids.generate(),
        };
        validate_key(&key)?;

        if let Err(e) = self
            .store
            .exclusive_put(key.as_bytes(), url.as_bytes())
            .await
        {
            return Err(write_failed("create", &key, e.into()));
        }

        info!("Created redirect {:?} -> {}", key, url);
        Metrics::get().record_created(generated);
        Ok(Redirect {
            url: url.to_string(),
            key,
        })
    }

    /// Replace the URL of an existing key, returning the overwritten mapping.
    pub async fn update(
        &self,
        key: &str,
        request: &RedirectRequest,
    ) -> Result<UpdateOutcome, RedirectError> {
        if key.is_empty() {
            return Err(RedirectError::Validation("key is required".to_string()));
        }
        validate_key(key)?;
        let url = request.validated_url()?;

        let old = match self.store.replace(key.as_bytes(), url.as_bytes()).await {
            Ok(old) => old,
            Err(e) => return Err(write_failed("update", key, e.into())),
        };

        let replaced = Redirect {
            url: String::from_utf8_lossy(&old).into_owned(),
            key: key.to_string(),
        };
        info!("Updated redirect {:?}: {} -> {}", key, replaced.url, url);
        Metrics::get().record_updated();
        Ok(UpdateOutcome {
            redirect: Redirect {
                url: url.to_string(),
                key: key.to_string(),
            },
            replaced,
        })
    }
}

fn write_failed(operation: &str, key: &str, err: RedirectError) -> RedirectError {
    match &err {
        RedirectError::Conflict(_) => {
            warn!("{} {:?} conflicted: {}", operation, key, err);
            Metrics::get().record_conflict(operation);
        }
        RedirectError::Storage(_) => error!("{} {:?} failed: {}", operation, key, err),
        _ => {}
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::PngRenderer;
    use crate::redirect::{IdGenerator, Mode, RequestOrigin, Resolution, GENERATED_KEY_LEN};
    use crate::storage::memory::MemoryBucket;
    use crate::storage::{KeyValueStore, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Hands out ids from a fixed list, repeating the last one.
    struct FixedIds {
        ids: Vec<&'static str>,
        next: AtomicUsize,
    }

    impl FixedIds {
        fn new(ids: Vec<&'static str>) -> Self {
            Self {
                ids,
                next: AtomicUsize::new(0),
            }
        }
    }

    impl IdGenerator for FixedIds {
        fn generate(&self) -> String {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            self.ids[i.min(self.ids.len() - 1)].to_string()
        }
    }

    fn service() -> (RedirectService, Arc<MemoryBucket>) {
        let store = Arc::new(MemoryBucket::default());
        (RedirectService::new(store.clone()), store)
    }

    fn origin() -> RequestOrigin {
        RequestOrigin::new("https", Some("go.example".to_string()))
    }

    #[tokio::test]
    async fn test_create_generates_key() {
        let (service, _) = service();
        let created = service
            .create(None, &RedirectRequest::new("https://example.com"))
            .await
            .unwrap();
        assert_eq!(created.key.len(), GENERATED_KEY_LEN);

        let resolution = service
            .resolve(&created.key, &Mode::Json, &origin(), &[])
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Json(created));
    }

    #[tokio::test]
    async fn test_path_key_wins_over_body_key() {
        let (service, store) = service();
        let request = RedirectRequest::new("https://example.com").with_key("from-body");

        let created = service.create(Some("from-path"), &request).await.unwrap();
        assert_eq!(created.key, "from-path");
        assert!(store.get(b"from-body").await.unwrap().is_none());

        let created = service.create(None, &request).await.unwrap();
        assert_eq!(created.key, "from-body");
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let (service, store) = service();
        let first = RedirectRequest::new("https://example.com/1");
        let second = RedirectRequest::new("https://example.com/2");

        service.create(Some("dup"), &first).await.unwrap();
        let err = service.create(Some("dup"), &second).await.unwrap_err();
        assert!(matches!(
            err,
            RedirectError::Conflict(StorageError::AlreadyExists(_))
        ));
        assert_eq!(
            store.get(b"dup").await.unwrap(),
            Some(b"https://example.com/1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_generated_collision_is_a_conflict() {
        let store = Arc::new(MemoryBucket::default());
        let service = RedirectService::with_components(
            store,
            Arc::new(FixedIds::new(vec!["same"])),
            Arc::new(PngRenderer),
        );
        let request = RedirectRequest::new("https://example.com");

        service.create(None, &request).await.unwrap();
        let err = service.create(None, &request).await.unwrap_err();
        assert!(matches!(err, RedirectError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (service, store) = service();

        let err = service
            .create(None, &RedirectRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));

        let err = service
            .create(None, &RedirectRequest::new("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));

        let long = "A".repeat(200);
        let err = service
            .create(Some(&long), &RedirectRequest::new("https://example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "key too long (200)");
        assert!(store.get(long.as_bytes()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_breaks_in_url_are_rejected() {
        let (service, store) = service();
        let injected = "https://example.com/\r\nSet-Cookie: evil=1";

        let err = service
            .create(Some("x"), &RedirectRequest::new(injected))
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));
        assert!(store.get(b"x").await.unwrap().is_none());

        store.put(b"x", b"https://example.com").await.unwrap();
        let err = service
            .update("x", &RedirectRequest::new(injected))
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));
        assert_eq!(
            store.get(b"x").await.unwrap(),
            Some(b"https://example.com".to_vec())
        );
    }

    #[tokio::test]
    async fn test_update_returns_replaced() {
        let (service, store) = service();
        service
            .create(Some("k"), &RedirectRequest::new("https://old.example"))
            .await
            .unwrap();

        let outcome = service
            .update("k", &RedirectRequest::new("https://new.example"))
            .await
            .unwrap();
        assert_eq!(outcome.replaced.url, "https://old.example");
        assert_eq!(outcome.redirect.url, "https://new.example");
        assert_eq!(outcome.redirect.key, "k");
        assert_eq!(
            store.get(b"k").await.unwrap(),
            Some(b"https://new.example".to_vec())
        );
    }

    #[tokio::test]
    async fn test_update_missing_key_conflicts() {
        let (service, store) = service();
        let err = service
            .update("nope", &RedirectRequest::new("https://example.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RedirectError::Conflict(StorageError::DoesNotExist(_))
        ));
        assert!(store.get(b"nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_validates_url_before_writing() {
        let (service, store) = service();
        store.put(b"k", b"https://old.example").await.unwrap();

        let err = service
            .update("k", &RedirectRequest::new("::::"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));
        assert_eq!(
            store.get(b"k").await.unwrap(),
            Some(b"https://old.example".to_vec())
        );
    }
}
