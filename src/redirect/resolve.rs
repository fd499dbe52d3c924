use super::{Redirect, RedirectService};
use crate::error::RedirectError;
use crate::metrics::Metrics;
use crate::qr::QrConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tracing::{debug, info};
use url::Url;

/// Longest `Host` accepted when building canonical URLs (a DNS name is at
/// most 253 bytes, plus room for a port).
pub const MAX_HOST_LEN: usize = 255;

/// Characters escaped so a key stays a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Representation requested through the path remainder after the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Redirect,
    Json,
    Text,
    Qr,
    Unknown(String),
}

impl Mode {
    /// `""` and `"/"` select the plain redirect.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" | "/" => Mode::Redirect,
            "/json" => Mode::Json,
            "/text" => Mode::Text,
            "/qr" => Mode::Qr,
            other => Mode::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Redirect => "redirect",
            Mode::Json => "json",
            Mode::Text => "text",
            Mode::Qr => "qr",
            Mode::Unknown(_) => "unknown",
        }
    }
}

/// Where the request came from, used to build the canonical URL of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    pub scheme: String,
    pub host: Option<String>,
}

impl RequestOrigin {
    pub fn new(scheme: impl Into<String>, host: Option<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host,
        }
    }

    /// `<scheme>://<host>/<key>`
    pub fn url_for(&self, key: &str) -> Result<Url, RedirectError> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RedirectError::Validation("missing Host header".to_string()))?;
        if host.len() > MAX_HOST_LEN {
            return Err(RedirectError::Validation(format!(
                "Host header too long ({})",
                host.len()
            )));
        }
        let mut url = Url::parse(&format!("{}://{}/", self.scheme, host))
            .map_err(|e| RedirectError::Validation(format!("invalid host {host:?}: {e}")))?;
        url.set_path(&utf8_percent_encode(key, SEGMENT).to_string());
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Temporary redirect to the stored URL.
    Redirect(String),
    Json(Redirect),
    Text(String),
    Qr {
        bytes: Vec<u8>,
        content_type: &'static str,
    },
    NotFound,
}

impl RedirectService {
    /// Look up `key` and format it for `mode`.
    ///
    /// The lookup always happens first: a missing key is `NotFound` for
    /// every mode, and an unknown mode on an existing key is also
    /// `NotFound`.
    pub async fn resolve(
        &self,
        key: &str,
        mode: &Mode,
        origin: &RequestOrigin,
        query: &[(String, String)],
    ) -> Result<Resolution, RedirectError> {
        let stored = match self.store.get(key.as_bytes()).await? {
            Some(value) => String::from_utf8_lossy(&value).into_owned(),
            None => {
                debug!("No redirect for key {:?}", key);
                Metrics::get().record_resolved(mode.as_str(), false);
                return Ok(Resolution::NotFound);
            }
        };

        let resolution = match mode {
            Mode::Redirect => {
                debug!("Redirecting {:?} to {}", key, stored);
                Resolution::Redirect(stored)
            }
            Mode::Json => Resolution::Json(Redirect {
                url: stored,
                key: key.to_string(),
            }),
            Mode::Text => Resolution::Text(stored),
            Mode::Qr => {
                let target = origin.url_for(key)?;
                let config = QrConfig::from_query(query)?;
                let bytes = self.renderer.render(target.as_str(), &config)?;
                Resolution::Qr {
                    bytes,
                    content_type: self.renderer.content_type(),
                }
            }
            Mode::Unknown(raw) => {
                info!("Unknown mode {:?} for key {:?}", raw, key);
                Metrics::get().record_resolved(mode.as_str(), false);
                return Ok(Resolution::NotFound);
            }
        };

        Metrics::get().record_resolved(mode.as_str(), true);
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::{QrError, QrRenderer};
    use crate::redirect::NanoIdGenerator;
    use crate::storage::memory::MemoryBucket;
    use crate::storage::{KeyValueStore, StorageError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records what it was asked to render instead of producing an image.
    #[derive(Default)]
    struct CapturingRenderer {
        calls: Mutex<Vec<(String, QrConfig)>>,
    }

    impl QrRenderer for CapturingRenderer {
        fn render(&self, text: &str, config: &QrConfig) -> Result<Vec<u8>, QrError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), config.clone()));
            Ok(b"qr".to_vec())
        }

        fn content_type(&self) -> &'static str {
            "image/test"
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
            Err(StorageError::Unavailable("disk on fire".to_string()))
        }
        async fn put(&self, _key: &[u8], _value: &[u8]) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn exclusive_put(&self, _key: &[u8], _value: &[u8]) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn replace(&self, _key: &[u8], _value: &[u8]) -> Result<Vec<u8>, StorageError> {
            unreachable!()
        }
        async fn delete(&self, _key: &[u8]) -> Result<(), StorageError> {
            unreachable!()
        }
    }

    fn origin() -> RequestOrigin {
        RequestOrigin::new("https", Some("go.example".to_string()))
    }

    async fn seeded() -> (RedirectService, Arc<CapturingRenderer>) {
        let store = Arc::new(MemoryBucket::default());
        store.put(b"abc", b"https://example.com").await.unwrap();
        let renderer = Arc::new(CapturingRenderer::default());
        let service = RedirectService::with_components(
            store,
            Arc::new(NanoIdGenerator),
            renderer.clone(),
        );
        (service, renderer)
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("/"), Mode::Redirect);
        assert_eq!(Mode::parse(""), Mode::Redirect);
        assert_eq!(Mode::parse("/json"), Mode::Json);
        assert_eq!(Mode::parse("/text"), Mode::Text);
        assert_eq!(Mode::parse("/qr"), Mode::Qr);
        assert_eq!(Mode::parse("/qr/extra"), Mode::Unknown("/qr/extra".to_string()));
        assert_eq!(Mode::parse("/JSON"), Mode::Unknown("/JSON".to_string()));
    }

    #[test]
    fn test_origin_url() {
        let url = origin().url_for("abc").unwrap();
        assert_eq!(url.as_str(), "https://go.example/abc");

        let url = RequestOrigin::new("http", Some("localhost:8080".to_string()))
            .url_for("a b")
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/a%20b");

        assert!(RequestOrigin::new("https", None).url_for("abc").is_err());
    }

    #[test]
    fn test_origin_url_keeps_key_in_one_segment() {
        let o = origin();
        assert_eq!(o.url_for("a/b").unwrap().as_str(), "https://go.example/a%2Fb");
        assert_eq!(o.url_for("a?b#c").unwrap().as_str(), "https://go.example/a%3Fb%23c");
        assert_eq!(o.url_for("100%").unwrap().as_str(), "https://go.example/100%25");
    }

    #[test]
    fn test_origin_rejects_oversized_host() {
        let long = RequestOrigin::new("https", Some("a".repeat(MAX_HOST_LEN + 1)));
        assert!(matches!(
            long.url_for("abc"),
            Err(RedirectError::Validation(_))
        ));

        let ok = RequestOrigin::new("https", Some(format!("{}.example", "a".repeat(60))));
        assert!(ok.url_for("abc").is_ok());
    }

    #[tokio::test]
    async fn test_resolve_modes() {
        let (service, _) = seeded().await;
        let o = origin();

        assert_eq!(
            service.resolve("abc", &Mode::Redirect, &o, &[]).await.unwrap(),
            Resolution::Redirect("https://example.com".to_string())
        );
        assert_eq!(
            service.resolve("abc", &Mode::Json, &o, &[]).await.unwrap(),
            Resolution::Json(Redirect {
                url: "https://example.com".to_string(),
                key: "abc".to_string(),
            })
        );
        assert_eq!(
            service.resolve("abc", &Mode::Text, &o, &[]).await.unwrap(),
            Resolution::Text("https://example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found_for_every_mode() {
        let (service, _) = seeded().await;
        for mode in ["/", "/json", "/text", "/qr", "/bogus"] {
            let resolution = service
                .resolve("missing", &Mode::parse(mode), &origin(), &[])
                .await
                .unwrap();
            assert_eq!(resolution, Resolution::NotFound, "mode {mode}");
        }
    }

    #[tokio::test]
    async fn test_unknown_mode_after_lookup() {
        let (service, _) = seeded().await;
        let resolution = service
            .resolve("abc", &Mode::parse("/bogus"), &origin(), &[])
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_qr_uses_canonical_url_and_clamps_size() {
        let (service, renderer) = seeded().await;
        let query = vec![("size".to_string(), "5000".to_string())];

        let resolution = service
            .resolve("abc", &Mode::Qr, &origin(), &query)
            .await
            .unwrap();
        assert_eq!(
            resolution,
            Resolution::Qr {
                bytes: b"qr".to_vec(),
                content_type: "image/test",
            }
        );

        let calls = renderer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://go.example/abc");
        assert_eq!(calls[0].1.size, crate::qr::params::MAX_SIZE);
    }

    #[tokio::test]
    async fn test_qr_bad_params_are_validation_errors() {
        let (service, renderer) = seeded().await;
        let query = vec![("bg_color".to_string(), "invalidcolor".to_string())];

        let err = service
            .resolve("abc", &Mode::Qr, &origin(), &query)
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Validation(_)));
        assert!(renderer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_swallowed() {
        let service = RedirectService::new(Arc::new(BrokenStore));
        let err = service
            .resolve("abc", &Mode::Redirect, &origin(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectError::Storage(_)));
    }
}
