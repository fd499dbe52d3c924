use super::AppState;
use crate::error::RedirectError;
use crate::metrics::{Metrics, Timer};
use crate::protocol::{HttpParser, Request, Response, Version};
use crate::redirect::{Mode, RedirectRequest, RequestOrigin, Resolution};
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

pub const WELCOME: &str = "Welcome to coral-redirect. This is a private URL shortener.";

/// Serves HTTP requests for one connection at a time.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Handler {
    state: Arc<AppState>,
}

impl Handler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Process requests from a connection until it closes, asks to close,
    /// sends something unparseable or stays silent past the read timeout.
    pub async fn handle_stream<S>(&self, stream: &mut S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let metrics = Metrics::get();
        metrics.increment_connections();

        let mut parser = HttpParser::new(self.state.max_body_bytes);
        let mut buffer = [0; 4096];
        let read_timeout = self.state.read_timeout;

        loop {
            loop {
                match parser.parse() {
                    Ok(Some(request)) => {
                        let keep_alive = request.keep_alive();
                        let response = self.handle_request(&request).await;
                        let bytes = response.to_bytes(request.version, keep_alive);
                        stream.write_all(&bytes).await?;
                        stream.flush().await?;
                        if !keep_alive {
                            return Ok(());
                        }
                    }
                    Ok(None) => break, // Need more data
                    Err(e) => {
                        warn!("Protocol error: {}", e);
                        metrics.record_error("protocol_error");
                        parser.reset();
                        stream.write_all(&e.to_response().to_bytes(Version::Http11, false)).await?;
                        stream.flush().await?;
                        return Ok(());
                    }
                }
            }

            let n = match read_with_timeout(stream, &mut buffer, read_timeout).await {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!("Closing idle connection");
                    if parser.pending() > 0 {
                        let response = Response::text(408, "request timeout");
                        stream.write_all(&response.to_bytes(Version::Http11, false)).await?;
                    }
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(()); // Connection closed
            }
            parser.add_data(&buffer[..n]);
        }
    }

    /// Route a parsed request and record its outcome.
    pub async fn handle_request(&self, request: &Request) -> Response {
        let timer = Timer::new();
        let response = self.route(request).await;
        Metrics::get().record_request(&request.method, response.status, timer.elapsed_seconds());
        debug!("{} {} -> {}", request.method, request.path, response.status);
        response
    }

    async fn route(&self, request: &Request) -> Response {
        let segments = request.segments();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", [""]) => Response::text(200, WELCOME),
            ("GET", ["health"]) => self.health().await,
            ("GET", ["metrics"]) if self.state.telemetry.enabled() => self.metrics(),
            ("GET", [key, rest @ ..]) if !key.is_empty() => {
                self.resolve(request, key, &mode_path(rest)).await
            }
            ("POST", [""]) => self.create(request, None).await,
            ("POST", [key]) => self.create(request, Some(*key)).await,
            ("PUT", [key]) if !key.is_empty() => self.update(request, key).await,
            _ => Response::text(404, "not found"),
        }
    }

    async fn health(&self) -> Response {
        match self.state.health.check().await {
            Ok(()) => Response::json(200, &json!({ "status": "ok" })),
            Err(e) => {
                error!("Health check failed: {}", e);
                Response::json(500, &json!({ "status": "error", "error": e.to_string() }))
            }
        }
    }

    fn metrics(&self) -> Response {
        match self.state.telemetry.render() {
            Some(Ok(text)) => Response::bytes(200, "text/plain; version=0.0.4", text.into_bytes()),
            Some(Err(e)) => {
                error!("Failed to render metrics: {}", e);
                Response::new(500)
            }
            None => Response::text(404, "not found"),
        }
    }

    async fn resolve(&self, request: &Request, key: &str, mode: &str) -> Response {
        let origin = self.origin(request);
        let mode = Mode::parse(mode);

        match self
            .state
            .redirects
            .resolve(key, &mode, &origin, &request.query)
            .await
        {
            Ok(Resolution::Redirect(url)) => Response::redirect(&url),
            Ok(Resolution::Json(redirect)) => Response::json(200, &redirect),
            Ok(Resolution::Text(url)) => Response::text(200, url),
            Ok(Resolution::Qr {
                bytes,
                content_type,
            }) => Response::bytes(200, content_type, bytes),
            Ok(Resolution::NotFound) => Response::text(404, "not found"),
            Err(e) => error_response(e),
        }
    }

    async fn create(&self, request: &Request, key: Option<&str>) -> Response {
        if let Some(denied) = self.authorize(request).await {
            return denied;
        }
        let body = match parse_body(request) {
            Ok(body) => body,
            Err(resp) => return resp,
        };

        match self.state.redirects.create(key, &body).await {
            Ok(redirect) => Response::json(200, &json!({ "status": "success", "redirect": redirect })),
            Err(e) => error_response(e),
        }
    }

    async fn update(&self, request: &Request, key: &str) -> Response {
        if let Some(denied) = self.authorize(request).await {
            return denied;
        }
        let body = match parse_body(request) {
            Ok(body) => body,
            Err(resp) => return resp,
        };

        match self.state.redirects.update(key, &body).await {
            Ok(outcome) => Response::json(
                200,
                &json!({
                    "status": "success",
                    "redirect": outcome.redirect,
                    "replaced": outcome.replaced,
                }),
            ),
            Err(e) => error_response(e),
        }
    }

    async fn authorize(&self, request: &Request) -> Option<Response> {
        if self
            .state
            .auth
            .authorize(request.header("authorization"))
            .await
        {
            None
        } else {
            Some(Response::new(401))
        }
    }

    /// Scheme from `X-Forwarded-Proto` when a proxy set it, host from `Host`.
    fn origin(&self, request: &Request) -> RequestOrigin {
        let scheme = request
            .header("x-forwarded-proto")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(self.state.public_scheme.as_str());
        RequestOrigin::new(scheme, request.header("host").map(str::to_string))
    }
}

/// `/key` and `/key/` are both the default mode.
fn mode_path(rest: &[&str]) -> String {
    format!("/{}", rest.join("/"))
}

fn parse_body(request: &Request) -> Result<RedirectRequest, Response> {
    serde_json::from_slice(&request.body)
        .map_err(|e| Response::error(400, format!("invalid JSON body: {e}")))
}

fn error_response(err: RedirectError) -> Response {
    match err {
        RedirectError::Validation(msg) => Response::error(400, msg),
        RedirectError::Conflict(e) => Response::error(409, e.to_string()),
        RedirectError::Storage(e) => {
            error!("Storage failure: {}", e);
            Metrics::get().record_error("storage");
            Response::error(500, "internal error")
        }
        RedirectError::Render(e) => {
            error!("QR rendering failed: {}", e);
            Metrics::get().record_error("render");
            Response::error(500, "internal error")
        }
    }
}

async fn read_with_timeout<S>(stream: &mut S, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, stream.read(buffer)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
    }
}
