use bytes::{Buf, BytesMut};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tracing::warn;

/// Upper bound on the request line plus headers.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Errors that end a request before it reaches a route.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request headers exceed {0} bytes")]
    HeadTooLarge(usize),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl ProtocolError {
    pub fn status(&self) -> u16 {
        match self {
            ProtocolError::Malformed(_) => 400,
            ProtocolError::HeadTooLarge(_) => 431,
            ProtocolError::BodyTooLarge(_) => 413,
            ProtocolError::NotImplemented(_) => 501,
        }
    }

    /// Response sent before the connection is closed.
    pub fn to_response(&self) -> Response {
        Response::text(self.status(), self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// A fully received HTTP/1.x request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Raw path, still percent-encoded.
    pub path: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    pub version: Version,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Percent-decoded path segments. `/` yields one empty segment.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .strip_prefix('/')
            .unwrap_or(&self.path)
            .split('/')
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect()
    }

    pub fn keep_alive(&self) -> bool {
        match self.header("connection").map(str::to_ascii_lowercase) {
            Some(v) if v == "close" => false,
            Some(v) if v == "keep-alive" => true,
            _ => self.version == Version::Http11,
        }
    }
}

/// Incremental request parser.
///
/// Bytes are accumulated with `add_data`; `parse` returns a request once
/// the head and the whole `Content-Length` body have arrived.
pub struct HttpParser {
    buffer: BytesMut,
    max_body: usize,
}

impl HttpParser {
    pub fn new(max_body: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_body,
        }
    }

    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes received but not yet consumed by a request.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Parse the next complete request. Returns None if incomplete.
    pub fn parse(&mut self) -> Result<Option<Request>, ProtocolError> {
        // Tolerate stray line breaks between pipelined requests.
        while self.buffer.starts_with(b"\r\n") {
            self.buffer.advance(2);
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let head_end = match self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(pos) => pos,
            None if self.buffer.len() > MAX_HEAD_BYTES => {
                return Err(ProtocolError::HeadTooLarge(MAX_HEAD_BYTES))
            }
            None => return Ok(None),
        };
        if head_end > MAX_HEAD_BYTES {
            return Err(ProtocolError::HeadTooLarge(MAX_HEAD_BYTES));
        }

        let head = std::str::from_utf8(&self.buffer[..head_end])
            .map_err(|_| ProtocolError::Malformed("request head is not UTF-8".to_string()))?;
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let (method, target, version) = parse_request_line(request_line)?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::Malformed(format!("invalid header line: {line:?}")))?;
            if name.is_empty() || name.ends_with(' ') {
                return Err(ProtocolError::Malformed(format!("invalid header name: {name:?}")));
            }
            headers.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }

        if headers.iter().any(|(k, _)| k == "transfer-encoding") {
            return Err(ProtocolError::NotImplemented(
                "transfer-encoding is not supported".to_string(),
            ));
        }

        let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
            Some((_, v)) => v
                .parse::<usize>()
                .map_err(|_| ProtocolError::Malformed(format!("invalid content-length: {v:?}")))?,
            None => 0,
        };
        if content_length > self.max_body {
            return Err(ProtocolError::BodyTooLarge(self.max_body));
        }

        let (path, query) = split_target(target)?;
        let request_len = head_end + 4 + content_length;
        if self.buffer.len() < request_len {
            return Ok(None); // Not enough data
        }

        let request = Request {
            method: method.to_string(),
            path,
            query,
            version,
            headers,
            body: Vec::new(),
        };
        self.buffer.advance(head_end + 4);
        let body = self.buffer.split_to(content_length).to_vec();

        Ok(Some(Request { body, ..request }))
    }
}

fn parse_request_line(line: &str) -> Result<(&str, &str, Version), ProtocolError> {
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::Malformed(format!("invalid request line: {line:?}")));
    };

    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ProtocolError::Malformed(format!("invalid method: {method:?}")));
    }
    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        other => {
            return Err(ProtocolError::NotImplemented(format!(
                "unsupported version {other:?}"
            )))
        }
    };
    Ok((method, target, version))
}

fn split_target(target: &str) -> Result<(String, Vec<(String, String)>), ProtocolError> {
    if !target.starts_with('/') {
        return Err(ProtocolError::Malformed(format!("invalid request target: {target:?}")));
    }
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    Ok((path.to_string(), query))
}

/// An HTTP response ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header. Names or values that could break out of the header
    /// line (CR, LF or other control characters) are refused and logged.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !is_header_safe(name) || !is_header_safe(&value) {
            warn!("Refusing unsafe response header {:?}", name);
            return self;
        }
        self.headers.push((name.to_string(), value));
        self
    }

    pub fn bytes(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::new(status).with_header("Content-Type", content_type)
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::bytes(status, "text/plain; charset=utf-8", body.into().into_bytes())
    }

    /// Serialize `body` as JSON. Falls back to a 500 if that fails.
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(json) => Self::bytes(status, "application/json; charset=utf-8", json),
            Err(e) => Self::text(500, format!("failed to encode response: {e}")),
        }
    }

    /// `{"error": message}`
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &serde_json::json!({ "error": message.into() }))
    }

    /// 307, so clients re-check a mapping that may change. A target that
    /// cannot be sent as a header is a server error.
    pub fn redirect(location: &str) -> Self {
        if !is_header_safe(location) {
            warn!("Stored redirect target is not a valid header value");
            return Self::text(500, "invalid redirect target");
        }
        Self::new(307).with_header("Location", location)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire format for a client speaking `version`.
    ///
    /// HTTP/1.0 connections close by default, so keeping one open has to
    /// be announced.
    pub fn to_bytes(&self, version: Version, keep_alive: bool) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        match (keep_alive, version) {
            (false, _) => head.push_str("Connection: close\r\n"),
            (true, Version::Http10) => head.push_str("Connection: keep-alive\r\n"),
            (true, Version::Http11) => {}
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn is_header_safe(text: &str) -> bool {
    !text.chars().any(|c| c.is_control() && c != '\t')
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "",
    }
}
