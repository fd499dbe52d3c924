//! HTTP/1.1 wire protocol.

pub mod http;

pub use http::{HttpParser, ProtocolError, Request, Response, Version};
