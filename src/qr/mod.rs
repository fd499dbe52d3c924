//! QR code rendering for redirect URLs.

pub mod color;
pub mod params;
pub mod render;

pub use params::{QrConfig, QrLevel};
pub use render::{PngRenderer, QrRenderer};

/// Errors from parsing rendering options or producing the image.
#[derive(Debug, thiserror::Error)]
pub enum QrError {
    /// Caller supplied a bad parameter; a client error.
    #[error("{0}")]
    InvalidParam(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("image encoding failed: {0}")]
    Image(String),
}
