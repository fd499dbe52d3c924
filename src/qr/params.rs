use super::color::{parse_hex_color, BLACK, WHITE};
use super::QrError;
use image::Rgba;

pub const DEFAULT_SIZE: i32 = 256;
pub const MAX_SIZE: i32 = 4096;
/// Negative sizes are pixels per module; -164 is about 4100px without a border.
pub const MIN_SIZE: i32 = -164;

/// Error correction level requested through `level=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrLevel {
    Low,
    Medium,
    High,
    Best,
}

impl QrLevel {
    fn parse(raw: &str) -> Result<Self, QrError> {
        match raw.to_ascii_uppercase().as_str() {
            "" | "M" => Ok(QrLevel::Medium),
            "L" => Ok(QrLevel::Low),
            "H" => Ok(QrLevel::High),
            // "B" is for "Best" since "H" is already used for "High"
            "B" => Ok(QrLevel::Best),
            _ => Err(QrError::InvalidParam(format!(
                "invalid QR level (must be one of L,M,H,B): {raw}"
            ))),
        }
    }
}

/// Fully resolved rendering options.
#[derive(Debug, Clone, PartialEq)]
pub struct QrConfig {
    /// Positive: image width in pixels. Negative: pixels per module.
    pub size: i32,
    pub level: QrLevel,
    pub bg_color: Rgba<u8>,
    pub fg_color: Rgba<u8>,
    pub border: bool,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            level: QrLevel::Medium,
            bg_color: WHITE,
            fg_color: BLACK,
            border: false,
        }
    }
}

impl QrConfig {
    /// Build a config from decoded query pairs. The first occurrence of a
    /// parameter wins; unknown parameters are ignored.
    pub fn from_query(query: &[(String, String)]) -> Result<Self, QrError> {
        let param = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        };

        let size = parse_size(param("size"))?;
        let level = QrLevel::parse(param("level"))?;
        let bg_color = parse_color(param("bg_color"), WHITE)?;
        let fg_color = parse_color(param("fg_color"), BLACK)?;
        let border = parse_bool(param("border"))?;

        Ok(Self {
            size,
            level,
            bg_color,
            fg_color,
            border,
        })
    }
}

fn parse_size(raw: &str) -> Result<i32, QrError> {
    if raw.is_empty() {
        return Ok(DEFAULT_SIZE);
    }
    let requested: i64 = raw
        .parse()
        .map_err(|_| QrError::InvalidParam(format!("invalid size: {raw:?}")))?;
    let size = match requested {
        0 => DEFAULT_SIZE,
        n => n.clamp(i64::from(MIN_SIZE), i64::from(MAX_SIZE)) as i32,
    };
    Ok(size)
}

fn parse_color(raw: &str, default: Rgba<u8>) -> Result<Rgba<u8>, QrError> {
    if raw.is_empty() {
        return Ok(default);
    }
    parse_hex_color(raw).map_err(QrError::InvalidParam)
}

fn parse_bool(raw: &str) -> Result<bool, QrError> {
    match raw {
        "" => Ok(false),
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(QrError::InvalidParam(format!("invalid border: {raw:?}"))),
    }
}
