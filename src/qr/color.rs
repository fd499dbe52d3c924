//! Hex color parsing for QR foreground/background colors.

use image::Rgba;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Parse `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA` (the `#` is optional).
///
/// Short forms scale each nibble by 17 so `f` becomes `ff`.
pub fn parse_hex_color(input: &str) -> Result<Rgba<u8>, String> {
    let hex = input.strip_prefix('#').unwrap_or(input);

    let value = if !hex.is_empty() && hex.len() <= 8 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        u32::from_str_radix(hex, 16).map_err(|_| format!("invalid hex value: #{hex}"))?
    } else {
        return Err(format!("invalid hex value: #{hex}"));
    };

    let nibble = |shift: u32| ((value >> shift) & 0xF) as u8 * 17;
    let byte = |shift: u32| ((value >> shift) & 0xFF) as u8;

    let rgba = match hex.len() {
        3 => [nibble(8), nibble(4), nibble(0), 255],
        4 => [nibble(12), nibble(8), nibble(4), nibble(0)],
        6 => [byte(16), byte(8), byte(0), 255],
        8 => [byte(24), byte(16), byte(8), byte(0)],
        len => return Err(format!("invalid length for a hex color: #{hex} ({len})")),
    };

    Ok(Rgba(rgba))
}
