//! Hex color parsing and the deterministic lighten/darken used for theme
//! variables.

use crate::error::{ForgeError, Result};

/// Parse `#rgb` or `#rrggbb` (leading `#` optional) into RGB channels.
pub fn parse_hex(input: &str) -> Result<[u8; 3]> {
    let hex = input.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ForgeError::InvalidColor(input.to_string()));
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(ForgeError::InvalidColor(input.to_string())),
    };
    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16)
            .map_err(|_| ForgeError::InvalidColor(input.to_string()))?;
    }
    Ok(rgb)
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Normalize any accepted form to lowercase `#rrggbb`.
pub fn normalize(input: &str) -> Result<String> {
    parse_hex(input).map(to_hex)
}

/// Shift every channel by `255 × percent / 100` (rounded), clamped to 0..=255.
/// Negative percentages darken.
pub fn lighten(input: &str, percent: i32) -> Result<String> {
    let rgb = parse_hex(input)?;
    let shift = (255.0 * f64::from(percent) / 100.0).round() as i32;
    let shifted = rgb.map(|c| i32::from(c).saturating_add(shift).clamp(0, 255) as u8);
    Ok(to_hex(shifted))
}
