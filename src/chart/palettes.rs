//! Color definitions for generated charts
//!
//! Provides the default brand color and categorical palette, plus helpers to
//! normalize user-supplied colors.

use crate::{ChatsqlError, Result};

/// Brand color used for single-series charts and the metric tile
pub const BRAND: &str = "#167147";

/// Categorical palette for pie slices. Slices beyond its length reuse colors
/// from the start.
pub const CATEGORICAL: &[&str] = &[
    "#167147", "#4E7BE9", "#4EE997", "#E94E7B", "#7BE94E", "#E9974E",
];

/// Convert a CSS color name/value to hex format.
/// Supports named colors (e.g., "red"), hex (#FF0000), rgb(), rgba(), hsl(), etc.
pub fn color_to_hex(value: &str) -> Result<String> {
    csscolorparser::parse(value)
        .map(|c| c.to_css_hex())
        .map_err(|e| ChatsqlError::ValidationError(format!("Invalid color '{}': {}", value, e)))
}

/// Normalize a list of colors, failing on the first invalid entry
pub fn palette_to_hex<S: AsRef<str>>(colors: &[S]) -> Result<Vec<String>> {
    colors.iter().map(|c| color_to_hex(c.as_ref())).collect()
}

/// Expand a palette to `count` colors, cycling when more are needed than it holds
pub fn expand_palette<S: AsRef<str>>(palette: &[S], count: usize) -> Vec<String> {
    palette
        .iter()
        .cycle()
        .take(count)
        .map(|s| s.as_ref().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorical_has_six_colors() {
        assert_eq!(CATEGORICAL.len(), 6);
        assert_eq!(CATEGORICAL[0], BRAND);
    }

    #[test]
    fn test_color_to_hex_named_colors() {
        assert_eq!(color_to_hex("red").unwrap(), "#ff0000");
        assert_eq!(color_to_hex("white").unwrap(), "#ffffff");
    }

    #[test]
    fn test_color_to_hex_hex_values() {
        assert_eq!(color_to_hex("#167147").unwrap(), "#167147");
        assert_eq!(color_to_hex("#F00").unwrap(), "#ff0000");
    }

    #[test]
    fn test_color_to_hex_invalid() {
        let err = color_to_hex("notacolor").unwrap_err();
        assert!(err.to_string().contains("Invalid color"));
    }

    #[test]
    fn test_palette_to_hex() {
        let colors = palette_to_hex(&["red", "rgb(0, 0, 255)"]).unwrap();
        assert_eq!(colors, vec!["#ff0000", "#0000ff"]);
        assert!(palette_to_hex(&["red", "nope"]).is_err());
    }

    #[test]
    fn test_expand_palette_cycles() {
        let expanded = expand_palette(CATEGORICAL, 8);
        assert_eq!(expanded.len(), 8);
        assert_eq!(expanded[6], expanded[0]);
        assert_eq!(expanded[7], expanded[1]);
    }
}
