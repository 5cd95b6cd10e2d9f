use serde::{Deserialize, Deserializer};

/// Slot tint, kept both as the packed "rrggbbaa" integer the document stores
/// and as normalized float channels the renderer consumes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Color {
    pub rgba: u32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn from_rgba(rgba: u32) -> Self {
        Self {
            rgba,
            r: ((rgba >> 24) & 0xff) as f32 / 255.0,
            g: ((rgba >> 16) & 0xff) as f32 / 255.0,
            b: ((rgba >> 8) & 0xff) as f32 / 255.0,
            a: (rgba & 0xff) as f32 / 255.0,
        }
    }

    /// Malformed hex falls back to opaque white, same as a missing field.
    pub fn parse(hex: &str) -> Self {
        u32::from_str_radix(hex, 16)
            .map(Self::from_rgba)
            .unwrap_or_default()
    }

    pub fn from_channels(r: f32, g: f32, b: f32, a: f32) -> Self {
        let pack = |channel: f32| (channel.clamp(0.0, 1.0) * 255.0).round() as u32;
        Self {
            rgba: (pack(r) << 24) | (pack(g) << 16) | (pack(b) << 8) | pack(a),
            r,
            g,
            b,
            a,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::from_rgba(0xffffffff)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Ok(Color::parse(&hex))
    }
}

pub(crate) fn default_true() -> bool {
    true
}
pub(crate) fn default_one() -> f32 {
    1.0
}
pub(crate) fn default_forward() -> String {
    "forward".into()
}

#[cfg(test)]
mod tests {
    use super::Color;

    #[test]
    fn test_color_hex_parse() {
        let color = Color::parse("ff7f00ff");
        assert_eq!(color.rgba, 0xff7f00ff);
        assert!((color.r - 1.0).abs() < 1e-6);
        assert!((color.g - 127.0 / 255.0).abs() < 1e-6);
        assert!(color.b.abs() < 1e-6);
        assert!((color.a - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_color_default_is_white() {
        assert_eq!(Color::default().rgba, 0xffffffff);
        assert_eq!(Color::parse("not a color").rgba, 0xffffffff);
    }
}
