//! Service display colors.
//!
//! Colors are accepted as a raw 32-bit integer or as a string (`"#ff8800"`,
//! `"0xff8800"`, octal `"077"`, or plain decimal) and reduced to 24-bit RGB.
//! Terminals that only support the 216-color ANSI cube get the nearest cube
//! entry via [`Rgb::ansi216`].

use crate::error::{Error, Result};

/// Scale factor from a 0-255 color component down to the 0-5 ANSI cube axis.
const CUBE_NORM_FACTOR: f32 = 5.0 / 256.0;

/// A 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Truncate a 32-bit value to its low 24 bits and split into components.
    pub fn from_u32(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    /// Decode a color string: `#rrggbb`, `0x`/`0X` hex, leading-zero octal,
    /// or plain decimal.
    pub fn decode(text: &str) -> Result<Self> {
        let text = text.trim();
        let parsed = if let Some(hex) = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .or_else(|| text.strip_prefix('#'))
        {
            u32::from_str_radix(hex, 16)
        } else if text.len() > 1 && text.starts_with('0') {
            u32::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u32>()
        };

        parsed
            .map(Self::from_u32)
            .map_err(|_| Error::ConfigInvalid(format!("'{}' is not a valid color", text)))
    }

    /// Index of the nearest entry in the 216-color ANSI cube (codes 16-231).
    /// Each component is mapped to the 0-5 axis with `round(c * 5 / 256)`.
    pub fn ansi216(&self) -> u8 {
        let norm = |c: u8| (CUBE_NORM_FACTOR * c as f32).round() as u8;
        16 + 36 * norm(self.r) + 6 * norm(self.g) + norm(self.b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hex_with_0x_prefix() {
        assert_eq!(
            Rgb::decode("0xff8800").unwrap(),
            Rgb {
                r: 0xff,
                g: 0x88,
                b: 0x00
            }
        );
    }

    #[test]
    fn decodes_hash_prefixed_hex() {
        assert_eq!(
            Rgb::decode("#102030").unwrap(),
            Rgb {
                r: 0x10,
                g: 0x20,
                b: 0x30
            }
        );
    }

    #[test]
    fn decodes_octal_with_leading_zero() {
        // 0777 octal = 511 decimal = 0x0001ff
        assert_eq!(
            Rgb::decode("0777").unwrap(),
            Rgb {
                r: 0,
                g: 1,
                b: 0xff
            }
        );
    }

    #[test]
    fn decodes_plain_decimal() {
        assert_eq!(
            Rgb::decode("255").unwrap(),
            Rgb {
                r: 0,
                g: 0,
                b: 255
            }
        );
    }

    #[test]
    fn from_u32_truncates_to_24_bits() {
        assert_eq!(Rgb::from_u32(0xff_12_34_56), Rgb::from_u32(0x12_34_56));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Rgb::decode("not-a-color").is_err());
        assert!(Rgb::decode("0xgg0000").is_err());
    }

    #[test]
    fn ansi216_maps_cube_corners() {
        assert_eq!(Rgb { r: 0, g: 0, b: 0 }.ansi216(), 16);
        assert_eq!(Rgb::WHITE.ansi216(), 231);
        // pure red: round(255 * 5/256) = 5 on the red axis
        assert_eq!(Rgb { r: 255, g: 0, b: 0 }.ansi216(), 16 + 36 * 5);
    }
}
