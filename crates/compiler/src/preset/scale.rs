//! Pass output sizing
//!
//! Scale factors are kept as exact fractions so that sizing policies can be compared
//! structurally when the graph builder decides which outputs may share a target. The
//! parser accepts integers ("2"), fractions ("1/2") and decimals ("1.5").

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents a rational scale factor as a fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScaleFactor {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl ScaleFactor {
    /// Creates a new scale factor from numerator and denominator, reduced to lowest terms
    pub fn new(numerator: u32, denominator: u32) -> Self {
        let divisor = gcd(numerator, denominator).max(1);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    pub const ONE: ScaleFactor = ScaleFactor { numerator: 1, denominator: 1 };

    /// Converts the scale factor to a floating-point value
    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Returns true if this scale factor equals 1.0 (no scaling)
    pub fn is_unity(&self) -> bool {
        self.numerator == self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    pub fn is_integer(&self) -> bool {
        self.denominator == 1
    }

    /// Scales a pixel dimension, rounding to nearest and never returning less than one pixel
    pub fn apply(&self, size: u32) -> u32 {
        let scaled = (size as u64 * self.numerator as u64 + self.denominator as u64 / 2) / self.denominator as u64;
        scaled.clamp(1, u32::MAX as u64) as u32
    }

    /// Formats the factor the way preset files spell it
    ///
    /// Fractions with a terminating decimal expansion are written as decimals ("1.5");
    /// anything else falls back to "n/d", which the parser also accepts.
    pub fn to_preset_string(&self) -> String {
        if self.is_integer() {
            return self.numerator.to_string();
        }
        let mut denominator = self.denominator;
        let (mut twos, mut fives) = (0u32, 0u32);
        while denominator % 2 == 0 {
            denominator /= 2;
            twos += 1;
        }
        while denominator % 5 == 0 {
            denominator /= 5;
            fives += 1;
        }
        if denominator != 1 {
            return self.to_string();
        }
        let digits = twos.max(fives);
        let power = 10u64.pow(digits);
        let scaled = self.numerator as u64 * (power / self.denominator as u64);
        let integer = scaled / power;
        let fraction = scaled % power;
        format!("{integer}.{fraction:0width$}", width = digits as usize)
    }
}

impl FromStr for ScaleFactor {
    type Err = ScaleFactorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            let parts: Vec<&str> = s.split('/').collect();
            if parts.len() != 2 {
                return Err(ScaleFactorParseError::InvalidFormat);
            }

            let numerator = parts[0].trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
            let denominator = parts[1].trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidDenominator)?;

            if denominator == 0 {
                return Err(ScaleFactorParseError::ZeroDenominator);
            }

            Ok(ScaleFactor::new(numerator, denominator))
        } else if let Some((integer, fraction)) = s.split_once('.') {
            // Decimal notation such as "1.5" or ".25"
            if fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ScaleFactorParseError::InvalidFormat);
            }
            let integer = if integer.is_empty() { 0 } else { integer.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)? };
            let fraction_value = if fraction.is_empty() { 0 } else { fraction.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)? };
            let denominator = 10u32.pow(fraction.len() as u32);
            let numerator = integer
                .checked_mul(denominator)
                .and_then(|n| n.checked_add(fraction_value))
                .ok_or(ScaleFactorParseError::InvalidNumerator)?;
            Ok(ScaleFactor::new(numerator, denominator))
        } else {
            // Handle whole numbers like "1", "2", etc.
            let numerator = s.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
            Ok(ScaleFactor::new(numerator, 1))
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl<'de> Deserialize<'de> for ScaleFactor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error types for scale factor parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleFactorParseError {
    /// The format is not recognized (should be "n", "n/d" or "n.m")
    InvalidFormat,
    /// The numerator is not a valid integer
    InvalidNumerator,
    /// The denominator is not a valid integer
    InvalidDenominator,
    /// The denominator is zero (division by zero)
    ZeroDenominator,
}

impl fmt::Display for ScaleFactorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "Invalid scale factor format"),
            Self::InvalidNumerator => write!(f, "Invalid numerator"),
            Self::InvalidDenominator => write!(f, "Invalid denominator"),
            Self::ZeroDenominator => write!(f, "Denominator cannot be zero"),
        }
    }
}

impl std::error::Error for ScaleFactorParseError {}

/// What a pass's output size is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    /// Relative to the previous pass's output (the primary input for pass 0)
    Source,
    /// Relative to the final viewport
    Viewport,
    /// A fixed pixel count
    Absolute,
    /// Relative to the primary input regardless of pass position
    Original,
}

impl ScaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Viewport => "viewport",
            Self::Absolute => "absolute",
            Self::Original => "original",
        }
    }
}

impl FromStr for ScaleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "viewport" => Ok(Self::Viewport),
            "absolute" => Ok(Self::Absolute),
            "original" => Ok(Self::Original),
            other => Err(format!("unknown scale type `{other}`")),
        }
    }
}

/// Sizing policy for one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AxisScale {
    pub scale_type: ScaleType,
    /// Multiplier for relative types, pixel count for [`ScaleType::Absolute`]
    pub factor: ScaleFactor,
}

impl AxisScale {
    pub const SOURCE: AxisScale = AxisScale {
        scale_type: ScaleType::Source,
        factor: ScaleFactor::ONE,
    };

    pub const VIEWPORT: AxisScale = AxisScale {
        scale_type: ScaleType::Viewport,
        factor: ScaleFactor::ONE,
    };
}

/// Sizing policy for both axes of a pass output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PassScale {
    pub x: AxisScale,
    pub y: AxisScale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("2".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(2, 1));
        assert_eq!("1/2".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(1, 2));
        assert_eq!("1.5".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(3, 2));
        assert_eq!("0.25".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(1, 4));
        assert_eq!("4.0".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(4, 1));
        assert_eq!("6/4".parse::<ScaleFactor>().unwrap(), ScaleFactor::new(3, 2));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("1/0".parse::<ScaleFactor>(), Err(ScaleFactorParseError::ZeroDenominator));
        assert_eq!("1/2/3".parse::<ScaleFactor>(), Err(ScaleFactorParseError::InvalidFormat));
        assert_eq!("abc".parse::<ScaleFactor>(), Err(ScaleFactorParseError::InvalidNumerator));
        assert_eq!("1.x".parse::<ScaleFactor>(), Err(ScaleFactorParseError::InvalidFormat));
        assert_eq!("-1".parse::<ScaleFactor>(), Err(ScaleFactorParseError::InvalidNumerator));
    }

    #[test]
    fn test_preset_string_forms() {
        assert_eq!(ScaleFactor::new(3, 1).to_preset_string(), "3");
        assert_eq!(ScaleFactor::new(3, 2).to_preset_string(), "1.5");
        assert_eq!(ScaleFactor::new(1, 8).to_preset_string(), "0.125");
        assert_eq!(ScaleFactor::new(1, 3).to_preset_string(), "1/3");

        for text in ["1.5", "0.125", "1/3", "7"] {
            let factor: ScaleFactor = text.parse().unwrap();
            assert_eq!(factor.to_preset_string().parse::<ScaleFactor>().unwrap(), factor);
        }
    }

    #[test]
    fn test_apply_rounds_and_clamps() {
        assert_eq!(ScaleFactor::new(3, 2).apply(320), 480);
        assert_eq!(ScaleFactor::new(1, 3).apply(100), 33);
        assert_eq!(ScaleFactor::new(1, 2).apply(1), 1);
        assert_eq!(ScaleFactor::new(0, 1).apply(100), 1);
    }

    #[test]
    fn test_scale_type_names() {
        for scale_type in [ScaleType::Source, ScaleType::Viewport, ScaleType::Absolute, ScaleType::Original] {
            assert_eq!(scale_type.as_str().parse::<ScaleType>().unwrap(), scale_type);
        }
        assert!("window".parse::<ScaleType>().is_err());
    }
}
