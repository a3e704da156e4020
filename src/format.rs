//! printf-style number formatting.
//!
//! Regression baselines are written with C-style `%g` formatting, and some
//! archives are deliberately written at reduced precision (for example
//! `%.10g`) to stay compatible with older baselines. `NumberFormat` parses
//! those format strings and reproduces the C output for `f64` values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default precision for `%g` and `%e`/`%f` without an explicit precision.
const DEFAULT_PRECISION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Conversion {
    General,
    Exponent,
    Fixed,
}

/// A parsed `%[.precision](g|e|f)` format. The uppercase conversions
/// `G`, `E` and `F` print `E` exponents and `NAN`/`INF`.
///
/// # Examples
///
/// ```
/// use simverify::NumberFormat;
///
/// let fmt = NumberFormat::parse("%g").unwrap();
/// assert_eq!(fmt.format(0.0001), "0.0001");
/// assert_eq!(fmt.format(1234567.0), "1.23457e+06");
/// assert_eq!(fmt.format(2.5), "2.5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NumberFormat {
    conversion: Conversion,
    precision: usize,
    uppercase: bool,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            conversion: Conversion::General,
            precision: DEFAULT_PRECISION,
            uppercase: false,
        }
    }
}

impl NumberFormat {
    /// Parses a format string such as `%g`, `%.10g`, `%.3e` or `%.4f`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidNumberFormat` for anything else.
    pub fn parse(format: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidNumberFormat {
            format: format.to_string(),
            reason: reason.to_string(),
        };

        let body = format.strip_prefix('%').ok_or_else(|| invalid("must start with '%'"))?;
        let conv_char = body.chars().last().ok_or_else(|| invalid("missing conversion"))?;
        let conversion = match conv_char {
            'g' | 'G' => Conversion::General,
            'e' | 'E' => Conversion::Exponent,
            'f' | 'F' => Conversion::Fixed,
            _ => return Err(invalid("conversion must be one of g, e, f")),
        };
        let spec = &body[..body.len() - conv_char.len_utf8()];
        let precision = if spec.is_empty() {
            DEFAULT_PRECISION
        } else {
            let digits = spec.strip_prefix('.').ok_or_else(|| invalid("expected '.precision'"))?;
            digits.parse::<usize>().map_err(|_| invalid("precision is not an integer"))?
        };
        if precision > 17 && conversion != Conversion::Fixed {
            return Err(invalid("precision above 17 significant digits"));
        }
        Ok(Self {
            conversion,
            precision,
            uppercase: conv_char.is_ascii_uppercase(),
        })
    }

    /// Returns the precision (significant digits for `%g`).
    #[must_use]
    pub const fn precision(&self) -> usize {
        self.precision
    }

    /// Formats a value the way C `printf` would.
    #[must_use]
    pub fn format(&self, value: f64) -> String {
        let s = self.format_lower(value);
        if self.uppercase {
            s.to_ascii_uppercase()
        } else {
            s
        }
    }

    fn format_lower(&self, value: f64) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
        }
        match self.conversion {
            Conversion::Fixed => format!("{value:.prec$}", prec = self.precision),
            Conversion::Exponent => {
                let s = format!("{value:.prec$e}", prec = self.precision);
                let (mantissa, exp) = split_exponent(&s);
                c_exponent(mantissa, exp)
            }
            Conversion::General => self.format_general(value),
        }
    }

    /// Rounds a value to what this format would print and parse back.
    #[must_use]
    pub fn round(&self, value: f64) -> f64 {
        self.format(value).parse::<f64>().unwrap_or(value)
    }

    fn format_general(&self, value: f64) -> String {
        let p = self.precision.max(1);
        if value == 0.0 {
            return if value.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
        }
        let s = format!("{value:.prec$e}", prec = p - 1);
        let (mantissa, exp) = split_exponent(&s);
        let p_i = i32::try_from(p).unwrap_or(i32::MAX);
        if exp < -4 || exp >= p_i {
            c_exponent(trim_fraction(mantissa), exp)
        } else {
            let decimals = usize::try_from(p_i - 1 - exp).unwrap_or(0);
            trim_fraction(&format!("{value:.decimals$}")).to_string()
        }
    }
}

fn split_exponent(s: &str) -> (&str, i32) {
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse::<i32>().unwrap_or(0)),
        None => (s, 0),
    }
}

fn c_exponent(mantissa: &str, exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl fmt::Display for NumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conv = match (self.conversion, self.uppercase) {
            (Conversion::General, false) => 'g',
            (Conversion::General, true) => 'G',
            (Conversion::Exponent, false) => 'e',
            (Conversion::Exponent, true) => 'E',
            (Conversion::Fixed, false) => 'f',
            (Conversion::Fixed, true) => 'F',
        };
        if self.conversion == Conversion::General && self.precision == DEFAULT_PRECISION {
            write!(f, "%{conv}")
        } else {
            write!(f, "%.{}{conv}", self.precision)
        }
    }
}

impl TryFrom<String> for NumberFormat {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NumberFormat> for String {
    fn from(value: NumberFormat) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_matches_c_printf() {
        let g = NumberFormat::default();
        assert_eq!(g.format(0.0), "0");
        assert_eq!(g.format(1.0), "1");
        assert_eq!(g.format(-9.8), "-9.8");
        assert_eq!(g.format(100000.0), "100000");
        assert_eq!(g.format(1000000.0), "1e+06");
        assert_eq!(g.format(0.00001234), "1.234e-05");
        assert_eq!(g.format(3.14159265), "3.14159");
    }

    #[test]
    fn explicit_precision() {
        let g10 = NumberFormat::parse("%.10g").unwrap();
        assert_eq!(g10.format(std::f64::consts::PI), "3.141592654");
        assert_eq!(g10.format(0.1), "0.1");
        assert_eq!(NumberFormat::parse("%.3e").unwrap().format(1234.56), "1.235e+03");
        assert_eq!(NumberFormat::parse("%.2f").unwrap().format(2.0), "2.00");
    }

    #[test]
    fn round_loses_low_order_digits() {
        let g10 = NumberFormat::parse("%.10g").unwrap();
        let v = 1.0 / 3.0;
        let r = g10.round(v);
        assert!((r - 0.333_333_333_3).abs() < 1e-15);
        assert_ne!(r.to_bits(), v.to_bits());
        assert_eq!(g10.round(0.25).to_bits(), 0.25f64.to_bits());
    }

    #[test]
    fn uppercase_conversions_keep_their_case() {
        let g = NumberFormat::parse("%G").unwrap();
        assert_eq!(g.format(1234567.0), "1.23457E+06");
        assert_eq!(g.format(2.5), "2.5");
        assert_eq!(g.format(f64::INFINITY), "INF");
        assert_eq!(NumberFormat::parse("%.3E").unwrap().format(1234.56), "1.235E+03");
        assert_eq!(NumberFormat::parse("%.1F").unwrap().format(f64::NAN), "NAN");
        assert_ne!(g, NumberFormat::default());
    }

    #[test]
    fn non_finite_values() {
        let g = NumberFormat::default();
        assert_eq!(g.format(f64::NAN), "nan");
        assert_eq!(g.format(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn parse_rejects_malformed_formats() {
        assert!(NumberFormat::parse("g").is_err());
        assert!(NumberFormat::parse("%x").is_err());
        assert!(NumberFormat::parse("%.ag").is_err());
        assert!(NumberFormat::parse("%10g").is_err());
        assert!(NumberFormat::parse("%.20g").is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for s in ["%g", "%.10g", "%.3e", "%.4f", "%G", "%.3E", "%.2F"] {
            assert_eq!(NumberFormat::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn serde_uses_format_string() {
        let fmt = NumberFormat::parse("%.10g").unwrap();
        let json = serde_json::to_string(&fmt).unwrap();
        assert_eq!(json, "\"%.10g\"");
        let back: NumberFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fmt);
    }
}
