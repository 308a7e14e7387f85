use std::cmp::Ordering;
use std::fmt;

/// An RGB triple as carried by color-typed inputs (`#rrggbb`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub fn parse(encoded: &str) -> Option<Self> {
        let hex = encoded.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self {
            red: channel(0..2)?,
            green: channel(2..4)?,
            blue: channel(4..6)?,
        })
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

/// Dynamically typed value held by variables and produced by reporters.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Int(i64),
    Text(String),
    Bool(bool),
    Color(Rgb),
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

impl Value {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Initial values in `project.json` are JSON scalars.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Number(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Null => Self::empty(),
            other => Self::Text(other.to_string()),
        }
    }

    /// Strict numeric coercion: text must parse as a float in full.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
            Self::Color(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Int(i) => *i != 0,
            Self::Text(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
            Self::Color(_) => true,
        }
    }

    /// Whole-number values; text counts only when it is written without a decimal point.
    pub fn is_integral(&self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Number(n) => n.is_finite() && n.fract() == 0.0,
            Self::Text(s) => {
                !s.contains('.') && s.trim().parse::<f64>().is_ok_and(|n| n.fract() == 0.0)
            }
            Self::Bool(_) | Self::Color(_) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.is_nan() => f.write_str("NaN"),
            Self::Number(n) if n.is_infinite() => {
                f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Color(c) => write!(f, "{c}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Signed comparison magnitude: numeric difference when both sides coerce to
/// numbers, otherwise -1/0/1 from case-insensitive text ordering.
pub fn compare(a: &Value, b: &Value) -> f64 {
    if let (Some(x), Some(y)) = (a.to_number(), b.to_number()) {
        return x - y;
    }
    let left = a.to_string().to_lowercase();
    let right = b.to_string().to_lowercase();
    match left.cmp(&right) {
        Ordering::Less => -1.0,
        Ordering::Equal => 0.0,
        Ordering::Greater => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parses_seven_character_form() {
        let c = Rgb::parse("#ff8001").expect("valid color");
        assert_eq!((c.red, c.green, c.blue), (0xff, 0x80, 0x01));
        assert_eq!(c.to_string(), "#ff8001");
        assert!(Rgb::parse("ff8001").is_none());
        assert!(Rgb::parse("#ff80").is_none());
        assert!(Rgb::parse("#gg0000").is_none());
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        assert!(compare(&Value::text("10"), &Value::text("9")) > 0.0);
        assert!(compare(&Value::Int(2), &Value::Number(2.0)) == 0.0);
    }

    #[test]
    fn text_falls_back_to_case_insensitive_order() {
        assert!(compare(&Value::text("b"), &Value::text("A")) > 0.0);
        assert!(compare(&Value::text("apple"), &Value::text("APPLE")) == 0.0);
        assert!(compare(&Value::text("10"), &Value::text("ten")) < 0.0);
    }

    #[test]
    fn display_drops_trailing_zero_fraction() {
        assert_eq!(Value::Number(8.0).to_string(), "8");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
    }

    #[test]
    fn truthiness_follows_block_conventions() {
        assert!(!Value::text("").is_truthy());
        assert!(!Value::text("false").is_truthy());
        assert!(!Value::text("0").is_truthy());
        assert!(Value::text("yes").is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(Value::Int(3).is_truthy());
    }

    #[test]
    fn integral_detection() {
        assert!(Value::Int(2).is_integral());
        assert!(Value::Number(2.0).is_integral());
        assert!(!Value::Number(1.5).is_integral());
        assert!(Value::text("7").is_integral());
        assert!(!Value::text("7.0").is_integral());
    }

    #[test]
    fn json_initial_values_keep_their_kind() {
        assert_eq!(Value::from_json(&serde_json::json!(0)), Value::Int(0));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Number(1.5));
        assert_eq!(Value::from_json(&serde_json::json!("hi")), Value::text("hi"));
    }
}
