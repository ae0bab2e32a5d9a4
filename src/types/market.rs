use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange symbol such as `BTCUSDT`, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.len() > 20 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Symbol(s.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-case form used in WebSocket stream names.
    pub fn stream_name(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Symbol("BTCUSDT".to_string())
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::parse(s).ok_or_else(|| format!("invalid symbol: {:?}", s))
    }
}

impl TryFrom<String> for Symbol {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1, // 1 minute
    H1, // 1 hour
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::H1 => "1h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::M1),
            "1h" => Some(Interval::H1),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            Interval::M1 => 1,
            Interval::H1 => 60,
        }
    }

    pub fn to_milliseconds(&self) -> u64 {
        self.to_minutes() * 60 * 1000
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse_normalizes_case() {
        let symbol = Symbol::parse(" ethusdt ").unwrap();
        assert_eq!(symbol.as_str(), "ETHUSDT");
        assert_eq!(symbol.stream_name(), "ethusdt");
        assert_eq!(symbol.to_string(), "ETHUSDT");
    }

    #[test]
    fn test_symbol_rejects_garbage() {
        assert!(Symbol::parse("").is_none());
        assert!(Symbol::parse("BTC/USDT").is_none());
        assert!("btc usdt".parse::<Symbol>().is_err());
    }

    #[test]
    fn test_symbol_serde_roundtrip_through_string() {
        let symbol: Symbol = serde_json::from_str("\"solusdt\"").unwrap();
        assert_eq!(symbol.as_str(), "SOLUSDT");
        assert!(serde_json::from_str::<Symbol>("\"SOL-USDT\"").is_err());
    }

    #[test]
    fn test_interval_strings() {
        assert_eq!(Interval::parse("1m"), Some(Interval::M1));
        assert_eq!(Interval::parse("1h"), Some(Interval::H1));
        assert_eq!(Interval::parse("4h"), None);
        assert_eq!(Interval::H1.to_milliseconds(), 3_600_000);
    }
}
