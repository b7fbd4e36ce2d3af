use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchanges with a compiled-in adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Kraken,
    Kucoin,
}

impl Exchange {
    pub const ALL: [Exchange; 2] = [Exchange::Kraken, Exchange::Kucoin];

    /// Case-insensitive lookup; surrounding whitespace is ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "kraken" => Some(Exchange::Kraken),
            "kucoin" => Some(Exchange::Kucoin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Kraken => "kraken",
            Exchange::Kucoin => "kucoin",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| format!("unsupported exchange: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Exchange;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Exchange::parse("KRAKEN"), Some(Exchange::Kraken));
        assert_eq!(Exchange::parse(" KuCoin "), Some(Exchange::Kucoin));
        assert_eq!(Exchange::parse("binance"), None);
        assert!("binance".parse::<Exchange>().is_err());
    }
}
