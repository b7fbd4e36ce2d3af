use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle granularity. Every variant divides a UTC day evenly, which keeps
/// boundary and expected-count arithmetic exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 12] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
    ];

    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_lowercase();
        let timeframe = match normalized.as_str() {
            "1m" | "1min" => Timeframe::M1,
            "3m" | "3min" => Timeframe::M3,
            "5m" | "5min" => Timeframe::M5,
            "15m" | "15min" => Timeframe::M15,
            "30m" | "30min" => Timeframe::M30,
            "1h" | "1hour" | "60m" => Timeframe::H1,
            "2h" | "2hour" => Timeframe::H2,
            "4h" | "4hour" => Timeframe::H4,
            "6h" | "6hour" => Timeframe::H6,
            "8h" | "8hour" => Timeframe::H8,
            "12h" | "12hour" => Timeframe::H12,
            "1d" | "1day" | "24h" => Timeframe::D1,
            _ => return Err(format!("unsupported timeframe: {value}")),
        };
        Ok(timeframe)
    }

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H8 => 480,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
        }
    }

    pub fn step_seconds(self) -> i64 {
        self.minutes() * 60
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Canonical short label, also used as the storage key.
    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn is_intraday(self) -> bool {
        self.minutes() < 1440
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.label().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::Timeframe;

    #[test]
    fn parses_timeframe_aliases() {
        assert_eq!(Timeframe::parse("1m").unwrap(), Timeframe::M1);
        assert_eq!(Timeframe::parse("1hour").unwrap(), Timeframe::H1);
        assert_eq!(Timeframe::parse(" 4H ").unwrap(), Timeframe::H4);
        assert_eq!(Timeframe::parse("1day").unwrap(), Timeframe::D1);
        assert!(Timeframe::parse("1w").is_err());
    }

    #[test]
    fn every_timeframe_divides_a_day() {
        for tf in Timeframe::ALL {
            assert_eq!(1440 % tf.minutes(), 0, "{tf}");
            assert_eq!(Timeframe::parse(tf.label()).unwrap(), tf);
        }
    }
}
