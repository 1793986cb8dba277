//! Ticker symbols

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, LazyLock};

static TICKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9^][A-Z0-9.\-=^]{0,11}$").expect("ticker pattern is valid")
});

/// An upper-cased stock symbol.
///
/// Cloning is cheap: many fetch tasks hold the same ticker at once and
/// only ever read it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticker(Arc<str>);

impl Ticker {
    /// Parse and normalise a symbol (`" aapl "` becomes `AAPL`).
    pub fn new(symbol: impl AsRef<str>) -> Result<Self> {
        let normalised = symbol.as_ref().trim().to_ascii_uppercase();
        if !TICKER_PATTERN.is_match(&normalised) {
            return Err(Error::InvalidTicker(symbol.as_ref().to_string()));
        }
        Ok(Self(Arc::from(normalised)))
    }

    /// The symbol as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Ticker {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Ticker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl Serialize for Ticker {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ticker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ticker::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a watchlist, dropping duplicates but keeping first-seen order.
pub fn parse_watchlist<I, S>(symbols: I) -> Result<Vec<Ticker>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<Ticker> = Vec::new();
    for symbol in symbols {
        let ticker = Ticker::new(symbol)?;
        if !out.contains(&ticker) {
            out.push(ticker);
        }
    }
    Ok(out)
}
