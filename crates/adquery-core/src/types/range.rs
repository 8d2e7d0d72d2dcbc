//! Range retrieval specifiers
//!
//! Active Directory truncates large multi-valued attributes and returns them
//! as `member;range=0-1499`. The client asks for the next slice with
//! `member;range=1500-*` until the server answers with a `*` upper bound.

use std::fmt;

/// A range-qualified attribute key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedAttribute {
    /// Attribute name without the range option
    pub name: String,
    /// Index of the first value in this slice
    pub low: u32,
    /// Index of the last value, `None` when the server sent `*`
    pub high: Option<u32>,
}

const RANGE_OPTION: &str = ";range=";

impl RangedAttribute {
    /// Parse `name;range=low-high`. Returns `None` for plain attribute names.
    pub fn parse(key: &str) -> Option<Self> {
        let lower = key.to_ascii_lowercase();
        let idx = lower.find(RANGE_OPTION)?;
        let name = &key[..idx];
        let spec = &key[idx + RANGE_OPTION.len()..];
        let (low, high) = spec.split_once('-')?;

        if name.is_empty() {
            return None;
        }

        let low = low.parse().ok()?;
        let high = match high {
            "*" => None,
            h => Some(h.parse().ok()?),
        };

        Some(Self {
            name: name.to_string(),
            low,
            high,
        })
    }

    /// Whether the key itself carries a range option
    pub fn is_ranged(key: &str) -> bool {
        Self::parse(key).is_some()
    }

    /// The server signalled that this slice is the last one
    pub fn is_complete(&self) -> bool {
        self.high.is_none()
    }

    /// Specifier for the next slice, or `None` when complete
    pub fn next(&self) -> Option<RangedAttribute> {
        let low = self.high?.checked_add(1)?;
        Some(RangedAttribute {
            name: self.name.clone(),
            low,
            high: None,
        })
    }
}

impl fmt::Display for RangedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.high {
            Some(high) => write!(f, "{}{}{}-{}", self.name, RANGE_OPTION, self.low, high),
            None => write!(f, "{}{}{}-*", self.name, RANGE_OPTION, self.low),
        }
    }
}
