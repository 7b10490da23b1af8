use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// A daily close for a ticker, as served to the chart views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Chronological daily closes for one symbol, aligned to a shared trading calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
    pub symbol: String,
    pub closes: Vec<f64>,
}

impl AssetSeries {
    pub fn new(symbol: impl Into<String>, closes: Vec<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            closes,
        }
    }

    /// A series can be analyzed when it has at least two closes and every
    /// close is finite and strictly positive.
    pub fn is_usable(&self) -> bool {
        self.closes.len() >= 2 && self.closes.iter().all(|c| c.is_finite() && *c > 0.0)
    }
}
