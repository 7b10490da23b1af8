use crate::external::price_provider::{keep_latest, ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::time::Duration;

/// History from the yfinance-backed market data service
/// (`GET {base}/stock/{ticker}/history`).
pub struct BackendHistoryProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BackendHistoryProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PriceProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    status: String,
    #[serde(default)]
    data: Vec<HistoryBar>,
    message: Option<String>,
}

// Daily bars carry "Date", intraday bars "Datetime"
#[derive(Debug, Deserialize)]
struct HistoryBar {
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Datetime")]
    datetime: Option<String>,
    #[serde(rename = "Close")]
    close: Option<f64>,
}

/// Smallest yfinance period covering `days` trading days.
pub fn period_for_days(days: u32) -> &'static str {
    match days {
        0..=252 => "1y",
        253..=504 => "2y",
        505..=1260 => "5y",
        _ => "max",
    }
}

/// Accepts ISO dates (`2024-03-04`, `2024-03-04T00:00:00-05:00`) and the
/// RFC 2822 timestamps Flask emits for pandas datetimes.
pub fn parse_bar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    DateTime::parse_from_rfc2822(raw).ok().map(|dt| dt.date_naive())
}

fn parse_history_response(
    ticker: &str,
    body: &str,
    days: u32,
) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
    let body: HistoryResponse =
        serde_json::from_str(body).map_err(|e| PriceProviderError::Parse(e.to_string()))?;

    if body.status != "success" {
        tracing::debug!(
            "History service returned status {} for {}: {}",
            body.status,
            ticker,
            body.message.unwrap_or_default()
        );
        return Err(PriceProviderError::NotFound(ticker.to_string()));
    }

    let mut out = Vec::with_capacity(body.data.len());
    for bar in body.data {
        let Some(close) = bar.close.filter(|c| c.is_finite() && *c > 0.0) else {
            continue;
        };
        let raw_date = bar
            .date
            .or(bar.datetime)
            .ok_or_else(|| PriceProviderError::Parse("bar without Date".into()))?;
        let date = parse_bar_date(&raw_date)
            .ok_or_else(|| PriceProviderError::Parse(format!("unrecognized date {:?}", raw_date)))?;

        out.push(ExternalPricePoint { date, close });
    }

    if out.is_empty() {
        return Err(PriceProviderError::NotFound(ticker.to_string()));
    }

    Ok(keep_latest(out, days))
}

#[async_trait]
impl PriceProvider for BackendHistoryProvider {
    fn name(&self) -> &str {
        "backend"
    }

    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let url = history_url(&self.base_url, ticker)?;

        let resp = self
            .client
            .get(url)
            .query(&[("period", period_for_days(days)), ("interval", "1d")])
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => {
                return Err(PriceProviderError::NotFound(ticker.to_string()))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(PriceProviderError::RateLimited),
            status if !status.is_success() => {
                return Err(PriceProviderError::BadResponse(format!(
                    "history service returned HTTP {}",
                    status
                )))
            }
            _ => {}
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        parse_history_response(ticker, &body, days)
    }
}

/// `{base}/stock/{ticker}/history` with the ticker encoded as one path segment.
fn history_url(base_url: &str, ticker: &str) -> Result<reqwest::Url, PriceProviderError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| PriceProviderError::BadResponse(format!("invalid history service URL: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| PriceProviderError::BadResponse(format!("history service URL {} cannot take a path", base_url)))?
        .pop_if_empty()
        .extend(["stock", ticker, "history"]);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_selection() {
        assert_eq!(period_for_days(30), "1y");
        assert_eq!(period_for_days(252), "1y");
        assert_eq!(period_for_days(504), "2y");
        assert_eq!(period_for_days(1000), "5y");
        assert_eq!(period_for_days(5000), "max");
    }

    #[test]
    fn test_history_url_encodes_ticker() {
        let url = history_url("http://localhost:8000", "TCS.NS").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/stock/TCS.NS/history");

        let url = history_url("http://localhost:8000/api", "BRK/B").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/stock/BRK%2FB/history");

        let url = history_url("http://localhost:8000", "A?B#C").unwrap();
        assert_eq!(url.path(), "/stock/A%3FB%23C/history");
        assert!(url.query().is_none());

        assert!(history_url("not a url", "AAPL").is_err());
    }

    #[test]
    fn test_parse_bar_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 4);
        assert_eq!(parse_bar_date("2024-03-04"), expected);
        assert_eq!(parse_bar_date("2024-03-04T00:00:00-05:00"), expected);
        assert_eq!(parse_bar_date("Mon, 04 Mar 2024 00:00:00 GMT"), expected);
        assert_eq!(parse_bar_date("yesterday"), None);
    }

    #[test]
    fn test_parses_success_payload_and_skips_null_closes() {
        let body = r#"{
            "status": "success",
            "data": [
                {"Date": "Fri, 01 Mar 2024 00:00:00 GMT", "Open": 1.0, "Close": 100.5, "Volume": 10},
                {"Date": "Mon, 04 Mar 2024 00:00:00 GMT", "Open": 1.0, "Close": null, "Volume": 10},
                {"Date": "Tue, 05 Mar 2024 00:00:00 GMT", "Open": 1.0, "Close": 101.25, "Volume": 10}
            ]
        }"#;
        let points = parse_history_response("TCS.NS", body, 10).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, 101.25);
        assert_eq!(points[1].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_error_status_is_not_found() {
        let body = r#"{"status": "error", "message": "No data found"}"#;
        assert!(matches!(
            parse_history_response("ZZZZ", body, 10),
            Err(PriceProviderError::NotFound(_))
        ));
    }
}
