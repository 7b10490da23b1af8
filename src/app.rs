use axum::Router;
use tower_http::cors::CorsLayer;

use crate::routes::{health, optimize, prices};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/optimize", optimize::router())
        .nest("/api/prices", prices::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{AppConfig, ProviderChoice};
    use crate::external::mock::MockProvider;

    fn test_app() -> Router {
        let config = AppConfig {
            price_provider: ProviderChoice::Mock,
            lookback_days: 120,
            ..AppConfig::default()
        };
        create_app(AppState::new(config, Arc::new(MockProvider::new())))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_optimize(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/optimize")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_optimize_with_mock_data() {
        let (status, body) = send(
            test_app(),
            post_optimize(json!({"tickers": ["tcs.ns", "INFY.NS", "HDFCBANK.NS"], "capital": 100000})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["input"]["valid_tickers_found"].as_array().unwrap().len(), 3);
        assert_eq!(body["input"]["trading_days_analyzed"], 120);
        for key in ["min_risk", "max_sharpe", "hrp", "kelly"] {
            let total: f64 = body["portfolios"][key]["allocation"]
                .as_object()
                .unwrap()
                .values()
                .map(|v| v.as_f64().unwrap())
                .sum();
            assert!((total - 100000.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_cached_response_keeps_request_order() {
        let app = test_app();
        let (status, _) = send(
            app.clone(),
            post_optimize(json!({"tickers": ["AAPL", "MSFT"], "capital": 5000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            app,
            post_optimize(json!({"tickers": ["MSFT", "AAPL"], "capital": 5000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["input"]["valid_tickers_found"], json!(["MSFT", "AAPL"]));
    }

    #[tokio::test]
    async fn test_optimize_rejects_single_ticker() {
        let (status, body) = send(
            test_app(),
            post_optimize(json!({"tickers": ["AAPL", "aapl "], "capital": 1000})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("at least 2"));
    }

    #[tokio::test]
    async fn test_optimize_rejects_bad_capital() {
        let (status, _) = send(
            test_app(),
            post_optimize(json!({"tickers": ["AAPL", "MSFT"], "capital": -5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_price_history_clamps_days() {
        let request = Request::builder()
            .uri("/api/prices/aapl/history?days=1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }
}
