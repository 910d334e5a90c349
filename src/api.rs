//! Backend API client for the tracking endpoint.
//!
//! One authenticated GET serves the initial load, every poll cycle, the
//! countdown's final refetch, and manual refresh. The request is idempotent
//! and safely retryable; the response carries the current order and, if
//! present, the most recent payment verification attempt.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::TrackError;
use crate::model::{OrderSnapshot, PaymentState};

/// Default timeout for tracking requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Fetch abstraction
// ---------------------------------------------------------------------------

/// One-shot order fetch. The poll loop and the session are generic over
/// this so tests can drive them with a scripted fetcher and a paused clock.
pub trait FetchOrder: Send + Sync + 'static {
    fn fetch_order(
        &self,
        order_no: &str,
        token: &str,
    ) -> impl Future<Output = Result<OrderSnapshot, TrackError>> + Send;
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Response body of `GET /api/track/orders/{order_no}`.
#[derive(Debug, Deserialize)]
struct TrackResponse {
    order: OrderSnapshot,
    /// Most recent payment verification attempt, when one exists. Folded
    /// into the snapshot's payment state so consumers see one view.
    payment: Option<PaymentAttempt>,
}

#[derive(Debug, Deserialize)]
struct PaymentAttempt {
    status: PaymentState,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly transport error.
fn friendly_error(url: &str, err: &reqwest::Error) -> TrackError {
    if err.is_connect() {
        return TrackError::transport(format!("Cannot reach order server at {url}"));
    }
    if err.is_timeout() {
        return TrackError::transport(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return TrackError::transport(format!("Invalid order server URL: {url}"));
    }
    TrackError::transport(format!("Network error communicating with {url}: {err}"))
}

/// Map an HTTP status to the error taxonomy. Only 401/403/404 are terminal;
/// everything else is transient and retried by the caller's schedule.
fn status_error(status: StatusCode, order_no: &str) -> TrackError {
    match status.as_u16() {
        401 | 403 => TrackError::Unauthorized,
        404 => TrackError::NotFound {
            order_no: order_no.to_string(),
        },
        s if s >= 500 => TrackError::transport(format!("Order server error (HTTP {s})")),
        s => TrackError::transport(format!("Unexpected response from order server (HTTP {s})")),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the public tracking API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client for a normalised base URL (see `config`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, TrackError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| TrackError::transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl FetchOrder for ApiClient {
    async fn fetch_order(&self, order_no: &str, token: &str) -> Result<OrderSnapshot, TrackError> {
        let url = format!("{}/api/track/orders/{order_no}", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, order_no));
        }

        let body: TrackResponse = resp
            .json()
            .await
            .map_err(|e| TrackError::malformed(format!("tracking response: {e}")))?;

        let mut snapshot = body.order;
        if let Some(attempt) = body.payment {
            snapshot.payment.status = attempt.status;
        }

        debug!(
            order_no = %snapshot.order_no,
            status = snapshot.status.as_str(),
            "order fetched"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_classification() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "ORD-1"),
            TrackError::Unauthorized
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "ORD-1"),
            TrackError::Unauthorized
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "ORD-1"),
            TrackError::NotFound { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "ORD-1"),
            TrackError::Transport { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "ORD-1"),
            TrackError::Transport { .. }
        ));
    }

    #[test]
    fn test_track_response_folds_payment_attempt_into_snapshot() {
        let body = serde_json::json!({
            "order": {
                "order_no": "ORD-1",
                "status": "pending",
                "fulfillment_type": "delivery",
                "payment": { "method": "qris", "status": "pending" },
                "items": [],
                "completed_at": null,
                "updated_at": "2026-08-30T04:10:00Z"
            },
            "payment": { "status": "verified" }
        });
        let parsed: TrackResponse = serde_json::from_value(body).expect("parses");
        let mut snapshot = parsed.order;
        if let Some(attempt) = parsed.payment {
            snapshot.payment.status = attempt.status;
        }
        assert_eq!(snapshot.payment.status, PaymentState::Verified);
    }
}
