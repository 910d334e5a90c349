//! Session configuration and backend URL normalization.
//!
//! Tracking links arrive from QR codes and chat messages, so the base URL
//! is normalised defensively: scheme inference (plain http only for
//! localhost), trailing slashes stripped, a trailing `/api` segment
//! stripped. The push-channel address is derived from the same base.

use std::time::Duration;

/// Grace period before falling back to polling when the push channel has
/// not reported `connected`.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Post-completion viewing window.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Configuration for one tracking session: one `(order_no, token)` pair
/// against one backend.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub order_no: String,
    pub token: String,
    pub grace_period: Duration,
    pub expiry_window: Duration,
}

impl SessionConfig {
    pub fn new(
        base_url: impl Into<String>,
        order_no: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            order_no: order_no.into(),
            token: token.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            expiry_window: DEFAULT_EXPIRY_WINDOW,
        }
    }

    /// WebSocket address for the push channel, derived from the base URL.
    pub fn push_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("wss://{}", self.base_url)
        };
        format!(
            "{ws_base}/ws/orders/{}?token={}",
            self.order_no, self.token
        )
    }
}

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_https_scheme() {
        assert_eq!(
            normalize_base_url("order.thesmall.app"),
            "https://order.thesmall.app"
        );
    }

    #[test]
    fn test_normalize_uses_http_for_localhost() {
        assert_eq!(normalize_base_url("localhost:3000"), "http://localhost:3000");
        assert_eq!(normalize_base_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_normalize_strips_api_suffix_and_slashes() {
        assert_eq!(
            normalize_base_url("https://order.thesmall.app/api/"),
            "https://order.thesmall.app"
        );
        assert_eq!(
            normalize_base_url("https://order.thesmall.app///"),
            "https://order.thesmall.app"
        );
    }

    #[test]
    fn test_push_url_derives_scheme_from_base() {
        let cfg = SessionConfig::new("https://order.thesmall.app", "ORD-1", "tok123");
        assert_eq!(
            cfg.push_url(),
            "wss://order.thesmall.app/ws/orders/ORD-1?token=tok123"
        );

        let local = SessionConfig::new("localhost:3000", "ORD-1", "tok123");
        assert!(local.push_url().starts_with("ws://localhost:3000/"));
    }
}
