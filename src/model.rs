//! Order snapshot data model.
//!
//! Mirrors the backend's order payload for the public tracking endpoint.
//! Status vocabulary differs by fulfillment type (delivery vs dine-in vs
//! pickup) and the backend occasionally emits spelling variants
//! (`cancelled`, `rejected`); everything funnels into one enum here so the
//! rest of the engine never string-matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Lifecycle status of a tracked order.
///
/// `Unknown` absorbs any vocabulary the backend adds later; deserialization
/// must never fail on a status string, the UI simply shows step zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Delivering,
    Delivered,
    WaitingPickup,
    PickedUp,
    Completed,
    #[serde(alias = "cancelled", alias = "rejected")]
    Canceled,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Statuses after which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Delivered
                | OrderStatus::PickedUp
                | OrderStatus::Canceled
        )
    }

    /// Terminal statuses that open the post-completion viewing window.
    /// Canceled orders are terminal but never get a countdown.
    pub fn is_terminal_success(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Delivered | OrderStatus::PickedUp
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::WaitingPickup => "waiting_pickup",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Fulfillment and payment
// ---------------------------------------------------------------------------

/// How the order reaches the customer. Fixed for the order's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    Delivery,
    DineIn,
    Pickup,
}

/// Payment method attached to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Qris,
    Cash,
    #[serde(other)]
    Other,
}

/// Verification state of the most recent payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Verified,
    Rejected,
}

/// Payment summary carried on the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentState,
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// One line item. Display-only: the engine never mutates items, it just
/// carries whatever the backend sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub unit_modifiers: Vec<String>,
    pub subtotal: f64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The authoritative view of one order at a point in time.
///
/// Snapshots are replaced wholesale on every update (no field-level diffing),
/// so a repeated or out-of-order status from the backend is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_no: String,
    pub status: OrderStatus,
    pub fulfillment_type: FulfillmentType,
    pub payment: PaymentInfo,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    /// Set once, when the order first enters a terminal success status.
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_from(s: &str) -> OrderStatus {
        serde_json::from_value(serde_json::json!(s)).expect("status deserializes")
    }

    #[test]
    fn test_status_spelling_variants_normalize_to_canceled() {
        assert_eq!(status_from("canceled"), OrderStatus::Canceled);
        assert_eq!(status_from("cancelled"), OrderStatus::Canceled);
        assert_eq!(status_from("rejected"), OrderStatus::Canceled);
    }

    #[test]
    fn test_unknown_status_does_not_fail_deserialization() {
        assert_eq!(status_from("refund_requested"), OrderStatus::Unknown);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::Canceled.is_terminal_success());
        assert!(OrderStatus::PickedUp.is_terminal_success());
        assert!(!OrderStatus::Preparing.is_terminal());
        assert!(!OrderStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_snapshot_round_trips_snake_case_fields() {
        let body = serde_json::json!({
            "order_no": "ORD-20260830-00017",
            "status": "waiting_pickup",
            "fulfillment_type": "pickup",
            "payment": { "method": "qris", "status": "verified" },
            "items": [
                { "name": "Es Teh Manis", "quantity": 2, "unit_modifiers": ["less ice"], "subtotal": 10000.0 }
            ],
            "completed_at": null,
            "updated_at": "2026-08-30T04:10:00Z"
        });
        let snap: OrderSnapshot = serde_json::from_value(body).expect("snapshot deserializes");
        assert_eq!(snap.status, OrderStatus::WaitingPickup);
        assert_eq!(snap.payment.method, PaymentMethod::Qris);
        assert_eq!(snap.items.len(), 1);
    }
}
