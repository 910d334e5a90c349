//! Status normalization: backend vocabulary to a user-facing timeline.
//!
//! Four timeline variants exist: delivery, dine-in, pickup, and a universal
//! canceled variant that preempts the others whenever the status is
//! canceled. The payment method changes only the wording of the first two
//! steps (QRIS frames them as payment verification, cash as kitchen
//! confirmation), never the step ordering or count.
//!
//! Pure lookup tables, no I/O, no state.

use crate::model::{FulfillmentType, OrderStatus, PaymentMethod};

/// One step of the user-facing progress timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineStep {
    pub status: OrderStatus,
    pub label: &'static str,
    pub description: &'static str,
}

const fn step(
    status: OrderStatus,
    label: &'static str,
    description: &'static str,
) -> TimelineStep {
    TimelineStep {
        status,
        label,
        description,
    }
}

// ---------------------------------------------------------------------------
// Label tables
// ---------------------------------------------------------------------------

/// Opening steps, QRIS wording: the order only moves once payment verifies.
const HEAD_QRIS: [TimelineStep; 2] = [
    step(
        OrderStatus::Pending,
        "Menunggu Pembayaran",
        "Pembayaran QRIS sedang menunggu verifikasi",
    ),
    step(
        OrderStatus::Confirmed,
        "Pembayaran Terverifikasi",
        "Pembayaran diterima, pesanan diteruskan ke dapur",
    ),
];

/// Opening steps, cash wording: the kitchen confirms the order directly.
const HEAD_CASH: [TimelineStep; 2] = [
    step(
        OrderStatus::Pending,
        "Pesanan Diterima",
        "Pesanan menunggu konfirmasi dapur",
    ),
    step(
        OrderStatus::Confirmed,
        "Pesanan Dikonfirmasi",
        "Dapur telah mengonfirmasi pesanan Anda",
    ),
];

const MIDDLE: [TimelineStep; 2] = [
    step(
        OrderStatus::Preparing,
        "Sedang Disiapkan",
        "Dapur sedang menyiapkan pesanan Anda",
    ),
    step(
        OrderStatus::Ready,
        "Pesanan Siap",
        "Pesanan telah selesai disiapkan",
    ),
];

const TAIL_DELIVERY: [TimelineStep; 3] = [
    step(
        OrderStatus::Delivering,
        "Sedang Diantar",
        "Kurir sedang menuju alamat Anda",
    ),
    step(
        OrderStatus::Delivered,
        "Pesanan Tiba",
        "Pesanan telah sampai di alamat tujuan",
    ),
    step(OrderStatus::Completed, "Selesai", "Pesanan selesai"),
];

const TAIL_PICKUP: [TimelineStep; 3] = [
    step(
        OrderStatus::WaitingPickup,
        "Menunggu Diambil",
        "Pesanan siap diambil di konter",
    ),
    step(
        OrderStatus::PickedUp,
        "Sudah Diambil",
        "Pesanan telah diambil",
    ),
    step(OrderStatus::Completed, "Selesai", "Pesanan selesai"),
];

/// Universal canceled variant, independent of fulfillment type.
const CANCELED: [TimelineStep; 2] = [
    step(
        OrderStatus::Pending,
        "Pesanan Dibuat",
        "Pesanan diterima oleh sistem",
    ),
    step(
        OrderStatus::Canceled,
        "Pesanan Dibatalkan",
        "Pesanan tidak dapat diproses",
    ),
];

// ---------------------------------------------------------------------------
// Timeline construction
// ---------------------------------------------------------------------------

/// Build the ordered timeline for an order.
///
/// The canceled variant preempts the fulfillment-type variants whenever the
/// current status is canceled, regardless of where the order stopped.
pub fn timeline_for(
    fulfillment: FulfillmentType,
    method: PaymentMethod,
    status: OrderStatus,
) -> Vec<TimelineStep> {
    if status == OrderStatus::Canceled {
        return CANCELED.to_vec();
    }

    let head: &[TimelineStep] = match method {
        PaymentMethod::Qris => &HEAD_QRIS,
        PaymentMethod::Cash | PaymentMethod::Other => &HEAD_CASH,
    };
    let tail: &[TimelineStep] = match fulfillment {
        FulfillmentType::Delivery => &TAIL_DELIVERY,
        FulfillmentType::DineIn | FulfillmentType::Pickup => &TAIL_PICKUP,
    };

    let mut steps = Vec::with_capacity(head.len() + MIDDLE.len() + tail.len());
    steps.extend_from_slice(head);
    steps.extend_from_slice(&MIDDLE);
    steps.extend_from_slice(tail);
    steps
}

/// Index of the step matching the current status.
///
/// Unknown or unexpected statuses fall back to index 0 so the UI always
/// has a valid position.
pub fn current_step_index(status: OrderStatus, timeline: &[TimelineStep]) -> usize {
    timeline
        .iter()
        .position(|s| s.status == status)
        .unwrap_or(0)
}

/// Fill fraction of the desktop progress bar: the first step sits at 0.
pub fn progress_fraction(index: usize, len: usize) -> f64 {
    if len <= 1 {
        return 0.0;
    }
    index as f64 / (len - 1) as f64
}

/// Percentage shown on the mobile layout: the first step already counts.
/// Intentionally differs from `progress_fraction`.
pub fn progress_percent(index: usize, len: usize) -> f64 {
    if len == 0 {
        return 0.0;
    }
    (index + 1) as f64 / len as f64 * 100.0
}
