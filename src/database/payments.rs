//! Applies payment provider notifications to orders.
//!
//! Delivery is at-least-once. The `(tenant_id, transaction_id)` key of
//! `payment_transactions` is what makes replays harmless: the record is written
//! first, under the order row lock, and a notification that finds it already
//! present changes nothing.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use serde::Serialize;
use tracing::{info, warn};

use crate::database::models::{NewPaymentTransaction, Order, OrderStatus};
use crate::database::orders::{self, Transition};
use crate::database::{self, reservations};
use crate::errors::{EngineError, RejectReason};
use crate::webhook::{self, PaymentNotification, PaymentOutcome};

/// Downstream event emitted once per successful `PENDING_PAYMENT -> PAID`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPaid {
    pub tenant_id: String,
    pub order_id: i64,
    pub order_reference: String,
    pub transaction_id: String,
    pub total_amount: BigDecimal,
    pub paid_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationOutcome {
    /// The transaction id was seen before.
    Duplicate,
    Paid(OrderPaid),
    Failed,
    /// Stored without touching the order.
    Recorded,
    FlaggedForReview(String),
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Duplicate => "duplicate",
            NotificationOutcome::Paid(_) => "paid",
            NotificationOutcome::Failed => "failed",
            NotificationOutcome::Recorded => "recorded",
            NotificationOutcome::FlaggedForReview(_) => "review",
        }
    }
}

pub fn check_amount(expected: &BigDecimal, received: &BigDecimal) -> Result<(), EngineError> {
    if expected != received {
        return Err(EngineError::AmountMismatch {
            expected: expected.clone(),
            received: received.clone(),
        });
    }
    Ok(())
}

fn webhook_secret_for(conn: &mut PgConnection, req_tenant_id: &str) -> Result<String, EngineError> {
    use crate::schema::tenant_settings::dsl::*;
    tenant_settings
        .filter(tenant_id.eq(req_tenant_id))
        .select(webhook_secret)
        .first::<String>(conn)
        .optional()?
        .ok_or_else(|| EngineError::Rejected(RejectReason::UnknownTenant(req_tenant_id.to_string())))
}

fn transaction_exists(conn: &mut PgConnection, req_tenant_id: &str, req_transaction_id: &str) -> Result<bool, EngineError> {
    use crate::schema::payment_transactions::dsl::*;
    let found = payment_transactions
        .filter(tenant_id.eq(req_tenant_id))
        .filter(transaction_id.eq(req_transaction_id))
        .select(order_id)
        .first::<i64>(conn)
        .optional()?;
    Ok(found.is_some())
}

// false when another delivery of the same transaction got there first
fn record_transaction(
    conn: &mut PgConnection,
    req_tenant_id: &str,
    order: &Order,
    notification: &PaymentNotification,
    raw_payload: &[u8],
    now: NaiveDateTime,
) -> Result<bool, EngineError> {
    let payload = serde_json::from_slice::<serde_json::Value>(raw_payload)
        .map_err(|e| EngineError::Rejected(RejectReason::MalformedPayload(e.to_string())))?;
    let record = NewPaymentTransaction {
        tenant_id: req_tenant_id.to_string(),
        transaction_id: notification.transaction_id.clone(),
        order_id: order.order_id,
        gross_amount: notification.gross_amount.clone(),
        provider_status: notification.transaction_status.clone(),
        fraud_status: notification.fraud_status.clone(),
        payload,
        received_at: now,
    };
    let inserted = diesel::insert_into(crate::schema::payment_transactions::table)
        .values(&record)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

/// Authenticates and applies one provider notification.
///
/// Every outcome except a rejection means the provider should get a 200.
pub fn handle_notification(
    conn: &mut PgConnection,
    req_tenant_id: &str,
    raw_payload: &[u8],
    signature: &str,
) -> Result<NotificationOutcome, EngineError> {
    let secret = webhook_secret_for(conn, req_tenant_id)?;
    webhook::verify_signature(raw_payload, signature, &secret).map_err(EngineError::Rejected)?;

    let notification = webhook::parse_notification(raw_payload).map_err(EngineError::Rejected)?;
    if transaction_exists(conn, req_tenant_id, &notification.transaction_id)? {
        info!(
            tenant_id = req_tenant_id,
            transaction_id = notification.transaction_id.as_str(),
            "duplicate payment notification"
        );
        return Ok(NotificationOutcome::Duplicate);
    }

    conn.transaction::<_, EngineError, _>(|conn| {
        let order = orders::lock_order_by_reference(conn, req_tenant_id, &notification.order_reference)?
            .ok_or_else(|| EngineError::Rejected(RejectReason::UnknownOrder(notification.order_reference.clone())))?;
        let now = database::now();

        if !record_transaction(conn, req_tenant_id, &order, &notification, raw_payload, now)? {
            info!(
                order_id = order.order_id,
                transaction_id = notification.transaction_id.as_str(),
                "duplicate payment notification"
            );
            return Ok(NotificationOutcome::Duplicate);
        }

        if let Err(mismatch) = check_amount(&order.total_amount, &notification.gross_amount) {
            let reason = mismatch.to_string();
            orders::flag_for_review(conn, order.order_id, &reason, now)?;
            return Ok(NotificationOutcome::FlaggedForReview(reason));
        }

        let outcome = webhook::map_status(&notification.transaction_status, notification.fraud_status.as_deref());
        info!(
            order_id = order.order_id,
            transaction_id = notification.transaction_id.as_str(),
            provider_status = notification.transaction_status.as_str(),
            ?outcome,
            "payment notification accepted"
        );
        match outcome {
            PaymentOutcome::Paid => apply_paid(conn, &order, &notification, now),
            PaymentOutcome::Failed => apply_failed(conn, &order, now),
            PaymentOutcome::Pending => Ok(NotificationOutcome::Recorded),
            PaymentOutcome::Review(reason) => {
                orders::flag_for_review(conn, order.order_id, reason, now)?;
                Ok(NotificationOutcome::FlaggedForReview(reason.to_string()))
            }
            PaymentOutcome::Unknown => {
                warn!(
                    order_id = order.order_id,
                    provider_status = notification.transaction_status.as_str(),
                    "unrecognised provider status, recorded only"
                );
                Ok(NotificationOutcome::Recorded)
            }
        }
    })
}

fn apply_paid(
    conn: &mut PgConnection,
    order: &Order,
    notification: &PaymentNotification,
    now: NaiveDateTime,
) -> Result<NotificationOutcome, EngineError> {
    // savepoint: a consume failure must undo the PAID write
    let res = conn.transaction::<_, EngineError, _>(|conn| {
        let res = orders::transition(conn, order.order_id, OrderStatus::PendingPayment, OrderStatus::Paid, now)?;
        if res.is_applied() {
            reservations::consume_reservation(conn, order.order_id)?;
        }
        Ok(res)
    });

    match res {
        Ok(Transition::Applied) => Ok(NotificationOutcome::Paid(OrderPaid {
            tenant_id: order.tenant_id.clone(),
            order_id: order.order_id,
            order_reference: order.order_reference.clone(),
            transaction_id: notification.transaction_id.clone(),
            total_amount: order.total_amount.clone(),
            paid_at: now,
        })),
        Ok(Transition::Stale { current }) => {
            let reason = match current {
                OrderStatus::Paid | OrderStatus::Completed => {
                    format!("second settlement {} for an order already paid", notification.transaction_id)
                }
                _ => format!("payment {} received for {current} order", notification.transaction_id),
            };
            orders::flag_for_review(conn, order.order_id, &reason, now)?;
            Ok(NotificationOutcome::FlaggedForReview(reason))
        }
        Err(EngineError::ReservationExpired(_)) => {
            // holds were already gone; the order cannot be fulfilled from stock
            orders::transition(conn, order.order_id, OrderStatus::PendingPayment, OrderStatus::Expired, now)?;
            reservations::release_reservation(conn, order.order_id)?;
            let reason = format!(
                "payment {} received after the reservation was released",
                notification.transaction_id
            );
            orders::flag_for_review(conn, order.order_id, &reason, now)?;
            Ok(NotificationOutcome::FlaggedForReview(reason))
        }
        Err(e) => Err(e),
    }
}

fn apply_failed(conn: &mut PgConnection, order: &Order, now: NaiveDateTime) -> Result<NotificationOutcome, EngineError> {
    match orders::transition(conn, order.order_id, OrderStatus::PendingPayment, OrderStatus::Failed, now)? {
        Transition::Applied => {
            reservations::release_reservation(conn, order.order_id)?;
            Ok(NotificationOutcome::Failed)
        }
        Transition::Stale { .. } => Ok(NotificationOutcome::Recorded),
    }
}
