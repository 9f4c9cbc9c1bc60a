use actix_web::HttpResponse;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::json;

use crate::database::models::{Order, PaymentTransaction, ReservationHold};
use crate::database::orders::Transition;
use crate::database::payments::NotificationOutcome;
use crate::database::queries::{Availability, OrderView};
use crate::database::reservations::CreatedReservation;
use crate::errors::EngineError;

#[derive(Serialize)]
struct CustomerBody<'a> {
    name: &'a str,
    phone: &'a str,
    email: Option<&'a str>,
}

#[derive(Serialize)]
struct HoldBody<'a> {
    reservation_id: i64,
    product_id: i64,
    quantity: i32,
    status: &'a str,
    expires_at: NaiveDateTime,
}

#[derive(Serialize)]
struct PaymentBody<'a> {
    transaction_id: &'a str,
    gross_amount: &'a BigDecimal,
    provider_status: &'a str,
    fraud_status: Option<&'a str>,
    received_at: NaiveDateTime,
}

#[derive(Serialize)]
struct OrderBody<'a> {
    order_id: i64,
    tenant_id: &'a str,
    order_reference: &'a str,
    status: &'a str,
    needs_review: bool,
    review_reason: Option<&'a str>,
    line_items: &'a serde_json::Value,
    subtotal: &'a BigDecimal,
    delivery_fee: &'a BigDecimal,
    total_amount: &'a BigDecimal,
    customer: CustomerBody<'a>,
    created_at: NaiveDateTime,
    expires_at: NaiveDateTime,
    paid_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    holds: Option<Vec<HoldBody<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payments: Option<Vec<PaymentBody<'a>>>,
}

impl<'a> OrderBody<'a> {
    fn summary(order: &'a Order) -> Self {
        OrderBody {
            order_id: order.order_id,
            tenant_id: &order.tenant_id,
            order_reference: &order.order_reference,
            status: &order.status,
            needs_review: order.needs_review,
            review_reason: order.review_reason.as_deref(),
            line_items: &order.line_items,
            subtotal: &order.subtotal,
            delivery_fee: &order.delivery_fee,
            total_amount: &order.total_amount,
            customer: CustomerBody {
                name: &order.customer_name,
                phone: &order.customer_phone,
                email: order.customer_email.as_deref(),
            },
            created_at: order.created_at,
            expires_at: order.expires_at,
            paid_at: order.paid_at,
            holds: None,
            payments: None,
        }
    }

    fn detailed(view: &'a OrderView) -> Self {
        OrderBody {
            holds: Some(view.holds.iter().map(hold_body).collect()),
            payments: Some(view.payments.iter().map(payment_body).collect()),
            ..OrderBody::summary(&view.order)
        }
    }
}

fn hold_body(hold: &ReservationHold) -> HoldBody<'_> {
    HoldBody {
        reservation_id: hold.reservation_id,
        product_id: hold.product_id,
        quantity: hold.quantity,
        status: &hold.status,
        expires_at: hold.expires_at,
    }
}

fn payment_body(payment: &PaymentTransaction) -> PaymentBody<'_> {
    PaymentBody {
        transaction_id: &payment.transaction_id,
        gross_amount: &payment.gross_amount,
        provider_status: &payment.provider_status,
        fraud_status: payment.fraud_status.as_deref(),
        received_at: payment.received_at,
    }
}

fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::InsufficientStock { .. } => "insufficient_stock",
        EngineError::Rejected(_) => "rejected",
        EngineError::ReservationExpired(_) => "reservation_expired",
        EngineError::AmountMismatch { .. } => "amount_mismatch",
        EngineError::ConcurrencyConflict => "concurrency_conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::Database(_) | EngineError::Pool(_) | EngineError::Blocking(_) => "internal",
    }
}

/// Body for every failed request. Internal failures do not leak their cause.
pub fn error_body(err: &EngineError) -> serde_json::Value {
    match err {
        EngineError::Rejected(reason) => json!({ "status": "rejected", "reason": reason.to_string() }),
        EngineError::InsufficientStock {
            product_id,
            requested,
            available,
        } => json!({
            "status": "error",
            "error": error_code(err),
            "message": err.to_string(),
            "product_id": product_id,
            "requested": requested,
            "available": available,
        }),
        EngineError::Database(_) | EngineError::Pool(_) | EngineError::Blocking(_) => json!({
            "status": "error",
            "error": error_code(err),
            "message": "internal error",
        }),
        _ => json!({ "status": "error", "error": error_code(err), "message": err.to_string() }),
    }
}

pub fn reservation_created_http_response(created: &CreatedReservation) -> HttpResponse {
    HttpResponse::Created().json(json!({ "status": "ok", "reservation": created }))
}

pub fn order_http_response(view: &OrderView) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "order": OrderBody::detailed(view) }))
}

pub fn review_queue_http_response(tenant_id: &str, queue: &[Order]) -> HttpResponse {
    let orders: Vec<OrderBody> = queue.iter().map(OrderBody::summary).collect();
    HttpResponse::Ok().json(json!({ "status": "ok", "tenant_id": tenant_id, "orders": orders }))
}

pub fn availability_http_response(availability: &Availability) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "product_id": availability.product_id,
        "stock_quantity": availability.stock_quantity,
        "reserved": availability.reserved,
        "available": availability.available,
    }))
}

// a stale transition is still a 200: the request was valid, the order had moved on
pub fn transition_http_response(order_id: i64, target: &str, res: Transition) -> HttpResponse {
    match res {
        Transition::Applied => HttpResponse::Ok().json(json!({
            "status": "ok",
            "order_id": order_id,
            "applied": true,
            "order_status": target,
        })),
        Transition::Stale { current } => HttpResponse::Ok().json(json!({
            "status": "ok",
            "order_id": order_id,
            "applied": false,
            "order_status": current.as_str(),
        })),
    }
}

pub fn notification_ack_http_response(outcome: &NotificationOutcome) -> HttpResponse {
    match outcome {
        NotificationOutcome::FlaggedForReview(reason) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "outcome": outcome.as_str(),
            "reason": reason,
        })),
        _ => HttpResponse::Ok().json(json!({ "status": "ok", "outcome": outcome.as_str() })),
    }
}
