use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

// a stored value this service could not have written
fn corrupt(message: String) -> EngineError {
    EngineError::Database(diesel::result::Error::DeserializationError(message.into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(OrderStatus::PendingPayment),
            "PAID" => Ok(OrderStatus::Paid),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "EXPIRED" => Ok(OrderStatus::Expired),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Released,
    Consumed,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "ACTIVE",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Consumed => "CONSUMED",
        }
    }
}

impl FromStr for HoldStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(HoldStatus::Active),
            "RELEASED" => Ok(HoldStatus::Released),
            "CONSUMED" => Ok(HoldStatus::Consumed),
            other => Err(format!("unknown hold status {other}")),
        }
    }
}

/// Line item as frozen into the order at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemSnapshot {
    pub product_id: i64,
    pub name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Queryable, Debug, Clone)]
pub struct Product {
    pub product_id: i64,
    pub tenant_id: String,
    pub name: String,
    pub price: BigDecimal,
    pub stock_quantity: i32,
}

#[derive(Queryable, Debug, Clone)]
pub struct TenantSettings {
    pub tenant_id: String,
    pub webhook_secret: String,
    pub hold_duration_minutes: Option<i32>,
}

#[derive(Queryable, Debug, Clone)]
pub struct Order {
    pub order_id: i64,
    pub tenant_id: String,
    pub order_reference: String,
    pub line_items: serde_json::Value,
    pub subtotal: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub total_amount: BigDecimal,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub needs_review: bool,
    pub review_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub paid_at: Option<NaiveDateTime>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, EngineError> {
        self.status.parse().map_err(corrupt)
    }

    pub fn items(&self) -> Result<Vec<LineItemSnapshot>, EngineError> {
        serde_json::from_value(self.line_items.clone()).map_err(|e| corrupt(e.to_string()))
    }
}

#[derive(Queryable, Debug, Clone)]
pub struct ReservationHold {
    pub reservation_id: i64,
    pub order_id: i64,
    pub tenant_id: String,
    pub product_id: i64,
    pub quantity: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl ReservationHold {
    pub fn status(&self) -> Result<HoldStatus, EngineError> {
        self.status.parse().map_err(corrupt)
    }
}

#[derive(Queryable, Debug, Clone)]
pub struct PaymentTransaction {
    pub tenant_id: String,
    pub transaction_id: String,
    pub order_id: i64,
    pub gross_amount: BigDecimal,
    pub provider_status: String,
    pub fraud_status: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub order_id: i64,
    pub tenant_id: String,
    pub order_reference: String,
    pub line_items: serde_json::Value,
    pub subtotal: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub total_amount: BigDecimal,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::reservation_holds)]
pub struct NewReservationHold {
    pub reservation_id: i64,
    pub order_id: i64,
    pub tenant_id: String,
    pub product_id: i64,
    pub quantity: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::payment_transactions)]
pub struct NewPaymentTransaction {
    pub tenant_id: String,
    pub transaction_id: String,
    pub order_id: i64,
    pub gross_amount: BigDecimal,
    pub provider_status: String,
    pub fraud_status: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: NaiveDateTime,
}
