use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bigdecimal::BigDecimal;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::responses;

/// Why an inbound payment notification was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("unknown tenant {0}")]
    UnknownTenant(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown order reference {0}")]
    UnknownOrder(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("notification rejected: {0}")]
    Rejected(RejectReason),

    #[error("reservation for order {0} is no longer held")]
    ReservationExpired(i64),

    #[error("paid amount {received} does not match order total {expected}")]
    AmountMismatch {
        expected: BigDecimal,
        received: BigDecimal,
    },

    #[error("concurrent update conflict, retry the operation")]
    ConcurrencyConflict,

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict)
    }
}

// lock timeouts (55P03) and deadlocks (40P01) surface as unknown kinds, so match on the message
fn is_lock_conflict(message: &str) -> bool {
    message.contains("lock timeout") || message.contains("deadlock detected") || message.contains("could not obtain lock")
}

impl From<DieselError> for EngineError {
    fn from(err: DieselError) -> Self {
        match &err {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => EngineError::ConcurrencyConflict,
            DieselError::DatabaseError(_, info) if is_lock_conflict(info.message()) => EngineError::ConcurrencyConflict,
            _ => EngineError::Database(err),
        }
    }
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::InsufficientStock { .. } => StatusCode::CONFLICT,
            EngineError::Rejected(RejectReason::InvalidSignature | RejectReason::UnknownTenant(_)) => {
                StatusCode::UNAUTHORIZED
            }
            EngineError::Rejected(RejectReason::MalformedPayload(_)) => StatusCode::BAD_REQUEST,
            EngineError::Rejected(RejectReason::UnknownOrder(_)) => StatusCode::NOT_FOUND,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ReservationExpired(_) | EngineError::AmountMismatch { .. } => StatusCode::CONFLICT,
            EngineError::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Database(_) | EngineError::Pool(_) | EngineError::Blocking(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request refused");
        }
        HttpResponse::build(status).json(responses::error_body(self))
    }
}
