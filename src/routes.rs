use std::ops::DerefMut;

use actix_request_identifier::RequestId;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::instrument;

use crate::config::Settings;
use crate::database::connect::DbPool;
use crate::database::models::OrderStatus;
use crate::database::payments::{self, NotificationOutcome};
use crate::database::reservations::{self, CheckoutRequest};
use crate::database::{orders, queries, retry_on_conflict, CONFLICT_ATTEMPTS};
use crate::errors::EngineError;
use crate::notify::Notifier;
use crate::responses;
use crate::webhook::SIGNATURE_HEADER;

const DEFAULT_QUEUE_LIMIT: i64 = 50;
const MAX_QUEUE_LIMIT: i64 = 500;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(checkout_handler)
        .service(order_handler)
        .service(cancel_order_handler)
        .service(complete_order_handler)
        .service(availability_handler)
        .service(review_queue_handler)
        .service(payment_webhook_handler);
}

#[post("/checkout")]
#[instrument(skip(db, settings, checkout), fields(request_id = request_id.as_str(), tenant_id = checkout.tenant_id.as_str()))]
pub async fn checkout_handler(
    db: web::Data<DbPool>,
    settings: web::Data<Settings>,
    request_id: RequestId,
    checkout: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, EngineError> {
    let mut conn = db.get()?;
    let default_hold = settings.default_hold();
    let checkout = checkout.into_inner();

    let created = web::block(move || {
        retry_on_conflict(CONFLICT_ATTEMPTS, || {
            reservations::create_reservation(conn.deref_mut(), &checkout, default_hold)
        })
    })
    .await??;
    Ok(responses::reservation_created_http_response(&created))
}

#[get("/orders/{order_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    order_id: web::Path<i64>,
) -> Result<HttpResponse, EngineError> {
    let order_id = order_id.into_inner();
    let mut conn = db.get()?;

    let view = web::block(move || queries::load_order(conn.deref_mut(), order_id))
        .await??
        .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))?;
    Ok(responses::order_http_response(&view))
}

#[post("/orders/{order_id}/cancel")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn cancel_order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    order_id: web::Path<i64>,
) -> Result<HttpResponse, EngineError> {
    let order_id = order_id.into_inner();
    let mut conn = db.get()?;

    let res = web::block(move || {
        retry_on_conflict(CONFLICT_ATTEMPTS, || orders::cancel_order(conn.deref_mut(), order_id))
    })
    .await??;
    Ok(responses::transition_http_response(order_id, OrderStatus::Cancelled.as_str(), res))
}

#[post("/orders/{order_id}/complete")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn complete_order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    order_id: web::Path<i64>,
) -> Result<HttpResponse, EngineError> {
    let order_id = order_id.into_inner();
    let mut conn = db.get()?;

    let res = web::block(move || {
        retry_on_conflict(CONFLICT_ATTEMPTS, || orders::complete_order(conn.deref_mut(), order_id))
    })
    .await??;
    Ok(responses::transition_http_response(order_id, OrderStatus::Completed.as_str(), res))
}

#[get("/tenants/{tenant_id}/products/{product_id}/availability")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn availability_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, EngineError> {
    let (tenant_id, product_id) = path.into_inner();
    let mut conn = db.get()?;

    let availability = web::block(move || queries::load_availability(conn.deref_mut(), &tenant_id, product_id))
        .await??
        .ok_or_else(|| EngineError::NotFound(format!("product {product_id}")))?;
    Ok(responses::availability_http_response(&availability))
}

#[derive(Debug, Deserialize)]
pub struct ReviewQueueQuery {
    limit: Option<i64>,
}

#[get("/tenants/{tenant_id}/review-queue")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn review_queue_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    tenant_id: web::Path<String>,
    query: web::Query<ReviewQueueQuery>,
) -> Result<HttpResponse, EngineError> {
    let tenant_id = tenant_id.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_QUEUE_LIMIT).clamp(1, MAX_QUEUE_LIMIT);
    let mut conn = db.get()?;

    let req_tenant_id = tenant_id.clone();
    let queue = web::block(move || queries::review_queue(conn.deref_mut(), &req_tenant_id, limit)).await??;
    Ok(responses::review_queue_http_response(&tenant_id, &queue))
}

/// Payment provider callback. The raw body is kept as received so the
/// signature is checked over the exact bytes that were signed.
#[post("/webhooks/payment/{tenant_id}")]
#[instrument(skip(db, notifier, req, body), fields(request_id = request_id.as_str()))]
pub async fn payment_webhook_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<Notifier>,
    request_id: RequestId,
    req: HttpRequest,
    tenant_id: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, EngineError> {
    let tenant_id = tenant_id.into_inner();
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut conn = db.get()?;

    let outcome = web::block(move || {
        retry_on_conflict(CONFLICT_ATTEMPTS, || {
            payments::handle_notification(conn.deref_mut(), &tenant_id, &body, &signature)
        })
    })
    .await??;

    if let NotificationOutcome::Paid(event) = &outcome {
        notifier.order_paid(event.clone());
    }
    Ok(responses::notification_ack_http_response(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect::testing::test_pool;
    use crate::database::reservations::testing::{purge_tenant, seed_product, seed_tenant, TEST_SECRET};
    use crate::webhook;
    use actix_request_identifier::RequestIdentifier;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use diesel::r2d2::{ConnectionManager, Pool};
    use diesel::PgConnection;
    use serde_json::json;

    // never connects; enough for requests that fail before touching the database
    fn offline_pool() -> DbPool {
        Pool::builder()
            .max_size(1)
            .build_unchecked(ConnectionManager::<PgConnection>::new("postgres://localhost/unused"))
    }

    macro_rules! app {
        ($pool:expr) => {
            test::init_service(
                App::new()
                    .wrap(RequestIdentifier::with_uuid())
                    .app_data(web::Data::new($pool))
                    .app_data(web::Data::new(Settings::default()))
                    .app_data(web::Data::new(Notifier::new(None).unwrap()))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_malformed_checkout_is_bad_request() {
        let app = app!(offline_pool());
        let req = test::TestRequest::post()
            .uri("/checkout")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"tenant_id\":")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_checkout_then_pay_over_http() {
        let Some(pool) = test_pool() else { return };
        let (tenant, product) = {
            let mut conn = pool.get().unwrap();
            // hold outlasts the committed sweeps other tests run an hour ahead
            let tenant = seed_tenant(&mut conn, Some(180)).unwrap();
            let product = seed_product(&mut conn, &tenant, 3, "10.00").unwrap();
            (tenant, product)
        };
        let app = app!(pool.clone());

        let req = test::TestRequest::post()
            .uri("/checkout")
            .set_json(json!({
                "tenant_id": tenant,
                "items": [{ "product_id": product, "quantity": 2 }],
                "delivery_fee": "5.00",
                "customer": { "name": "Guest", "phone": "+620000000" },
            }))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(res).await;
        let reservation = &body["reservation"];
        let order_id = reservation["order_id"].as_i64().unwrap();
        let reference = reservation["order_reference"].as_str().unwrap().to_string();

        let payload = json!({
            "transaction_id": format!("tx-{order_id}"),
            "order_id": reference,
            "gross_amount": "25.00",
            "transaction_status": "settlement",
        })
        .to_string();
        let signature = webhook::sign(payload.as_bytes(), TEST_SECRET).unwrap();

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(&format!("/webhooks/payment/{tenant}"))
                .insert_header((SIGNATURE_HEADER, "00ff"))
                .set_payload(payload.clone())
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["status"], "rejected");

        for expected in ["paid", "duplicate"] {
            let res = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri(&format!("/webhooks/payment/{tenant}"))
                    .insert_header((SIGNATURE_HEADER, signature.as_str()))
                    .set_payload(payload.clone())
                    .to_request(),
            )
            .await;
            assert_eq!(res.status(), StatusCode::OK);
            let body: serde_json::Value = test::read_body_json(res).await;
            assert_eq!(body["outcome"], expected);
        }

        let res = test::call_service(
            &app,
            test::TestRequest::get().uri(&format!("/orders/{order_id}")).to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["order"]["status"], "PAID");
        assert_eq!(body["order"]["payments"].as_array().unwrap().len(), 1);

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/tenants/{tenant}/products/{product}/availability"))
                .to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["stock_quantity"], 1);
        assert_eq!(body["reserved"], 0);

        purge_tenant(&mut pool.get().unwrap(), &tenant).unwrap();
    }

    #[actix_web::test]
    async fn test_unknown_order_is_not_found() {
        let Some(pool) = test_pool() else { return };
        let app = app!(pool);
        let res = test::call_service(&app, test::TestRequest::get().uri("/orders/-1").to_request()).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
