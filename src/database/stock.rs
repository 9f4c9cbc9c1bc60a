//! Access to the catalog's authoritative stock counts.
//!
//! Every function here expects to run inside a caller's transaction. Row locks
//! taken through [`lock_products`] are held until that transaction ends.

use diesel::dsl::sum;
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{HoldStatus, Product};
use crate::errors::EngineError;

/// Locks the stock rows of `product_ids` for update, one by one in ascending id
/// order so that concurrent callers always acquire locks in the same sequence.
pub fn lock_products(
    conn: &mut PgConnection,
    req_tenant_id: &str,
    product_ids: &[i64],
) -> Result<Vec<Product>, EngineError> {
    let mut ids = product_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut locked = Vec::with_capacity(ids.len());
    for id in ids {
        use crate::schema::products::dsl::*;
        let product = products
            .filter(product_id.eq(id))
            .filter(tenant_id.eq(req_tenant_id))
            .for_update()
            .first::<Product>(conn)
            .optional()?;
        match product {
            Some(product) => locked.push(product),
            None => return Err(EngineError::Validation(format!("unknown product {id}"))),
        }
    }
    Ok(locked)
}

/// Sum of ACTIVE hold quantities against a product.
pub fn active_reserved(conn: &mut PgConnection, req_product_id: i64) -> Result<i64, EngineError> {
    use crate::schema::reservation_holds::dsl::*;
    let reserved = reservation_holds
        .filter(product_id.eq(req_product_id))
        .filter(status.eq(HoldStatus::Active.as_str()))
        .select(sum(quantity))
        .first::<Option<i64>>(conn)?;
    Ok(reserved.unwrap_or(0))
}

/// Permanently removes `amount` units from a product's stock. The row must
/// already be locked by the current transaction.
pub fn decrement_stock(conn: &mut PgConnection, req_product_id: i64, amount: i32) -> Result<(), EngineError> {
    use crate::schema::products::dsl::*;
    let updated = diesel::update(
        products
            .filter(product_id.eq(req_product_id))
            .filter(stock_quantity.ge(amount)),
    )
    .set(stock_quantity.eq(stock_quantity - amount))
    .execute(conn)?;
    if updated == 0 {
        let current = products
            .filter(product_id.eq(req_product_id))
            .select(stock_quantity)
            .first::<i32>(conn)
            .optional()?
            .unwrap_or(0);
        return Err(EngineError::InsufficientStock {
            product_id: req_product_id,
            requested: amount as i64,
            available: current as i64,
        });
    }
    Ok(())
}
