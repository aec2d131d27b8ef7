//! Callable endpoint logic: argument binding and result-shape dispatch.
//!
//! Volatile callables get their own transaction; stable and immutable ones
//! run directly on a pooled connection.

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::filter::CallRequest;
use crate::introspection::{Callable, Volatility};
use crate::resolver::{bind_query, ResolverSet};
use crate::sql::CallShape;
use serde_json::{json, Value};
use sqlx::PgPool;

pub async fn call(
    pool: &PgPool,
    set: &ResolverSet,
    callable: &Callable,
    config: &GatewayConfig,
    req: &CallRequest,
) -> Result<Value, AppError> {
    let compiled = set.compiler(config).compile_call(callable, &req.arguments)?;
    tracing::debug!(sql = %compiled.sql, callable = %callable.qualified_name(), "call");

    let own_transaction = callable.volatility == Volatility::Volatile;

    match &compiled.shape {
        CallShape::Procedure | CallShape::Void => {
            if own_transaction {
                let mut tx = pool.begin().await?;
                bind_query(&compiled.sql, &compiled.args)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            } else {
                bind_query(&compiled.sql, &compiled.args)
                    .execute(pool)
                    .await?;
            }
            Ok(json!({ "ok": true }))
        }
        CallShape::Scalar { type_oid } => {
            let row = if own_transaction {
                let mut tx = pool.begin().await?;
                let row = bind_query(&compiled.sql, &compiled.args)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;
                row
            } else {
                bind_query(&compiled.sql, &compiled.args)
                    .fetch_one(pool)
                    .await?
            };
            let value = set.registry.decode(&row, "result", *type_oid)?;
            Ok(json!({ "result": value }))
        }
        CallShape::Row => {
            let row = if own_transaction {
                let mut tx = pool.begin().await?;
                let row = bind_query(&compiled.sql, &compiled.args)
                    .fetch_optional(&mut *tx)
                    .await?;
                tx.commit().await?;
                row
            } else {
                bind_query(&compiled.sql, &compiled.args)
                    .fetch_optional(pool)
                    .await?
            };
            let value = match row {
                Some(row) => row_result(&row)?,
                None => Value::Null,
            };
            Ok(json!({ "result": value }))
        }
        CallShape::Rows => {
            let rows = if own_transaction {
                let mut tx = pool.begin().await?;
                let rows = bind_query(&compiled.sql, &compiled.args)
                    .fetch_all(&mut *tx)
                    .await?;
                tx.commit().await?;
                rows
            } else {
                bind_query(&compiled.sql, &compiled.args)
                    .fetch_all(pool)
                    .await?
            };
            let results = rows
                .iter()
                .map(row_result)
                .collect::<Result<Vec<_>, _>>()?;
            let total = results.len();
            Ok(json!({ "results": results, "total": total }))
        }
    }
}

/// Rows come back as a single `result` JSON column (`to_json(t)`).
fn row_result(row: &sqlx::postgres::PgRow) -> Result<Value, AppError> {
    use sqlx::Row;
    let v: Option<Value> = row.try_get("result").map_err(|e| AppError::Decode {
        oid: 0,
        reason: format!("call result: {}", e),
    })?;
    Ok(v.unwrap_or(Value::Null))
}
