//! Relation endpoint logic: list, filter, create, update, delete.
//!
//! Every operation compiles against the resolver set's snapshot, executes
//! on a pooled connection and decodes rows through the snapshot's type
//! registry. Mutations run inside a transaction per request.

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::filter::{
    ComparisonOperator, CreateRequest, FilterDocument, KeyRequest, SelectClause, UpdateRequest,
    WhereClause,
};
use crate::introspection::{Relation, RelationKind};
use crate::resolver::{bind_query, ResolverSet};
use crate::response::{DeleteResponse, ListResponse};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;

/// GET: query-string list. `limit`, `offset` and `select_fields` are
/// reserved keys; any other key naming a column becomes an equality filter,
/// unknown keys are ignored.
pub async fn list(
    pool: &PgPool,
    set: &ResolverSet,
    rel: &Relation,
    config: &GatewayConfig,
    params: &HashMap<String, String>,
) -> Result<ListResponse, AppError> {
    let doc = list_document(&set.registry, rel, params)?;
    query(pool, set, rel, config, &doc).await
}

/// Turns query-string parameters into a filter document with a conjunctive
/// equality where tree.
fn list_document(
    registry: &crate::typereg::TypeRegistry,
    rel: &Relation,
    params: &HashMap<String, String>,
) -> Result<FilterDocument, AppError> {
    let mut doc = FilterDocument::default();

    let mut pagination = crate::filter::PaginationParams::default();
    if let Some(raw) = params.get("limit") {
        pagination.limit = Some(
            raw.parse()
                .map_err(|_| AppError::BadRequest(format!("invalid limit: {}", raw)))?,
        );
    }
    if let Some(raw) = params.get("offset") {
        pagination.offset = Some(
            raw.parse()
                .map_err(|_| AppError::BadRequest(format!("invalid offset: {}", raw)))?,
        );
    }
    doc.pagination = Some(pagination);

    if let Some(raw) = params.get("select_fields") {
        let fields: Vec<String> = raw
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        doc.select = Some(SelectClause {
            fields: Some(fields),
            nested: Default::default(),
        });
    }

    let mut conditions = Vec::new();
    for (key, raw) in params {
        if matches!(key.as_str(), "limit" | "offset" | "select_fields") {
            continue;
        }
        if let Some(attr) = rel.attribute(key) {
            conditions.push(WhereClause::Comparison {
                field: key.clone(),
                operator: ComparisonOperator::Eq,
                value: Some(registry.parse_query_literal(raw, attr.type_oid)),
            });
        }
    }
    if !conditions.is_empty() {
        doc.where_ = Some(WhereClause::Logical {
            operator: crate::filter::LogicalOperator::And,
            conditions,
        });
    }

    Ok(doc)
}

/// POST with a filter document: the complex-query path.
pub async fn query(
    pool: &PgPool,
    set: &ResolverSet,
    rel: &Relation,
    config: &GatewayConfig,
    doc: &FilterDocument,
) -> Result<ListResponse, AppError> {
    let compiler = set.compiler(config);
    let stmt = compiler.compile_query(rel, doc)?;
    let (limit, offset) = compiler.pagination(doc)?;

    tracing::debug!(sql = %stmt.sql, relation = %rel.qualified_name(), "query");
    let rows = bind_query(&stmt.sql, &stmt.args).fetch_all(pool).await?;
    let (results, total) = stmt.decode_rows(&set.registry, &rows)?;
    Ok(ListResponse::new(results, total, limit, offset))
}

/// PUT: insert one row or a batch inside one transaction, returning the
/// created rows with server-assigned values populated.
pub async fn create(
    pool: &PgPool,
    set: &ResolverSet,
    rel: &Relation,
    config: &GatewayConfig,
    req: &CreateRequest,
) -> Result<Vec<Value>, AppError> {
    ensure_writable(rel)?;
    let stmt = set.compiler(config).compile_insert(rel, &req.data.rows())?;

    tracing::debug!(sql = %stmt.sql, relation = %rel.qualified_name(), "insert");
    let mut tx = pool.begin().await?;
    let rows = bind_query(&stmt.sql, &stmt.args).fetch_all(&mut *tx).await?;
    tx.commit().await?;

    let (created, _) = stmt.decode_rows(&set.registry, &rows)?;
    Ok(created)
}

/// POST with `key` + `data`: update exactly one row identified by its
/// primary key or one complete unique constraint.
pub async fn update(
    pool: &PgPool,
    set: &ResolverSet,
    rel: &Relation,
    config: &GatewayConfig,
    req: &UpdateRequest,
) -> Result<Value, AppError> {
    ensure_writable(rel)?;
    let stmt = set
        .compiler(config)
        .compile_update(rel, &req.key.values, &req.data)?;

    tracing::debug!(sql = %stmt.sql, relation = %rel.qualified_name(), "update");
    let mut tx = pool.begin().await?;
    let row = bind_query(&stmt.sql, &stmt.args)
        .fetch_optional(&mut *tx)
        .await?;
    tx.commit().await?;

    match row {
        Some(row) => stmt.decode_row(&set.registry, &row),
        None => Err(AppError::NotFound("record not found".into())),
    }
}

/// DELETE by key. Returns the affected-row count; the HTTP layer maps a
/// zero count to 404.
pub async fn delete(
    pool: &PgPool,
    set: &ResolverSet,
    rel: &Relation,
    config: &GatewayConfig,
    req: &KeyRequest,
) -> Result<DeleteResponse, AppError> {
    ensure_writable(rel)?;
    let stmt = set.compiler(config).compile_delete(rel, &req.values)?;

    tracing::debug!(sql = %stmt.sql, relation = %rel.qualified_name(), "delete");
    let mut tx = pool.begin().await?;
    let result = bind_query(&stmt.sql, &stmt.args).execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(DeleteResponse::new(result.rows_affected()))
}

fn ensure_writable(rel: &Relation) -> Result<(), AppError> {
    if rel.kind.is_writable() {
        return Ok(());
    }
    let label = match rel.kind {
        RelationKind::View => "a view",
        RelationKind::MaterializedView => "a materialized view",
        RelationKind::Foreign => "a foreign table",
        _ => "this relation",
    };
    Err(AppError::BadRequest(format!("cannot modify {}", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures;
    use crate::typereg::TypeRegistry;

    #[test]
    fn views_reject_writes() {
        let model = fixtures::test_model();
        let view = model.relation("public", "user_names").unwrap();
        let err = ensure_writable(view).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(m) if m.contains("view")));

        let table = model.relation("public", "users").unwrap();
        assert!(ensure_writable(table).is_ok());
    }

    #[test]
    fn query_params_become_typed_equality_filters() {
        let model = fixtures::test_model();
        let registry = TypeRegistry::from_model(&model);
        let rel = model.relation("public", "users").unwrap();

        let params: HashMap<String, String> = [
            ("limit".to_string(), "5".to_string()),
            ("offset".to_string(), "10".to_string()),
            ("select_fields".to_string(), "id,name".to_string()),
            ("age".to_string(), "30".to_string()),
            ("unknown_col".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();

        let doc = list_document(&registry, rel, &params).unwrap();
        let p = doc.pagination.as_ref().unwrap();
        assert_eq!(p.limit, Some(5));
        assert_eq!(p.offset, Some(10));
        assert_eq!(
            doc.select.as_ref().unwrap().fields.as_ref().unwrap(),
            &["id".to_string(), "name".to_string()]
        );

        // only the declared column survives; the literal is typed
        let Some(WhereClause::Logical { conditions, .. }) = &doc.where_ else {
            panic!("expected where tree");
        };
        assert_eq!(conditions.len(), 1);
        let WhereClause::Comparison { field, value, .. } = &conditions[0] else {
            panic!("expected comparison");
        };
        assert_eq!(field, "age");
        assert_eq!(value.as_ref().unwrap(), &serde_json::json!(30));
    }

    #[test]
    fn malformed_limit_is_rejected() {
        let model = fixtures::test_model();
        let registry = TypeRegistry::from_model(&model);
        let rel = model.relation("public", "users").unwrap();
        let params: HashMap<String, String> =
            [("limit".to_string(), "lots".to_string())].into_iter().collect();
        assert!(list_document(&registry, rel, &params).is_err());
    }
}
