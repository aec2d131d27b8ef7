//! Inbound request shapes: filter documents, create/update/delete requests.
//!
//! Unknown top-level keys are rejected at deserialization. Field and
//! operator validation against the live schema happens in the compiler.

use crate::error::AppError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Declarative query body: `{select?, where?, pagination?}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterDocument {
    #[serde(default)]
    pub select: Option<SelectClause>,
    #[serde(default, rename = "where")]
    pub where_: Option<WhereClause>,
    #[serde(default)]
    pub pagination: Option<PaginationParams>,
}

/// Field selection. Keys other than `fields` name related relations and
/// carry a nested clause; they are validated against foreign keys during
/// compilation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectClause {
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(flatten)]
    pub nested: BTreeMap<String, SelectClause>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WhereClause {
    Comparison {
        field: String,
        operator: ComparisonOperator,
        #[serde(default)]
        value: Option<Value>,
    },
    Logical {
        operator: LogicalOperator,
        conditions: Vec<WhereClause>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl ComparisonOperator {
    pub fn sql(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Neq => "<>",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Like => "LIKE",
            ComparisonOperator::Ilike => "ILIKE",
            ComparisonOperator::In => "IN",
            ComparisonOperator::NotIn => "NOT IN",
            ComparisonOperator::IsNull => "IS NULL",
            ComparisonOperator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "eq",
            ComparisonOperator::Neq => "neq",
            ComparisonOperator::Gt => "gt",
            ComparisonOperator::Gte => "gte",
            ComparisonOperator::Lt => "lt",
            ComparisonOperator::Lte => "lte",
            ComparisonOperator::Like => "like",
            ComparisonOperator::Ilike => "ilike",
            ComparisonOperator::In => "in",
            ComparisonOperator::NotIn => "not_in",
            ComparisonOperator::IsNull => "is_null",
            ComparisonOperator::IsNotNull => "is_not_null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// Opaque; accepted and ignored.
    #[serde(default)]
    pub cursor: Option<String>,
}

/// `PUT` body: one row or a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRequest {
    pub data: CreateData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreateData {
    One(Map<String, Value>),
    Many(Vec<Map<String, Value>>),
}

impl CreateData {
    pub fn rows(&self) -> Vec<&Map<String, Value>> {
        match self {
            CreateData::One(row) => vec![row],
            CreateData::Many(rows) => rows.iter().collect(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, CreateData::Many(_))
    }
}

/// Identifies exactly one row: values for the primary key or for one
/// complete unique constraint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyRequest {
    pub values: Map<String, Value>,
}

/// `POST` body carrying `key` + `data`: update by key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequest {
    pub key: KeyRequest,
    pub data: Map<String, Value>,
}

/// `POST` body for callables: `{arguments: {name: value}}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallRequest {
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// A relation `POST` body is an update when it carries `key`, otherwise a
/// filter document.
#[derive(Debug, Clone)]
pub enum PostBody {
    Filter(FilterDocument),
    Update(UpdateRequest),
}

impl PostBody {
    pub fn parse(body: Value) -> Result<Self, AppError> {
        let is_update = body
            .as_object()
            .map(|o| o.contains_key("key"))
            .unwrap_or(false);
        if is_update {
            let req: UpdateRequest = serde_json::from_value(body)
                .map_err(|e| AppError::BadRequest(format!("invalid update request: {}", e)))?;
            Ok(PostBody::Update(req))
        } else {
            let doc: FilterDocument = serde_json::from_value(body)
                .map_err(|e| AppError::BadRequest(format!("invalid filter document: {}", e)))?;
            Ok(PostBody::Filter(doc))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_document_parses_where_tree() {
        let doc: FilterDocument = serde_json::from_value(json!({
            "where": {
                "type": "logical",
                "operator": "and",
                "conditions": [
                    {"type": "comparison", "field": "age", "operator": "gt", "value": 27},
                    {"type": "comparison", "field": "name", "operator": "is_not_null"}
                ]
            },
            "pagination": {"limit": 10, "offset": 0}
        }))
        .unwrap();
        let Some(WhereClause::Logical {
            operator,
            conditions,
        }) = doc.where_
        else {
            panic!("expected logical root");
        };
        assert_eq!(operator, LogicalOperator::And);
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let err = serde_json::from_value::<FilterDocument>(json!({"order_by": ["id"]}));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = serde_json::from_value::<FilterDocument>(json!({
            "where": {"type": "comparison", "field": "a", "operator": "regex", "value": "x"}
        }));
        assert!(err.is_err());
    }

    #[test]
    fn select_clause_captures_nested_relations() {
        let doc: FilterDocument = serde_json::from_value(json!({
            "select": {
                "fields": ["id"],
                "orders": {"fields": ["id", "total"]}
            }
        }))
        .unwrap();
        let select = doc.select.unwrap();
        assert_eq!(select.fields.as_deref(), Some(&["id".to_string()][..]));
        assert!(select.nested.contains_key("orders"));
        assert_eq!(
            select.nested["orders"].fields.as_ref().unwrap(),
            &["id".to_string(), "total".to_string()]
        );
    }

    #[test]
    fn post_body_disambiguates_on_key_presence() {
        let update = PostBody::parse(json!({
            "key": {"values": {"id": 3}},
            "data": {"age": 41}
        }))
        .unwrap();
        assert!(matches!(update, PostBody::Update(_)));

        let filter = PostBody::parse(json!({
            "where": {"type": "comparison", "field": "id", "operator": "eq", "value": 3}
        }))
        .unwrap();
        assert!(matches!(filter, PostBody::Filter(_)));
    }

    #[test]
    fn create_request_accepts_single_and_batch() {
        let one: CreateRequest =
            serde_json::from_value(json!({"data": {"id": 3, "name": "Carol"}})).unwrap();
        assert!(!one.data.is_batch());
        assert_eq!(one.data.rows().len(), 1);

        let many: CreateRequest =
            serde_json::from_value(json!({"data": [{"id": 3}, {"id": 4}]})).unwrap();
        assert!(many.data.is_batch());
        assert_eq!(many.data.rows().len(), 2);
    }

    #[test]
    fn cursor_is_accepted_and_ignored() {
        let doc: FilterDocument = serde_json::from_value(json!({
            "pagination": {"limit": 5, "offset": 0, "cursor": "opaque-token"}
        }))
        .unwrap();
        assert_eq!(doc.pagination.unwrap().cursor.as_deref(), Some("opaque-token"));
    }
}
