//! Standard response envelope helpers.

use serde::Serialize;
use serde_json::Value;

/// Pagination metadata attached to every list reply.
#[derive(Serialize, Debug, PartialEq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

/// List reply: `{results, total, pagination}`. `total` is repeated inside
/// `pagination` with the same value.
#[derive(Serialize, Debug)]
pub struct ListResponse {
    pub results: Vec<Value>,
    pub total: i64,
    pub pagination: Pagination,
}

impl ListResponse {
    pub fn new(results: Vec<Value>, total: i64, limit: i64, offset: i64) -> Self {
        let has_more = offset + (results.len() as i64) < total;
        ListResponse {
            results,
            total,
            pagination: Pagination {
                limit,
                offset,
                total,
                has_more,
            },
        }
    }
}

/// Delete reply: `{deleted, message}`.
#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub deleted: u64,
    pub message: String,
}

impl DeleteResponse {
    pub fn new(deleted: u64) -> Self {
        DeleteResponse {
            deleted,
            message: format!("Deleted {} record(s)", deleted),
        }
    }
}
