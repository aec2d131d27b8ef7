//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and CALL statements
//! from a relation (or callable) and a validated request document.
//!
//! Identifiers come from the schema snapshot and are always quoted; values
//! always travel as numbered placeholders. Nothing from the request body is
//! ever interpolated into SQL text.

use crate::error::AppError;
use crate::filter::{
    ComparisonOperator, FilterDocument, LogicalOperator, SelectClause, WhereClause,
};
use crate::introspection::{Callable, CallableKind, Relation, ReturnSignature, SchemaModel};
use crate::sql::BoundLiteral;
use crate::typereg::{is_text_like, SelectStyle, TypeRegistry};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashSet;

pub const TOTAL_COLUMN: &str = "__total_count";
const MAIN_ALIAS: &str = "main";

/// Quote an identifier using PostgreSQL quoting rules.
pub fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified(namespace: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(name))
}

/// How one output column of a compiled statement decodes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputKind {
    /// Decode through the type registry.
    Typed(u32),
    /// Already JSON on the wire (nested sub-aggregations).
    Json,
    /// The `count(*) OVER ()` window column; stripped from rows.
    TotalCount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub kind: OutputKind,
}

#[derive(Debug, Clone)]
pub struct CompiledStatement {
    pub sql: String,
    pub args: Vec<BoundLiteral>,
    pub columns: Vec<OutputColumn>,
}

impl CompiledStatement {
    /// Decodes fetched rows into JSON objects, extracting the window total.
    /// An empty page reports total 0.
    pub fn decode_rows(
        &self,
        registry: &TypeRegistry,
        rows: &[PgRow],
    ) -> Result<(Vec<Value>, i64), AppError> {
        let mut total = 0i64;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut obj = Map::new();
            for col in &self.columns {
                match &col.kind {
                    OutputKind::Typed(oid) => {
                        obj.insert(col.name.clone(), registry.decode(row, &col.name, *oid)?);
                    }
                    OutputKind::Json => {
                        let v: Option<Value> =
                            row.try_get(col.name.as_str()).map_err(|e| AppError::Decode {
                                oid: 0,
                                reason: format!("column '{}': {}", col.name, e),
                            })?;
                        obj.insert(col.name.clone(), v.unwrap_or(Value::Null));
                    }
                    OutputKind::TotalCount => {
                        total = row.try_get(col.name.as_str()).map_err(|e| AppError::Decode {
                            oid: 0,
                            reason: format!("total column: {}", e),
                        })?;
                    }
                }
            }
            out.push(Value::Object(obj));
        }
        Ok((out, total))
    }

    /// Decodes a single returned row (insert/update RETURNING).
    pub fn decode_row(&self, registry: &TypeRegistry, row: &PgRow) -> Result<Value, AppError> {
        let (mut rows, _) = self.decode_rows(registry, std::slice::from_ref(row))?;
        Ok(rows.pop().unwrap_or(Value::Null))
    }
}

/// Shape of a compiled callable invocation; drives the resolver's dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum CallShape {
    Procedure,
    Void,
    Scalar { type_oid: u32 },
    Row,
    Rows,
}

#[derive(Debug, Clone)]
pub struct CompiledCall {
    pub sql: String,
    pub args: Vec<BoundLiteral>,
    pub shape: CallShape,
}

struct ParamBuf {
    args: Vec<BoundLiteral>,
}

impl ParamBuf {
    fn new() -> Self {
        ParamBuf { args: Vec::new() }
    }

    /// Appends a bound literal and returns its placeholder, cast included.
    fn push(&mut self, lit: BoundLiteral) -> String {
        let placeholder = lit.placeholder(self.args.len() + 1);
        self.args.push(lit);
        placeholder
    }
}

/// Compiles request documents against one schema snapshot.
pub struct QueryCompiler<'a> {
    pub model: &'a SchemaModel,
    pub registry: &'a TypeRegistry,
    pub default_limit: i64,
    pub max_limit: i64,
}

impl<'a> QueryCompiler<'a> {
    /// SELECT with filter, pagination, nested sub-aggregations and the
    /// window total, in one statement.
    pub fn compile_query(
        &self,
        rel: &Relation,
        doc: &FilterDocument,
    ) -> Result<CompiledStatement, AppError> {
        let mut buf = ParamBuf::new();
        let mut columns = Vec::new();

        let field_names: Vec<&str> = match doc.select.as_ref().and_then(|s| s.fields.as_ref()) {
            Some(fields) => fields.iter().map(|f| f.as_str()).collect(),
            None => rel.attributes.iter().map(|a| a.name.as_str()).collect(),
        };

        let mut select_parts = Vec::with_capacity(field_names.len() + 1);
        for name in &field_names {
            let attr = rel
                .attribute(name)
                .ok_or_else(|| AppError::UnknownField(name.to_string()))?;
            select_parts.push(self.select_expr(Some(MAIN_ALIAS), &attr.name, attr.type_oid));
            columns.push(OutputColumn {
                name: attr.name.clone(),
                kind: OutputKind::Typed(attr.type_oid),
            });
        }

        if let Some(select) = &doc.select {
            for (nested_name, nested_clause) in &select.nested {
                select_parts.push(self.nested_subquery(
                    rel,
                    MAIN_ALIAS,
                    nested_name,
                    nested_clause,
                    1,
                )?);
                columns.push(OutputColumn {
                    name: nested_name.clone(),
                    kind: OutputKind::Json,
                });
            }
        }

        select_parts.push(format!("count(*) OVER () AS {}", quote_ident(TOTAL_COLUMN)));
        columns.push(OutputColumn {
            name: TOTAL_COLUMN.to_string(),
            kind: OutputKind::TotalCount,
        });

        let where_clause = match &doc.where_ {
            Some(w) => format!(" WHERE {}", self.compile_where(rel, MAIN_ALIAS, w, &mut buf)?),
            None => String::new(),
        };

        let order_clause = match rel.primary_key() {
            Some(pk) => format!(
                " ORDER BY {}",
                pk.columns
                    .iter()
                    .map(|c| format!("{}.{}", MAIN_ALIAS, quote_ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            None => String::new(),
        };

        let (limit, offset) = self.pagination(doc)?;
        let limit_ph = buf.push(BoundLiteral::int(limit));
        let offset_ph = buf.push(BoundLiteral::int(offset));

        let sql = format!(
            "SELECT {} FROM {} {}{}{} LIMIT {} OFFSET {}",
            select_parts.join(", "),
            qualified(&rel.namespace, &rel.name),
            MAIN_ALIAS,
            where_clause,
            order_clause,
            limit_ph,
            offset_ph,
        );

        Ok(CompiledStatement {
            sql,
            args: buf.args,
            columns,
        })
    }

    /// Validated limit/offset with configured default and ceiling.
    pub fn pagination(&self, doc: &FilterDocument) -> Result<(i64, i64), AppError> {
        let p = doc.pagination.as_ref();
        let limit = p.and_then(|p| p.limit).unwrap_or(self.default_limit);
        let offset = p.and_then(|p| p.offset).unwrap_or(0);
        if limit < 0 || offset < 0 {
            return Err(AppError::BadRequest(
                "limit and offset must be non-negative".into(),
            ));
        }
        if limit > self.max_limit {
            return Err(AppError::LimitExceeded {
                requested: limit,
                max: self.max_limit,
            });
        }
        Ok((limit, offset))
    }

    /// INSERT for one or more rows, RETURNING the created rows. Missing
    /// non-nullable attributes without defaults fail before reaching the
    /// database.
    pub fn compile_insert(
        &self,
        rel: &Relation,
        rows: &[&Map<String, Value>],
    ) -> Result<CompiledStatement, AppError> {
        if rows.is_empty() {
            return Err(AppError::BadRequest("no rows to insert".into()));
        }
        for row in rows {
            for key in row.keys() {
                let attr = rel
                    .attribute(key)
                    .ok_or_else(|| AppError::UnknownField(key.clone()))?;
                if !attr.accepts_input() {
                    return Err(AppError::BadRequest(format!(
                        "column '{}' is generated and cannot be written",
                        key
                    )));
                }
            }
            for attr in &rel.attributes {
                let provided = row.get(&attr.name).map(|v| !v.is_null()).unwrap_or(false);
                if !provided && !attr.omittable() {
                    return Err(AppError::MissingField(attr.name.clone()));
                }
            }
        }

        // Deterministic column set: attribute order, union of provided keys.
        let provided: HashSet<&str> = rows
            .iter()
            .flat_map(|r| r.keys())
            .map(|k| k.as_str())
            .collect();
        let insert_attrs: Vec<_> = rel
            .attributes
            .iter()
            .filter(|a| provided.contains(a.name.as_str()))
            .collect();

        let (returning, columns) = self.returning_list(rel);
        if insert_attrs.is_empty() {
            // Every column defaulted; `VALUES ()` is not valid SQL.
            if rows.len() > 1 {
                return Err(AppError::BadRequest(
                    "batch insert requires at least one column".into(),
                ));
            }
            let sql = format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                qualified(&rel.namespace, &rel.name),
                returning,
            );
            return Ok(CompiledStatement {
                sql,
                args: Vec::new(),
                columns,
            });
        }

        let mut buf = ParamBuf::new();
        let mut value_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let mut placeholders = Vec::with_capacity(insert_attrs.len());
            for attr in &insert_attrs {
                match row.get(&attr.name) {
                    Some(v) => {
                        let encoded = self.encode_field(&attr.name, v, attr.type_oid)?;
                        placeholders.push(buf.push(encoded));
                    }
                    None if attr.has_default => placeholders.push("DEFAULT".into()),
                    None => placeholders.push("NULL".into()),
                }
            }
            value_rows.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} RETURNING {}",
            qualified(&rel.namespace, &rel.name),
            insert_attrs
                .iter()
                .map(|a| quote_ident(&a.name))
                .collect::<Vec<_>>()
                .join(", "),
            value_rows.join(", "),
            returning,
        );
        Ok(CompiledStatement {
            sql,
            args: buf.args,
            columns,
        })
    }

    /// UPDATE by key, RETURNING the updated row. The key must exactly match
    /// the primary key or one complete unique constraint.
    pub fn compile_update(
        &self,
        rel: &Relation,
        key: &Map<String, Value>,
        patch: &Map<String, Value>,
    ) -> Result<CompiledStatement, AppError> {
        check_key_shape(rel, key)?;
        if patch.is_empty() {
            return Err(AppError::BadRequest("update data must not be empty".into()));
        }

        let mut buf = ParamBuf::new();
        let mut sets = Vec::with_capacity(patch.len());
        for (name, value) in patch {
            let attr = rel
                .attribute(name)
                .ok_or_else(|| AppError::UnknownField(name.clone()))?;
            if !attr.accepts_input() {
                return Err(AppError::BadRequest(format!(
                    "column '{}' is generated and cannot be written",
                    name
                )));
            }
            let encoded = self.encode_field(name, value, attr.type_oid)?;
            sets.push(format!("{} = {}", quote_ident(name), buf.push(encoded)));
        }

        let where_clause = self.key_condition(rel, key, &mut buf)?;
        let (returning, columns) = self.returning_list(rel);
        let sql = format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            qualified(&rel.namespace, &rel.name),
            sets.join(", "),
            where_clause,
            returning,
        );
        Ok(CompiledStatement {
            sql,
            args: buf.args,
            columns,
        })
    }

    /// DELETE by key, same key rule as update. No RETURNING; the affected
    /// row count is the result.
    pub fn compile_delete(
        &self,
        rel: &Relation,
        key: &Map<String, Value>,
    ) -> Result<CompiledStatement, AppError> {
        check_key_shape(rel, key)?;
        let mut buf = ParamBuf::new();
        let where_clause = self.key_condition(rel, key, &mut buf)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            qualified(&rel.namespace, &rel.name),
            where_clause,
        );
        Ok(CompiledStatement {
            sql,
            args: buf.args,
            columns: Vec::new(),
        })
    }

    /// Callable invocation with named-argument binding. Arguments bind by
    /// name when the function declares names; otherwise positionally, in
    /// which case a supplied argument may not follow a skipped one.
    pub fn compile_call(
        &self,
        callable: &Callable,
        kwargs: &Map<String, Value>,
    ) -> Result<CompiledCall, AppError> {
        let input_args: Vec<_> = callable.input_args().collect();
        let known: HashSet<&str> = input_args.iter().map(|a| a.name.as_str()).collect();
        for name in kwargs.keys() {
            if !known.contains(name.as_str()) {
                return Err(AppError::BadRequest(format!("unknown argument: {}", name)));
            }
        }

        let all_named = input_args.iter().all(|a| a.named);
        let mut buf = ParamBuf::new();
        let mut parts = Vec::with_capacity(input_args.len());
        let mut skipped = false;
        for arg in &input_args {
            match kwargs.get(&arg.name) {
                Some(v) => {
                    if skipped && !all_named {
                        return Err(AppError::BadRequest(format!(
                            "argument '{}' cannot follow a defaulted argument in a positional call",
                            arg.name
                        )));
                    }
                    let encoded = self.encode_field(&arg.name, v, arg.type_oid)?;
                    let ph = buf.push(encoded);
                    if all_named {
                        parts.push(format!("{} => {}", quote_ident(&arg.name), ph));
                    } else {
                        parts.push(ph);
                    }
                }
                None if arg.has_default => skipped = true,
                None => return Err(AppError::MissingArgument(arg.name.clone())),
            }
        }

        let call_expr = format!(
            "{}({})",
            qualified(&callable.namespace, &callable.name),
            parts.join(", ")
        );

        let (sql, shape) = if callable.kind == CallableKind::Procedure {
            (format!("CALL {}", call_expr), CallShape::Procedure)
        } else {
            match &callable.returns {
                ReturnSignature::Void => (format!("SELECT {}", call_expr), CallShape::Void),
                ReturnSignature::SetOf { .. } => (
                    format!("SELECT to_json(t) AS result FROM {} t", call_expr),
                    CallShape::Rows,
                ),
                ReturnSignature::Composite { .. } => (
                    format!("SELECT to_json(t) AS result FROM {} t", call_expr),
                    CallShape::Row,
                ),
                ReturnSignature::Scalar { type_oid } => {
                    let expr = match self.registry.select_style(*type_oid) {
                        SelectStyle::Plain => call_expr,
                        SelectStyle::CastText => format!("{}::text", call_expr),
                        SelectStyle::ToJson => format!("to_json({})", call_expr),
                    };
                    (
                        format!("SELECT {} AS result", expr),
                        CallShape::Scalar {
                            type_oid: *type_oid,
                        },
                    )
                }
            }
        };

        Ok(CompiledCall {
            sql,
            args: buf.args,
            shape,
        })
    }

    fn compile_where(
        &self,
        rel: &Relation,
        alias: &str,
        clause: &WhereClause,
        buf: &mut ParamBuf,
    ) -> Result<String, AppError> {
        match clause {
            WhereClause::Comparison {
                field,
                operator,
                value,
            } => self.compile_comparison(rel, alias, field, *operator, value.as_ref(), buf),
            WhereClause::Logical {
                operator,
                conditions,
            } => {
                if conditions.is_empty() {
                    return Err(AppError::BadRequest(
                        "logical operator requires at least one condition".into(),
                    ));
                }
                match operator {
                    LogicalOperator::Not => {
                        if conditions.len() != 1 {
                            return Err(AppError::BadRequest(
                                "'not' takes exactly one condition".into(),
                            ));
                        }
                        let inner = self.compile_where(rel, alias, &conditions[0], buf)?;
                        Ok(format!("NOT ({})", inner))
                    }
                    LogicalOperator::And | LogicalOperator::Or => {
                        let joiner = if *operator == LogicalOperator::And {
                            " AND "
                        } else {
                            " OR "
                        };
                        let parts = conditions
                            .iter()
                            .map(|c| self.compile_where(rel, alias, c, buf))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(format!("({})", parts.join(joiner)))
                    }
                }
            }
        }
    }

    fn compile_comparison(
        &self,
        rel: &Relation,
        alias: &str,
        field: &str,
        operator: ComparisonOperator,
        value: Option<&Value>,
        buf: &mut ParamBuf,
    ) -> Result<String, AppError> {
        let attr = rel
            .attribute(field)
            .ok_or_else(|| AppError::UnknownField(field.to_string()))?;
        let lhs = format!("{}.{}", alias, quote_ident(&attr.name));
        let desc = self.registry.describe(attr.type_oid);

        match operator {
            ComparisonOperator::IsNull | ComparisonOperator::IsNotNull => {
                if value.map(|v| !v.is_null()).unwrap_or(false) {
                    return Err(AppError::BadRequest(format!(
                        "operator '{}' takes no value",
                        operator.name()
                    )));
                }
                Ok(format!("{} {}", lhs, operator.sql()))
            }
            ComparisonOperator::Like | ComparisonOperator::Ilike => {
                if !is_text_like(&desc.category) {
                    return Err(AppError::OperatorTypeMismatch {
                        field: field.to_string(),
                        operator: operator.name(),
                        type_name: desc.name,
                    });
                }
                let pattern = value.and_then(|v| v.as_str()).ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "operator '{}' requires a string pattern",
                        operator.name()
                    ))
                })?;
                let ph = buf.push(BoundLiteral::text(pattern));
                Ok(format!("{}::text {} {}", lhs, operator.sql(), ph))
            }
            ComparisonOperator::In | ComparisonOperator::NotIn => {
                let items = value.and_then(|v| v.as_array()).ok_or_else(|| {
                    AppError::OperatorTypeMismatch {
                        field: field.to_string(),
                        operator: operator.name(),
                        type_name: desc.name.clone(),
                    }
                })?;
                if items.is_empty() {
                    // IN () is not valid SQL; an empty list matches nothing.
                    return Ok(match operator {
                        ComparisonOperator::In => "FALSE".to_string(),
                        _ => "TRUE".to_string(),
                    });
                }
                let placeholders = items
                    .iter()
                    .map(|item| {
                        self.encode_field(field, item, attr.type_oid)
                            .map(|e| buf.push(e))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!(
                    "{} {} ({})",
                    lhs,
                    operator.sql(),
                    placeholders.join(", ")
                ))
            }
            _ => {
                let value = value.filter(|v| !v.is_null()).ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "operator '{}' requires a value",
                        operator.name()
                    ))
                })?;
                let encoded = self.encode_field(field, value, attr.type_oid)?;
                let ph = buf.push(encoded);
                Ok(format!("{} {} {}", lhs, operator.sql(), ph))
            }
        }
    }

    /// Correlated sub-aggregation for a nested select clause, joined over a
    /// foreign key in either direction. Always a JSON array.
    fn nested_subquery(
        &self,
        rel: &Relation,
        outer_alias: &str,
        nested_name: &str,
        clause: &SelectClause,
        depth: usize,
    ) -> Result<String, AppError> {
        let (related, join_pairs) = self.fk_join(rel, nested_name)?;
        let inner_alias = format!("t{}", depth);

        let field_names: Vec<&str> = match clause.fields.as_ref() {
            Some(fields) => fields.iter().map(|f| f.as_str()).collect(),
            None => related.attributes.iter().map(|a| a.name.as_str()).collect(),
        };
        let mut cols = Vec::with_capacity(field_names.len());
        for name in &field_names {
            let attr = related
                .attribute(name)
                .ok_or_else(|| AppError::UnknownField(name.to_string()))?;
            // row_to_json renders native types; no cast needed here.
            cols.push(format!("{}.{}", inner_alias, quote_ident(&attr.name)));
        }
        for (inner_nested, inner_clause) in &clause.nested {
            cols.push(self.nested_subquery(
                related,
                &inner_alias,
                inner_nested,
                inner_clause,
                depth + 1,
            )?);
        }

        let join = join_pairs
            .iter()
            .map(|(their, our)| {
                format!(
                    "{}.{} = {}.{}",
                    inner_alias,
                    quote_ident(their),
                    outer_alias,
                    quote_ident(our)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        Ok(format!(
            "(SELECT coalesce(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} {} WHERE {}) sub) AS {}",
            cols.join(", "),
            qualified(&related.namespace, &related.name),
            inner_alias,
            join,
            quote_ident(nested_name),
        ))
    }

    /// Finds the relation named `nested_name` reachable from `rel` over a
    /// non-dangling foreign key in either direction. Returns the related
    /// relation and (their_column, our_column) join pairs.
    fn fk_join(
        &self,
        rel: &Relation,
        nested_name: &str,
    ) -> Result<(&'a Relation, Vec<(String, String)>), AppError> {
        // Outbound: we hold a foreign key to the nested relation.
        for fk in rel.foreign_keys() {
            let Some(target) = &fk.references else { continue };
            if target.relation == nested_name {
                let related = self
                    .model
                    .relation_by_oid(target.relation_oid)
                    .ok_or_else(|| AppError::UnknownRelation(nested_name.to_string()))?;
                let pairs = target
                    .columns
                    .iter()
                    .cloned()
                    .zip(fk.columns.iter().cloned())
                    .collect();
                return Ok((related, pairs));
            }
        }
        // Inbound: the nested relation holds a foreign key to us.
        if let Some(related) = self.model.relation(&rel.namespace, nested_name) {
            for fk in related.foreign_keys() {
                let Some(target) = &fk.references else { continue };
                if target.relation_oid == rel.oid {
                    let pairs = fk
                        .columns
                        .iter()
                        .cloned()
                        .zip(target.columns.iter().cloned())
                        .collect();
                    return Ok((related, pairs));
                }
            }
        }
        Err(AppError::UnknownRelation(nested_name.to_string()))
    }

    fn key_condition(
        &self,
        rel: &Relation,
        key: &Map<String, Value>,
        buf: &mut ParamBuf,
    ) -> Result<String, AppError> {
        let mut parts = Vec::with_capacity(key.len());
        for (name, value) in key {
            let attr = rel
                .attribute(name)
                .ok_or_else(|| AppError::UnknownField(name.clone()))?;
            let encoded = self.encode_field(name, value, attr.type_oid)?;
            parts.push(format!("{} = {}", quote_ident(name), buf.push(encoded)));
        }
        Ok(parts.join(" AND "))
    }

    /// Styled RETURNING list plus matching output columns.
    fn returning_list(&self, rel: &Relation) -> (String, Vec<OutputColumn>) {
        let mut parts = Vec::with_capacity(rel.attributes.len());
        let mut columns = Vec::with_capacity(rel.attributes.len());
        for attr in &rel.attributes {
            parts.push(self.select_expr(None, &attr.name, attr.type_oid));
            columns.push(OutputColumn {
                name: attr.name.clone(),
                kind: OutputKind::Typed(attr.type_oid),
            });
        }
        (parts.join(", "), columns)
    }

    fn select_expr(&self, alias: Option<&str>, name: &str, type_oid: u32) -> String {
        let col = match alias {
            Some(a) => format!("{}.{}", a, quote_ident(name)),
            None => quote_ident(name),
        };
        match self.registry.select_style(type_oid) {
            SelectStyle::Plain => col,
            SelectStyle::CastText => format!("{}::text", col),
            SelectStyle::ToJson => format!("to_json({}) AS {}", col, quote_ident(name)),
        }
    }

    /// Registry encode with user-facing error mapping: a value that does not
    /// fit the column's type is a validation problem, not a server fault.
    fn encode_field(
        &self,
        field: &str,
        value: &Value,
        type_oid: u32,
    ) -> Result<BoundLiteral, AppError> {
        self.registry.encode(value, type_oid).map_err(|e| match e {
            AppError::Encode { reason, .. } => {
                AppError::BadRequest(format!("field '{}': {}", field, reason))
            }
            other => other,
        })
    }
}

/// The strict key rule: the provided column set must equal the primary key
/// set or exactly one unique constraint's set. Guarantees at most one
/// affected row for update/delete.
pub fn check_key_shape(rel: &Relation, key: &Map<String, Value>) -> Result<(), AppError> {
    let provided: HashSet<&str> = key.keys().map(|k| k.as_str()).collect();
    let mismatch = || AppError::KeyShapeMismatch {
        provided: key.keys().cloned().collect(),
    };
    if provided.is_empty() {
        return Err(mismatch());
    }
    if let Some(pk) = rel.primary_key() {
        if pk.columns.iter().map(|c| c.as_str()).collect::<HashSet<_>>() == provided {
            return Ok(());
        }
    }
    for unique in rel.unique_keys() {
        if unique
            .columns
            .iter()
            .map(|c| c.as_str())
            .collect::<HashSet<_>>()
            == provided
        {
            return Ok(());
        }
    }
    Err(mismatch())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures;
    use serde_json::json;

    struct Ctx {
        model: SchemaModel,
        registry: TypeRegistry,
    }

    impl Ctx {
        fn new() -> Self {
            let model = fixtures::test_model();
            let registry = TypeRegistry::from_model(&model);
            Ctx { model, registry }
        }

        fn compiler(&self) -> QueryCompiler<'_> {
            QueryCompiler {
                model: &self.model,
                registry: &self.registry,
                default_limit: 100,
                max_limit: 10_000,
            }
        }
    }

    fn filter(v: Value) -> FilterDocument {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn query_parameterizes_every_literal() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "age", "operator": "gt", "value": 27},
            "pagination": {"limit": 10, "offset": 0}
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();

        assert!(!stmt.sql.contains("27"), "literal leaked: {}", stmt.sql);
        assert!(stmt.sql.contains(r#"main."age" > $1::int4"#));
        assert!(stmt.sql.contains("LIMIT $2 OFFSET $3"));
        assert_eq!(
            stmt.args,
            vec![
                BoundLiteral::Int {
                    value: 27,
                    cast: Some("int4")
                },
                BoundLiteral::int(10),
                BoundLiteral::int(0)
            ]
        );
        assert!(stmt.sql.contains(r#"count(*) OVER () AS "__total_count""#));
        assert!(stmt.sql.contains(r#"ORDER BY main."id""#));
    }

    #[test]
    fn default_limit_applies_when_absent() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let stmt = ctx
            .compiler()
            .compile_query(rel, &FilterDocument::default())
            .unwrap();
        assert!(stmt.args.contains(&BoundLiteral::int(100)));
    }

    #[test]
    fn limit_over_max_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({"pagination": {"limit": 20000}}));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(
            err,
            AppError::LimitExceeded {
                requested: 20000,
                ..
            }
        ));
    }

    #[test]
    fn unknown_field_in_where_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "nope", "operator": "eq", "value": 1}
        }));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(err, AppError::UnknownField(f) if f == "nope"));
    }

    #[test]
    fn like_on_integer_is_a_type_mismatch() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "age", "operator": "like", "value": "3%"}
        }));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(err, AppError::OperatorTypeMismatch { .. }));
    }

    #[test]
    fn in_requires_an_array() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "id", "operator": "in", "value": 3}
        }));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(err, AppError::OperatorTypeMismatch { .. }));

        let doc = filter(json!({
            "where": {"type": "comparison", "field": "id", "operator": "in", "value": [1, 2]}
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        assert!(stmt.sql.contains(r#"main."id" IN ($1::int4, $2::int4)"#));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "id", "operator": "in", "value": []}
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        assert!(stmt.sql.contains("WHERE FALSE"));
    }

    #[test]
    fn logical_tree_nests_with_parentheses() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {
                "type": "logical", "operator": "or",
                "conditions": [
                    {"type": "comparison", "field": "age", "operator": "lt", "value": 18},
                    {"type": "logical", "operator": "not", "conditions": [
                        {"type": "comparison", "field": "name", "operator": "is_null"}
                    ]}
                ]
            }
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        assert!(stmt
            .sql
            .contains(r#"(main."age" < $1::int4 OR NOT (main."name" IS NULL))"#));
    }

    #[test]
    fn is_null_rejects_a_value() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "where": {"type": "comparison", "field": "name", "operator": "is_null", "value": 1}
        }));
        assert!(ctx.compiler().compile_query(rel, &doc).is_err());
    }

    #[test]
    fn select_restricts_and_styles_columns() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "orders").unwrap();
        let doc = filter(json!({"select": {"fields": ["id", "total"]}}));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        // numeric selects as ::text so the wire value decodes losslessly
        assert!(stmt.sql.contains(r#"main."total"::text"#));
        assert_eq!(stmt.columns[0].name, "id");
        assert_eq!(stmt.columns[1].name, "total");
    }

    #[test]
    fn nested_select_joins_over_inbound_fk() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "select": {"fields": ["id"], "orders": {"fields": ["id", "total"]}}
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        assert!(stmt.sql.contains("json_agg(row_to_json(sub))"));
        assert!(stmt.sql.contains(r#"t1."user_id" = main."id""#));
        assert!(stmt
            .columns
            .iter()
            .any(|c| c.name == "orders" && c.kind == OutputKind::Json));
    }

    #[test]
    fn nested_select_joins_over_outbound_fk() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "orders").unwrap();
        let doc = filter(json!({
            "select": {"fields": ["id"], "users": {"fields": ["name"]}}
        }));
        let stmt = ctx.compiler().compile_query(rel, &doc).unwrap();
        assert!(stmt.sql.contains(r#"t1."id" = main."user_id""#));
    }

    #[test]
    fn nested_select_of_unreachable_relation_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let doc = filter(json!({
            "select": {"fields": ["id"], "user_names": {"fields": ["name"]}}
        }));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(err, AppError::UnknownRelation(r) if r == "user_names"));
    }

    #[test]
    fn dangling_fk_is_not_reachable() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "orders").unwrap();
        let doc = filter(json!({
            "select": {"fields": ["id"], "_hidden": {"fields": ["id"]}}
        }));
        let err = ctx.compiler().compile_query(rel, &doc).unwrap_err();
        assert!(matches!(err, AppError::UnknownRelation(_)));
    }

    #[test]
    fn insert_compiles_multi_row_values() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let row1: Map<String, Value> =
            serde_json::from_value(json!({"id": 3, "name": "Carol", "age": 40})).unwrap();
        let row2: Map<String, Value> =
            serde_json::from_value(json!({"id": 4, "name": "Dan", "age": 22})).unwrap();
        let stmt = ctx.compiler().compile_insert(rel, &[&row1, &row2]).unwrap();

        assert!(stmt.sql.starts_with(r#"INSERT INTO "public"."users""#));
        assert!(stmt.sql.contains("RETURNING"));
        assert_eq!(stmt.args.len(), 6);
        assert!(!stmt.sql.contains("Carol"));
    }

    #[test]
    fn insert_missing_required_field_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let row: Map<String, Value> = serde_json::from_value(json!({"name": "NoId"})).unwrap();
        let err = ctx.compiler().compile_insert(rel, &[&row]).unwrap_err();
        assert!(matches!(err, AppError::MissingField(f) if f == "id"));
    }

    #[test]
    fn insert_with_defaulted_identity_may_omit_pk() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "orders").unwrap();
        let row: Map<String, Value> =
            serde_json::from_value(json!({"user_id": 1, "total": "12.50"})).unwrap();
        assert!(ctx.compiler().compile_insert(rel, &[&row]).is_ok());
    }

    #[test]
    fn insert_rejects_generated_column() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "orders").unwrap();
        let row: Map<String, Value> =
            serde_json::from_value(json!({"user_id": 1, "total_cents": 100})).unwrap();
        let err = ctx.compiler().compile_insert(rel, &[&row]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn insert_unknown_column_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let row: Map<String, Value> =
            serde_json::from_value(json!({"id": 1, "nickname": "Al"})).unwrap();
        let err = ctx.compiler().compile_insert(rel, &[&row]).unwrap_err();
        assert!(matches!(err, AppError::UnknownField(f) if f == "nickname"));
    }

    #[test]
    fn update_by_primary_key_compiles() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let key: Map<String, Value> = serde_json::from_value(json!({"id": 3})).unwrap();
        let patch: Map<String, Value> = serde_json::from_value(json!({"age": 41})).unwrap();
        let stmt = ctx.compiler().compile_update(rel, &key, &patch).unwrap();
        assert!(stmt.sql.contains(r#"SET "age" = $1::int4"#));
        assert!(stmt.sql.contains(r#"WHERE "id" = $2::int4"#));
    }

    #[test]
    fn update_by_unique_constraint_compiles() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let key: Map<String, Value> = serde_json::from_value(json!({"email": "a@b.c"})).unwrap();
        let patch: Map<String, Value> = serde_json::from_value(json!({"age": 41})).unwrap();
        assert!(ctx.compiler().compile_update(rel, &key, &patch).is_ok());
    }

    #[test]
    fn update_by_non_key_column_fails_shape_check() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let key: Map<String, Value> = serde_json::from_value(json!({"name": "Carol"})).unwrap();
        let patch: Map<String, Value> = serde_json::from_value(json!({"age": 42})).unwrap();
        let err = ctx.compiler().compile_update(rel, &key, &patch).unwrap_err();
        assert!(matches!(err, AppError::KeyShapeMismatch { .. }));
    }

    #[test]
    fn key_superset_and_subset_both_fail() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();

        let superset: Map<String, Value> =
            serde_json::from_value(json!({"id": 1, "email": "a@b.c"})).unwrap();
        assert!(check_key_shape(rel, &superset).is_err());

        let empty: Map<String, Value> = Map::new();
        assert!(check_key_shape(rel, &empty).is_err());
    }

    #[test]
    fn delete_compiles_without_returning() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let key: Map<String, Value> = serde_json::from_value(json!({"id": 2})).unwrap();
        let stmt = ctx.compiler().compile_delete(rel, &key).unwrap();
        assert_eq!(
            stmt.sql,
            r#"DELETE FROM "public"."users" WHERE "id" = $1::int4"#
        );
        assert!(stmt.columns.is_empty());
    }

    #[test]
    fn empty_update_patch_fails() {
        let ctx = Ctx::new();
        let rel = ctx.model.relation("public", "users").unwrap();
        let key: Map<String, Value> = serde_json::from_value(json!({"id": 3})).unwrap();
        let patch: Map<String, Value> = Map::new();
        assert!(ctx.compiler().compile_update(rel, &key, &patch).is_err());
    }

    #[test]
    fn call_binds_arguments_by_name() {
        let ctx = Ctx::new();
        let callable = ctx.model.callable("public", "add_one").unwrap();
        let kwargs: Map<String, Value> = serde_json::from_value(json!({"x": 41})).unwrap();
        let call = ctx.compiler().compile_call(callable, &kwargs).unwrap();
        assert_eq!(
            call.sql,
            r#"SELECT "public"."add_one"("x" => $1::int4) AS result"#
        );
        assert_eq!(call.shape, CallShape::Scalar { type_oid: 23 });
    }

    #[test]
    fn call_missing_required_argument_fails() {
        let ctx = Ctx::new();
        let callable = ctx.model.callable("public", "add_one").unwrap();
        let kwargs = Map::new();
        let err = ctx.compiler().compile_call(callable, &kwargs).unwrap_err();
        assert!(matches!(err, AppError::MissingArgument(a) if a == "x"));
    }

    #[test]
    fn call_defaulted_argument_may_be_skipped() {
        let ctx = Ctx::new();
        let callable = ctx.model.callable("public", "do_cleanup").unwrap();
        let kwargs: Map<String, Value> =
            serde_json::from_value(json!({"reason": "stale"})).unwrap();
        let call = ctx.compiler().compile_call(callable, &kwargs).unwrap();
        assert!(call.sql.starts_with(r#"CALL "public"."do_cleanup""#));
        assert_eq!(call.shape, CallShape::Procedure);
    }

    #[test]
    fn call_unknown_argument_fails() {
        let ctx = Ctx::new();
        let callable = ctx.model.callable("public", "add_one").unwrap();
        let kwargs: Map<String, Value> = serde_json::from_value(json!({"x": 1, "y": 2})).unwrap();
        assert!(ctx.compiler().compile_call(callable, &kwargs).is_err());
    }

    #[test]
    fn set_returning_call_wraps_rows_as_json() {
        let ctx = Ctx::new();
        let callable = ctx.model.callable("public", "list_users").unwrap();
        let call = ctx.compiler().compile_call(callable, &Map::new()).unwrap();
        assert_eq!(
            call.sql,
            r#"SELECT to_json(t) AS result FROM "public"."list_users"() t"#
        );
        assert_eq!(call.shape, CallShape::Rows);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("simple"), "\"simple\"");
        assert_eq!(quote_ident("wei\"rd"), "\"wei\"\"rd\"");
    }
}
