//! Type registry: maps type OIDs to semantic descriptors and owns the
//! decode/encode boundary between PostgreSQL wire values and JSON.
//!
//! Rebuilt from every schema snapshot so user-defined enums, domains and
//! composites are always current.

use crate::error::AppError;
use crate::introspection::SchemaModel;
use crate::sql::quote_ident;
use crate::sql::BoundLiteral;
use serde_json::{Number, Value};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeCategory {
    Boolean,
    /// Width in bytes: 2, 4 or 8.
    Integer(u8),
    /// Width in bytes: 4 or 8.
    Floating(u8),
    Numeric,
    Text,
    Bytea,
    Timestamp { tz: bool },
    Date,
    Time { tz: bool },
    Interval,
    Uuid,
    Json,
    Jsonb,
    Array { element: u32 },
    Enum { labels: Vec<String> },
    Composite { fields: Vec<(String, u32)> },
    Domain { base: u32 },
    Range { element: u32 },
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub oid: u32,
    pub name: String,
    /// Cast target in SQL text (schema-qualified for user types).
    pub sql_name: String,
    pub category: TypeCategory,
}

/// How a column must appear in a select list so its cell decodes cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStyle {
    Plain,
    CastText,
    ToJson,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_oid: HashMap<u32, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn from_model(model: &SchemaModel) -> Self {
        let mut by_oid = HashMap::with_capacity(model.types.len());
        for t in &model.types {
            let category = if t.typtype == "e" {
                TypeCategory::Enum {
                    labels: t.enum_labels.clone(),
                }
            } else if t.typtype == "d" {
                TypeCategory::Domain { base: t.base_oid }
            } else if t.typtype == "r" {
                TypeCategory::Range { element: t.elem_oid }
            } else if t.typtype == "c" || t.class_oid != 0 {
                TypeCategory::Composite {
                    fields: model
                        .composite_fields(t.class_oid)
                        .map(|f| f.to_vec())
                        .unwrap_or_default(),
                }
            } else if t.category == "A" && t.elem_oid != 0 {
                TypeCategory::Array { element: t.elem_oid }
            } else {
                base_category(t.oid, &t.name)
            };

            let sql_name = if t.namespace == "pg_catalog" {
                t.name.clone()
            } else {
                format!("{}.{}", quote_ident(&t.namespace), quote_ident(&t.name))
            };

            by_oid.insert(
                t.oid,
                TypeDescriptor {
                    oid: t.oid,
                    name: t.name.clone(),
                    sql_name,
                    category,
                },
            );
        }
        TypeRegistry { by_oid }
    }

    pub fn get(&self, oid: u32) -> Option<&TypeDescriptor> {
        self.by_oid.get(&oid)
    }

    /// Total: unknown OIDs produce an `Unknown` descriptor carrying the raw
    /// oid as its name.
    pub fn describe(&self, oid: u32) -> TypeDescriptor {
        self.by_oid.get(&oid).cloned().unwrap_or(TypeDescriptor {
            oid,
            name: format!("oid:{}", oid),
            sql_name: "text".into(),
            category: TypeCategory::Unknown,
        })
    }

    fn category(&self, oid: u32) -> TypeCategory {
        self.by_oid
            .get(&oid)
            .map(|d| d.category.clone())
            .unwrap_or(TypeCategory::Unknown)
    }

    /// Select-list treatment for a column of this type. Exotic categories
    /// are cast so the wire value is always one sqlx knows how to read.
    pub fn select_style(&self, oid: u32) -> SelectStyle {
        match self.category(oid) {
            TypeCategory::Boolean
            | TypeCategory::Integer(_)
            | TypeCategory::Floating(_)
            | TypeCategory::Text
            | TypeCategory::Bytea
            | TypeCategory::Timestamp { .. }
            | TypeCategory::Date
            | TypeCategory::Uuid
            | TypeCategory::Json
            | TypeCategory::Jsonb => SelectStyle::Plain,
            TypeCategory::Time { tz } => {
                if tz {
                    SelectStyle::CastText
                } else {
                    SelectStyle::Plain
                }
            }
            TypeCategory::Numeric
            | TypeCategory::Interval
            | TypeCategory::Enum { .. }
            | TypeCategory::Unknown => SelectStyle::CastText,
            TypeCategory::Array { .. }
            | TypeCategory::Composite { .. }
            | TypeCategory::Range { .. } => SelectStyle::ToJson,
            TypeCategory::Domain { base } => self.select_style(base),
        }
    }

    /// Cast target for a bound placeholder of this type.
    pub fn cast_name(&self, oid: u32) -> String {
        match self.category(oid) {
            TypeCategory::Array { element } => format!("{}[]", self.cast_name(element)),
            TypeCategory::Domain { base } => self.cast_name(base),
            _ => self.describe(oid).sql_name,
        }
    }

    /// Decodes one cell of a fetched row into JSON. The select style above
    /// guarantees the wire type matches the category.
    pub fn decode(&self, row: &PgRow, column: &str, oid: u32) -> Result<Value, AppError> {
        let fail = |e: sqlx::Error| AppError::Decode {
            oid,
            reason: format!("column '{}': {}", column, e),
        };
        let value = match self.category(oid) {
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(column)
                .map_err(fail)?
                .map(Value::Bool),
            TypeCategory::Integer(2) => row
                .try_get::<Option<i16>, _>(column)
                .map_err(fail)?
                .map(|n| Value::Number(n.into())),
            TypeCategory::Integer(8) => row
                .try_get::<Option<i64>, _>(column)
                .map_err(fail)?
                .map(|n| Value::Number(n.into())),
            TypeCategory::Integer(_) => row
                .try_get::<Option<i32>, _>(column)
                .map_err(fail)?
                .map(|n| Value::Number(n.into())),
            TypeCategory::Floating(4) => row
                .try_get::<Option<f32>, _>(column)
                .map_err(fail)?
                .and_then(|n| Number::from_f64(n as f64).map(Value::Number)),
            TypeCategory::Floating(_) => row
                .try_get::<Option<f64>, _>(column)
                .map_err(fail)?
                .and_then(|n| Number::from_f64(n).map(Value::Number)),
            TypeCategory::Numeric => row
                .try_get::<Option<String>, _>(column)
                .map_err(fail)?
                .map(|s| match s.parse::<f64>().ok().and_then(Number::from_f64) {
                    Some(n) => Value::Number(n),
                    None => Value::String(s),
                }),
            TypeCategory::Text
            | TypeCategory::Interval
            | TypeCategory::Enum { .. }
            | TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(column)
                .map_err(fail)?
                .map(Value::String),
            TypeCategory::Bytea => row
                .try_get::<Option<Vec<u8>>, _>(column)
                .map_err(fail)?
                .map(|b| {
                    let mut s = String::with_capacity(2 + b.len() * 2);
                    s.push_str("\\x");
                    for byte in &b {
                        s.push_str(&format!("{:02x}", byte));
                    }
                    Value::String(s)
                }),
            TypeCategory::Timestamp { tz: true } => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column)
                .map_err(fail)?
                .map(|d| Value::String(d.to_rfc3339())),
            TypeCategory::Timestamp { tz: false } => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(column)
                .map_err(fail)?
                .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            TypeCategory::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(column)
                .map_err(fail)?
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            TypeCategory::Time { tz: false } => row
                .try_get::<Option<chrono::NaiveTime>, _>(column)
                .map_err(fail)?
                .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
            TypeCategory::Time { tz: true } => row
                .try_get::<Option<String>, _>(column)
                .map_err(fail)?
                .map(Value::String),
            TypeCategory::Uuid => row
                .try_get::<Option<uuid::Uuid>, _>(column)
                .map_err(fail)?
                .map(|u| Value::String(u.to_string())),
            TypeCategory::Json
            | TypeCategory::Jsonb
            | TypeCategory::Array { .. }
            | TypeCategory::Composite { .. }
            | TypeCategory::Range { .. } => {
                row.try_get::<Option<Value>, _>(column).map_err(fail)?
            }
            TypeCategory::Domain { base } => return self.decode(row, column, base),
        };
        Ok(value.unwrap_or(Value::Null))
    }

    /// Encodes a JSON literal into a bound literal carrying the cast needed
    /// to reach the target type. Out-of-domain values fail.
    pub fn encode(&self, value: &Value, oid: u32) -> Result<BoundLiteral, AppError> {
        let fail = |reason: String| AppError::Encode { oid, reason };

        if value.is_null() {
            return Ok(BoundLiteral::Null {
                cast: self.cast_name(oid),
            });
        }

        let literal = match self.category(oid) {
            TypeCategory::Boolean => match value {
                Value::Bool(b) => BoundLiteral::Bool(*b),
                _ => return Err(fail("expected boolean".into())),
            },
            TypeCategory::Integer(width) => match value.as_i64() {
                Some(n) => BoundLiteral::Int {
                    value: n,
                    cast: Some(match width {
                        2 => "int2",
                        8 => "int8",
                        _ => "int4",
                    }),
                },
                None => return Err(fail("expected integer".into())),
            },
            TypeCategory::Floating(width) => match value.as_f64() {
                Some(n) => BoundLiteral::Float {
                    value: n,
                    cast: Some(if width == 4 { "float4" } else { "float8" }),
                },
                None => return Err(fail("expected number".into())),
            },
            TypeCategory::Numeric => match value {
                Value::Number(n) => BoundLiteral::text_as(n.to_string(), "numeric"),
                Value::String(s) => BoundLiteral::text_as(s.clone(), "numeric"),
                _ => return Err(fail("expected number".into())),
            },
            TypeCategory::Text => match value {
                Value::String(s) => BoundLiteral::text(s.clone()),
                _ => return Err(fail("expected string".into())),
            },
            TypeCategory::Bytea => match value {
                Value::String(s) => BoundLiteral::text_as(s.clone(), "bytea"),
                _ => return Err(fail("expected hex string".into())),
            },
            TypeCategory::Timestamp { tz } => self.string_literal(
                value,
                if tz { "timestamptz" } else { "timestamp" },
                oid,
            )?,
            TypeCategory::Date => self.string_literal(value, "date", oid)?,
            TypeCategory::Time { tz } => {
                self.string_literal(value, if tz { "timetz" } else { "time" }, oid)?
            }
            TypeCategory::Interval => self.string_literal(value, "interval", oid)?,
            TypeCategory::Uuid => match value.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok())
            {
                Some(u) => BoundLiteral::Uuid(u),
                None => return Err(fail("expected uuid string".into())),
            },
            TypeCategory::Json => BoundLiteral::Json {
                value: value.clone(),
                cast: Some("json"),
            },
            TypeCategory::Jsonb => BoundLiteral::Json {
                value: value.clone(),
                cast: None,
            },
            TypeCategory::Enum { labels } => match value {
                Value::String(s) if labels.iter().any(|l| l == s) => {
                    BoundLiteral::text_as(s.clone(), self.describe(oid).sql_name)
                }
                Value::String(s) => {
                    return Err(fail(format!(
                        "'{}' is not a label of {}",
                        s,
                        self.describe(oid).name
                    )))
                }
                _ => return Err(fail("expected enum label".into())),
            },
            TypeCategory::Array { element } => match value {
                Value::Array(items) => {
                    BoundLiteral::text_as(array_literal(items, element)?, self.cast_name(oid))
                }
                _ => return Err(fail("expected array".into())),
            },
            TypeCategory::Composite { .. } => {
                return Err(fail("composite values cannot be bound".into()))
            }
            TypeCategory::Range { .. } => self.string_literal(value, &self.cast_name(oid), oid)?,
            TypeCategory::Domain { base } => self.encode(value, base)?,
            TypeCategory::Unknown => match value {
                Value::String(s) => BoundLiteral::text_as(s.clone(), self.describe(oid).sql_name),
                Value::Number(n) => {
                    BoundLiteral::text_as(n.to_string(), self.describe(oid).sql_name)
                }
                Value::Bool(b) => {
                    BoundLiteral::text_as(b.to_string(), self.describe(oid).sql_name)
                }
                _ => return Err(fail("unsupported value shape".into())),
            },
        };
        Ok(literal)
    }

    fn string_literal(
        &self,
        value: &Value,
        cast_to: &str,
        oid: u32,
    ) -> Result<BoundLiteral, AppError> {
        match value {
            Value::String(s) => Ok(BoundLiteral::text_as(s.clone(), cast_to)),
            _ => Err(AppError::Encode {
                oid,
                reason: format!("expected string for {}", cast_to),
            }),
        }
    }

    /// Parses a query-string literal (`?age=30`) by the column's category so
    /// equality filters compare with the right type.
    pub fn parse_query_literal(&self, raw: &str, oid: u32) -> Value {
        match self.category(oid) {
            TypeCategory::Integer(_) => raw
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            TypeCategory::Floating(_) | TypeCategory::Numeric => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(raw.to_string())),
            TypeCategory::Boolean => match raw {
                _ if raw.eq_ignore_ascii_case("true") => Value::Bool(true),
                _ if raw.eq_ignore_ascii_case("false") => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
            TypeCategory::Domain { base } => self.parse_query_literal(raw, base),
            _ => Value::String(raw.to_string()),
        }
    }
}

/// PostgreSQL array literal from JSON elements: `{1,2,3}` / `{"a","b"}`.
fn array_literal(items: &[Value], element: u32) -> Result<String, AppError> {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::String(s) => {
                out.push('"');
                out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                out.push('"');
            }
            Value::Array(inner) => out.push_str(&array_literal(inner, element)?),
            Value::Object(_) => {
                return Err(AppError::Encode {
                    oid: element,
                    reason: "objects cannot be array elements".into(),
                })
            }
        }
    }
    out.push('}');
    Ok(out)
}

fn base_category(oid: u32, name: &str) -> TypeCategory {
    match oid {
        16 => TypeCategory::Boolean,
        21 => TypeCategory::Integer(2),
        23 | 26 => TypeCategory::Integer(4),
        20 => TypeCategory::Integer(8),
        700 => TypeCategory::Floating(4),
        701 => TypeCategory::Floating(8),
        1700 => TypeCategory::Numeric,
        25 | 1043 | 1042 | 18 | 19 => TypeCategory::Text,
        17 => TypeCategory::Bytea,
        1114 => TypeCategory::Timestamp { tz: false },
        1184 => TypeCategory::Timestamp { tz: true },
        1082 => TypeCategory::Date,
        1083 => TypeCategory::Time { tz: false },
        1266 => TypeCategory::Time { tz: true },
        1186 => TypeCategory::Interval,
        2950 => TypeCategory::Uuid,
        114 => TypeCategory::Json,
        3802 => TypeCategory::Jsonb,
        _ => match name {
            "bool" => TypeCategory::Boolean,
            "int2" | "smallint" => TypeCategory::Integer(2),
            "int4" | "integer" => TypeCategory::Integer(4),
            "int8" | "bigint" => TypeCategory::Integer(8),
            "float4" | "real" => TypeCategory::Floating(4),
            "float8" | "double precision" => TypeCategory::Floating(8),
            "numeric" | "decimal" => TypeCategory::Numeric,
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => TypeCategory::Text,
            "bytea" => TypeCategory::Bytea,
            "timestamp" => TypeCategory::Timestamp { tz: false },
            "timestamptz" => TypeCategory::Timestamp { tz: true },
            "date" => TypeCategory::Date,
            "time" => TypeCategory::Time { tz: false },
            "timetz" => TypeCategory::Time { tz: true },
            "interval" => TypeCategory::Interval,
            "uuid" => TypeCategory::Uuid,
            "json" => TypeCategory::Json,
            "jsonb" => TypeCategory::Jsonb,
            _ => TypeCategory::Unknown,
        },
    }
}

/// True when the operator class for LIKE/ILIKE applies.
pub fn is_text_like(category: &TypeCategory) -> bool {
    matches!(
        category,
        TypeCategory::Text | TypeCategory::Enum { .. } | TypeCategory::Unknown
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures;

    fn registry() -> TypeRegistry {
        TypeRegistry::from_model(&fixtures::test_model())
    }

    #[test]
    fn describe_is_total() {
        let reg = registry();
        assert_eq!(reg.describe(23).category, TypeCategory::Integer(4));
        let unknown = reg.describe(999_999);
        assert_eq!(unknown.category, TypeCategory::Unknown);
        assert_eq!(unknown.name, "oid:999999");
    }

    #[test]
    fn user_types_classify_from_snapshot() {
        let reg = registry();
        assert!(matches!(
            reg.describe(70000).category,
            TypeCategory::Enum { .. }
        ));
        assert_eq!(reg.describe(80000).category, TypeCategory::Domain { base: 23 });
        assert_eq!(reg.describe(1007).category, TypeCategory::Array { element: 23 });
        let TypeCategory::Composite { fields } = reg.describe(60000).category else {
            panic!("expected composite");
        };
        assert_eq!(fields[0].0, "id");
    }

    #[test]
    fn select_styles_follow_category() {
        let reg = registry();
        assert_eq!(reg.select_style(23), SelectStyle::Plain);
        assert_eq!(reg.select_style(1700), SelectStyle::CastText);
        assert_eq!(reg.select_style(70000), SelectStyle::CastText);
        assert_eq!(reg.select_style(1007), SelectStyle::ToJson);
        // Domain follows its base.
        assert_eq!(reg.select_style(80000), SelectStyle::Plain);
    }

    #[test]
    fn encode_integer_and_text() {
        let reg = registry();
        let p = reg.encode(&serde_json::json!(30), 23).unwrap();
        assert_eq!(
            p,
            BoundLiteral::Int {
                value: 30,
                cast: Some("int4")
            }
        );
        assert_eq!(p.placeholder(1), "$1::int4");

        let p = reg.encode(&serde_json::json!("Alice"), 25).unwrap();
        assert_eq!(p, BoundLiteral::text("Alice"));
        assert_eq!(p.placeholder(2), "$2");
    }

    #[test]
    fn encode_rejects_out_of_domain_values() {
        let reg = registry();
        assert!(matches!(
            reg.encode(&serde_json::json!("thirty"), 23),
            Err(AppError::Encode { oid: 23, .. })
        ));
        assert!(matches!(
            reg.encode(&serde_json::json!("angry"), 70000),
            Err(AppError::Encode { .. })
        ));
    }

    #[test]
    fn enum_labels_validate_on_encode() {
        let reg = registry();
        let p = reg.encode(&serde_json::json!("happy"), 70000).unwrap();
        assert_eq!(p, BoundLiteral::text_as("happy", "public.mood"));
    }

    #[test]
    fn array_encodes_as_literal_with_element_cast() {
        let reg = registry();
        let p = reg.encode(&serde_json::json!([1, 2, 3]), 1007).unwrap();
        assert_eq!(p, BoundLiteral::text_as("{1,2,3}", "int4[]"));
    }

    #[test]
    fn array_literal_escapes_strings() {
        let lit = array_literal(
            &[
                serde_json::json!("plain"),
                serde_json::json!("wi\"th"),
                serde_json::Value::Null,
            ],
            25,
        )
        .unwrap();
        assert_eq!(lit, r#"{"plain","wi\"th",NULL}"#);
    }

    #[test]
    fn null_binds_with_cast() {
        let reg = registry();
        let p = reg.encode(&Value::Null, 23).unwrap();
        assert_eq!(
            p,
            BoundLiteral::Null {
                cast: "int4".into()
            }
        );
    }

    #[test]
    fn uuid_binds_natively_without_cast() {
        let reg = registry();
        let p = reg
            .encode(
                &serde_json::json!("00000000-0000-0000-0000-000000000000"),
                2950,
            )
            .unwrap();
        assert_eq!(p, BoundLiteral::Uuid(uuid::Uuid::nil()));
        assert_eq!(p.cast(), None);
    }

    #[test]
    fn query_literals_parse_by_category() {
        let reg = registry();
        assert_eq!(reg.parse_query_literal("30", 23), serde_json::json!(30));
        assert_eq!(
            reg.parse_query_literal("true", 16),
            serde_json::json!(true)
        );
        assert_eq!(
            reg.parse_query_literal("Alice", 25),
            serde_json::json!("Alice")
        );
        // Unparsable stays a string; the encoder rejects it later.
        assert_eq!(
            reg.parse_query_literal("abc", 23),
            serde_json::json!("abc")
        );
    }
}
