//! Bound literals: every request value travels as one of these, never as
//! SQL text.
//!
//! A literal carries both its wire value and the cast the compiler must
//! emit so the value reaches the column's type: scalars bind natively,
//! while every type with textual input syntax (numeric, timestamps, enums,
//! domains, arrays) ships as text plus a server-side cast chosen by the
//! type registry. Placeholder rendering lives here so the cast can never
//! drift away from its value.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum BoundLiteral {
    /// NULL tagged with the column's type so the parameter stays typed.
    Null { cast: String },
    Bool(bool),
    /// Integers widen to int8 on the wire; the cast narrows back to the
    /// column width.
    Int {
        value: i64,
        cast: Option<&'static str>,
    },
    Float {
        value: f64,
        cast: Option<&'static str>,
    },
    /// Text-shipped values: text columns (no cast) and every type whose
    /// input syntax is textual.
    Text { value: String, cast: Option<String> },
    Uuid(uuid::Uuid),
    /// JSON document, binary on the wire; `cast` converts for `json`
    /// columns.
    Json {
        value: Value,
        cast: Option<&'static str>,
    },
}

impl BoundLiteral {
    pub fn text(value: impl Into<String>) -> Self {
        BoundLiteral::Text {
            value: value.into(),
            cast: None,
        }
    }

    pub fn text_as(value: impl Into<String>, cast: impl Into<String>) -> Self {
        BoundLiteral::Text {
            value: value.into(),
            cast: Some(cast.into()),
        }
    }

    pub fn int(value: i64) -> Self {
        BoundLiteral::Int { value, cast: None }
    }

    pub fn cast(&self) -> Option<&str> {
        match self {
            BoundLiteral::Null { cast } => Some(cast),
            BoundLiteral::Int { cast, .. } => cast.as_deref(),
            BoundLiteral::Float { cast, .. } => cast.as_deref(),
            BoundLiteral::Text { cast, .. } => cast.as_deref(),
            BoundLiteral::Json { cast, .. } => cast.as_deref(),
            BoundLiteral::Bool(_) | BoundLiteral::Uuid(_) => None,
        }
    }

    /// The placeholder for this literal at position `n`, cast included:
    /// `$3`, `$3::numeric`, `$3::public.mood`.
    pub fn placeholder(&self, n: usize) -> String {
        match self.cast() {
            Some(cast) => format!("${}::{}", n, cast),
            None => format!("${}", n),
        }
    }

    /// The wire type this literal binds as. Reported per value through
    /// [`Encode::produces`]; the blanket [`sqlx::Type`] impl is only the
    /// fallback for nulls.
    fn wire_type(&self) -> PgTypeInfo {
        PgTypeInfo::with_name(match self {
            BoundLiteral::Null { .. } => "TEXT",
            BoundLiteral::Bool(_) => "BOOL",
            BoundLiteral::Int { .. } => "INT8",
            BoundLiteral::Float { .. } => "FLOAT8",
            BoundLiteral::Text { .. } => "TEXT",
            BoundLiteral::Uuid(_) => "UUID",
            BoundLiteral::Json { .. } => "JSONB",
        })
    }
}

impl<'q> Encode<'q, Postgres> for BoundLiteral {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            BoundLiteral::Null { .. } => {
                <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?
            }
            BoundLiteral::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            BoundLiteral::Int { value, .. } => {
                <i64 as Encode<Postgres>>::encode_by_ref(value, buf)?
            }
            BoundLiteral::Float { value, .. } => {
                <f64 as Encode<Postgres>>::encode_by_ref(value, buf)?
            }
            BoundLiteral::Text { value, .. } => {
                let s: &str = value.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s, buf)?
            }
            BoundLiteral::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf)?,
            BoundLiteral::Json { value, .. } => {
                <Value as Encode<Postgres>>::encode_by_ref(value, buf)?
            }
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.wire_type())
    }
}

impl sqlx::Type<Postgres> for BoundLiteral {
    fn type_info() -> PgTypeInfo {
        // Fallback only; produces() reports the real type per value.
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_render_their_cast() {
        assert_eq!(BoundLiteral::int(10).placeholder(2), "$2");
        assert_eq!(
            BoundLiteral::Int {
                value: 27,
                cast: Some("int4")
            }
            .placeholder(1),
            "$1::int4"
        );
        assert_eq!(
            BoundLiteral::text_as("12.50", "numeric").placeholder(3),
            "$3::numeric"
        );
        assert_eq!(BoundLiteral::text("Alice").placeholder(4), "$4");
        assert_eq!(
            BoundLiteral::Null {
                cast: "int4".into()
            }
            .placeholder(1),
            "$1::int4"
        );
    }

    #[test]
    fn native_scalars_carry_no_cast() {
        assert_eq!(BoundLiteral::Bool(true).cast(), None);
        let u = uuid::Uuid::nil();
        assert_eq!(BoundLiteral::Uuid(u).cast(), None);
    }

    #[test]
    fn wire_types_follow_the_variant() {
        assert_eq!(
            BoundLiteral::Bool(true).wire_type(),
            PgTypeInfo::with_name("BOOL")
        );
        assert_eq!(
            BoundLiteral::int(1).wire_type(),
            PgTypeInfo::with_name("INT8")
        );
        assert_eq!(
            BoundLiteral::Uuid(uuid::Uuid::nil()).wire_type(),
            PgTypeInfo::with_name("UUID")
        );
        assert_eq!(
            BoundLiteral::Json {
                value: serde_json::json!({}),
                cast: None
            }
            .wire_type(),
            PgTypeInfo::with_name("JSONB")
        );
    }
}
