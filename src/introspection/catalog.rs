//! The composite catalog query and its raw row shapes.
//!
//! One statement reads every system catalog the model needs and folds the
//! result into a single JSON document, so the snapshot reflects one catalog
//! instant. The query runs inside a repeatable-read read-only transaction.

use crate::error::{AppError, IntrospectionErrorKind};
use serde::Deserialize;
use sqlx::PgPool;

/// Catalog rows as returned by [`CATALOG_QUERY`], before model assembly.
#[derive(Debug, Deserialize)]
pub struct RawCatalog {
    pub namespaces: Vec<RawNamespace>,
    pub classes: Vec<RawClass>,
    pub attributes: Vec<RawAttribute>,
    pub constraints: Vec<RawConstraint>,
    pub procs: Vec<RawProc>,
    pub types: Vec<RawType>,
    pub enums: Vec<RawEnum>,
    pub ranges: Vec<RawRange>,
    pub descriptions: Vec<RawDescription>,
    pub extension_owned: Vec<RawExtensionOwned>,
    pub current_user: String,
    pub pg_version: String,
}

#[derive(Debug, Deserialize)]
pub struct RawNamespace {
    pub oid: u32,
    pub nspname: String,
    pub owner: String,
    #[serde(default)]
    pub acl: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawClass {
    pub oid: u32,
    pub relname: String,
    pub relnamespace: u32,
    pub relkind: String,
    pub relispartition: bool,
    #[serde(default)]
    pub acl: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawAttribute {
    pub attrelid: u32,
    pub attname: String,
    pub attnum: i16,
    pub atttypid: u32,
    pub attnotnull: bool,
    pub atthasdef: bool,
    pub attisdropped: bool,
    pub attidentity: String,
    pub attgenerated: String,
}

#[derive(Debug, Deserialize)]
pub struct RawConstraint {
    pub oid: u32,
    pub conname: String,
    pub contype: String,
    pub conrelid: u32,
    pub confrelid: u32,
    #[serde(default)]
    pub conkey: Option<Vec<i16>>,
    #[serde(default)]
    pub confkey: Option<Vec<i16>>,
    pub condeferrable: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawProc {
    pub oid: u32,
    pub proname: String,
    pub pronamespace: u32,
    pub prokind: String,
    pub provolatile: String,
    pub proisstrict: bool,
    pub prosecdef: bool,
    pub proretset: bool,
    pub prorettype: u32,
    pub pronargs: i16,
    pub pronargdefaults: i16,
    #[serde(default)]
    pub proargtypes: Vec<u32>,
    #[serde(default)]
    pub proallargtypes: Option<Vec<u32>>,
    #[serde(default)]
    pub proargmodes: Option<Vec<String>>,
    #[serde(default)]
    pub proargnames: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawType {
    pub oid: u32,
    pub typname: String,
    pub namespace: String,
    pub typtype: String,
    pub typcategory: String,
    pub typelem: u32,
    pub typbasetype: u32,
    pub typrelid: u32,
    pub typnotnull: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawEnum {
    pub enumtypid: u32,
    pub enumsortorder: f32,
    pub enumlabel: String,
}

#[derive(Debug, Deserialize)]
pub struct RawRange {
    pub rngtypid: u32,
    pub rngsubtype: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawDescription {
    pub objoid: u32,
    pub catalog: String,
    pub objsubid: i32,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct RawExtensionOwned {
    pub catalog: String,
    pub objid: u32,
}

/// `$1` is the exposed namespace list (`text[]`). System namespaces and the
/// watch schema are filtered out regardless of the list. Types are read
/// from every namespace so attribute type references always resolve.
pub const CATALOG_QUERY: &str = r#"
with exposed as (
    select oid, nspname, nspowner, nspacl
    from pg_catalog.pg_namespace
    where nspname = any($1)
      and nspname <> 'information_schema'
      and nspname not like 'pg\_%'
      and nspname <> 'pghatch_watch'
),
classes as (
    select c.oid, c.relname, c.relnamespace, c.relkind, c.relispartition, c.relacl
    from pg_catalog.pg_class c
    where c.relnamespace in (select oid from exposed)
),
attributes as (
    select a.attrelid, a.attname, a.attnum, a.atttypid, a.attnotnull,
           a.atthasdef, a.attisdropped, a.attidentity, a.attgenerated
    from pg_catalog.pg_attribute a
    where a.attrelid in (select oid from classes)
      and a.attnum > 0
),
constraints as (
    select con.oid, con.conname, con.contype, con.conrelid, con.confrelid,
           con.conkey, con.confkey, con.condeferrable
    from pg_catalog.pg_constraint con
    where con.conrelid in (select oid from classes)
),
procs as (
    select p.oid, p.proname, p.pronamespace, p.prokind, p.provolatile,
           p.proisstrict, p.prosecdef, p.proretset, p.prorettype,
           p.pronargs, p.pronargdefaults,
           coalesce(string_to_array(p.proargtypes::text, ' ')::oid[], '{}') as proargtypes,
           p.proallargtypes, p.proargmodes::text[] as proargmodes, p.proargnames
    from pg_catalog.pg_proc p
    where p.pronamespace in (select oid from exposed)
      and p.prorettype operator(pg_catalog.<>) 2279
),
types as (
    select t.oid, t.typname, t.typnamespace::regnamespace::text as namespace,
           t.typtype, t.typcategory, t.typelem, t.typbasetype, t.typrelid,
           t.typnotnull
    from pg_catalog.pg_type t
    join pg_catalog.pg_namespace tn on tn.oid = t.typnamespace
    where tn.nspname <> 'pg_toast'
),
enums as (
    select e.enumtypid, e.enumsortorder, e.enumlabel
    from pg_catalog.pg_enum e
    where e.enumtypid in (select oid from types)
),
ranges as (
    select r.rngtypid, r.rngsubtype
    from pg_catalog.pg_range r
    where r.rngtypid in (select oid from types)
),
descriptions as (
    select d.objoid, d.classoid::regclass::text as catalog, d.objsubid, d.description
    from pg_catalog.pg_description d
    where (d.classoid = 'pg_catalog.pg_class'::regclass
               and d.objoid in (select oid from classes))
       or (d.classoid = 'pg_catalog.pg_proc'::regclass
               and d.objoid in (select oid from procs))
),
extension_owned as (
    select dep.classid::regclass::text as catalog, dep.objid
    from pg_catalog.pg_depend dep
    where dep.deptype = 'e'
      and dep.classid in ('pg_catalog.pg_class'::regclass, 'pg_catalog.pg_proc'::regclass)
)
select json_build_object(
    'namespaces',
    (select coalesce(json_agg(json_build_object(
         'oid', n.oid,
         'nspname', n.nspname,
         'owner', n.nspowner::regrole::text,
         'acl', n.nspacl::text[]
     ) order by n.nspname), '[]'::json) from exposed n),
    'classes',
    (select coalesce(json_agg(json_build_object(
         'oid', c.oid,
         'relname', c.relname,
         'relnamespace', c.relnamespace,
         'relkind', c.relkind,
         'relispartition', c.relispartition,
         'acl', c.relacl::text[]
     ) order by c.relnamespace, c.relname), '[]'::json) from classes c),
    'attributes',
    (select coalesce(json_agg(row_to_json(a) order by a.attrelid, a.attnum), '[]'::json)
     from attributes a),
    'constraints',
    (select coalesce(json_agg(row_to_json(con) order by con.conrelid, con.oid), '[]'::json)
     from constraints con),
    'procs',
    (select coalesce(json_agg(row_to_json(p) order by p.pronamespace, p.proname, p.oid), '[]'::json)
     from procs p),
    'types',
    (select coalesce(json_agg(row_to_json(t) order by t.oid), '[]'::json) from types t),
    'enums',
    (select coalesce(json_agg(row_to_json(e) order by e.enumtypid, e.enumsortorder), '[]'::json)
     from enums e),
    'ranges',
    (select coalesce(json_agg(row_to_json(r) order by r.rngtypid), '[]'::json) from ranges r),
    'descriptions',
    (select coalesce(json_agg(row_to_json(d)), '[]'::json) from descriptions d),
    'extension_owned',
    (select coalesce(json_agg(row_to_json(x)), '[]'::json) from extension_owned x),
    'current_user', current_user,
    'pg_version', version()
)::text
"#;

/// Runs the composite query and deserializes the raw catalog. All-or-nothing:
/// no partial result ever escapes.
pub async fn fetch_catalog(pool: &PgPool, schemas: &[String]) -> Result<RawCatalog, AppError> {
    let mut tx = pool.begin().await.map_err(|e| AppError::Introspection {
        kind: IntrospectionErrorKind::ConnectionLost,
        context: e.to_string(),
    })?;

    sqlx::query("set transaction isolation level repeatable read read only")
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Introspection {
            kind: IntrospectionErrorKind::QueryFailed,
            context: e.to_string(),
        })?;

    let schemas: Vec<String> = schemas.to_vec();
    let raw: String = sqlx::query_scalar(CATALOG_QUERY)
        .bind(&schemas)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let kind = match &e {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                    IntrospectionErrorKind::ConnectionLost
                }
                _ => IntrospectionErrorKind::QueryFailed,
            };
            AppError::Introspection {
                kind,
                context: e.to_string(),
            }
        })?;

    // Read-only; commit vs rollback is equivalent, commit returns the
    // connection cleanly.
    tx.commit().await.ok();

    serde_json::from_str(&raw).map_err(|e| AppError::Introspection {
        kind: IntrospectionErrorKind::DecodeFailed,
        context: e.to_string(),
    })
}
