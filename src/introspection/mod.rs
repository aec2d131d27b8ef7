//! Catalog introspection: one composite query reflected into an immutable
//! [`SchemaModel`] snapshot.
//!
//! A snapshot is a value: once built it is never mutated, and every
//! reference inside it (attribute types, foreign-key targets) resolves
//! within the same snapshot or is flagged dangling.

pub mod acl;
pub mod catalog;

use crate::config::GatewayConfig;
use crate::error::{AppError, IntrospectionErrorKind};
use acl::Privilege;
use catalog::RawCatalog;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

pub const VOID_OID: u32 = 2278;
pub const RECORD_OID: u32 = 2249;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Ordinary,
    View,
    MaterializedView,
    Foreign,
    Partitioned,
    PartitionChild,
}

impl RelationKind {
    fn from_catalog(relkind: &str, is_partition: bool) -> Option<Self> {
        if is_partition {
            return Some(RelationKind::PartitionChild);
        }
        match relkind {
            "r" => Some(RelationKind::Ordinary),
            "v" => Some(RelationKind::View),
            "m" => Some(RelationKind::MaterializedView),
            "f" => Some(RelationKind::Foreign),
            "p" => Some(RelationKind::Partitioned),
            _ => None,
        }
    }

    /// Whether INSERT/UPDATE/DELETE are allowed against this relation.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            RelationKind::Ordinary | RelationKind::Partitioned | RelationKind::PartitionChild
        )
    }

    /// Partition children stay in the model but get no endpoint; the parent
    /// lists transparently across partitions.
    pub fn is_mounted(self) -> bool {
        !matches!(self, RelationKind::PartitionChild)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    None,
    ByDefault,
    Always,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub ordinal: i16,
    pub name: String,
    pub type_oid: u32,
    pub not_null: bool,
    pub has_default: bool,
    pub generated: bool,
    pub identity: IdentityMode,
    pub comment: Option<String>,
}

impl Attribute {
    /// Generated and identity-always columns never accept client values.
    pub fn accepts_input(&self) -> bool {
        !self.generated && self.identity != IdentityMode::Always
    }

    /// Whether an insert may omit this column.
    pub fn omittable(&self) -> bool {
        !self.not_null
            || self.has_default
            || self.generated
            || self.identity != IdentityMode::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    Exclusion,
}

#[derive(Debug, Clone)]
pub struct ForeignRef {
    pub namespace: String,
    pub relation: String,
    pub relation_oid: u32,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    /// Foreign keys only; None when dangling.
    pub references: Option<ForeignRef>,
    /// True when the referenced relation is not part of this snapshot.
    pub dangling: bool,
    pub deferrable: bool,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub oid: u32,
    pub namespace: String,
    pub name: String,
    pub kind: RelationKind,
    pub attributes: Vec<Attribute>,
    pub constraints: Vec<Constraint>,
    pub privileges: Vec<Privilege>,
    pub comment: Option<String>,
}

impl Relation {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    /// Unique constraints in definition order.
    pub fn unique_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::Unique)
    }

    /// Resolved (non-dangling) foreign keys.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey && !c.dangling)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    In,
    Out,
    InOut,
    Variadic,
    Table,
}

impl ArgMode {
    fn from_catalog(mode: &str) -> Self {
        match mode {
            "o" => ArgMode::Out,
            "b" => ArgMode::InOut,
            "v" => ArgMode::Variadic,
            "t" => ArgMode::Table,
            _ => ArgMode::In,
        }
    }

    pub fn is_input(self) -> bool {
        matches!(self, ArgMode::In | ArgMode::InOut | ArgMode::Variadic)
    }
}

#[derive(Debug, Clone)]
pub struct CallableArg {
    pub name: String,
    /// False when the catalog declares no name and one was synthesized;
    /// such arguments bind positionally.
    pub named: bool,
    pub mode: ArgMode,
    pub type_oid: u32,
    pub has_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    Procedure,
    Aggregate,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnSignature {
    Void,
    Scalar { type_oid: u32 },
    Composite { type_oid: u32 },
    SetOf { type_oid: u32, composite: bool },
}

#[derive(Debug, Clone)]
pub struct Callable {
    pub oid: u32,
    pub namespace: String,
    pub name: String,
    pub kind: CallableKind,
    pub args: Vec<CallableArg>,
    pub returns: ReturnSignature,
    pub volatility: Volatility,
    pub strict: bool,
    pub security_definer: bool,
    pub comment: Option<String>,
}

impl Callable {
    pub fn input_args(&self) -> impl Iterator<Item = &CallableArg> {
        self.args.iter().filter(|a| a.mode.is_input())
    }

    /// Aggregates and window functions are modeled but not mounted.
    pub fn is_mounted(&self) -> bool {
        matches!(self.kind, CallableKind::Function | CallableKind::Procedure)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// One `pg_type` row, enum labels folded in. For range types `elem_oid`
/// carries the range subtype.
#[derive(Debug, Clone)]
pub struct TypeRow {
    pub oid: u32,
    pub name: String,
    pub namespace: String,
    pub typtype: String,
    pub category: String,
    pub elem_oid: u32,
    pub base_oid: u32,
    pub class_oid: u32,
    pub not_null: bool,
    pub enum_labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub owner: String,
    pub privileges: Vec<Privilege>,
}

/// Immutable snapshot of the introspected catalog.
#[derive(Debug)]
pub struct SchemaModel {
    pub namespaces: Vec<Namespace>,
    pub relations: Vec<Relation>,
    pub callables: Vec<Callable>,
    pub types: Vec<TypeRow>,
    pub current_user: String,
    pub pg_version: String,
    relation_index: HashMap<(String, String), usize>,
    callable_index: HashMap<(String, String), usize>,
    relation_by_oid: HashMap<u32, usize>,
    /// Row-type fields for composite decoding: class oid -> (name, type oid).
    composite_fields: HashMap<u32, Vec<(String, u32)>>,
}

impl SchemaModel {
    pub fn relation(&self, namespace: &str, name: &str) -> Option<&Relation> {
        self.relation_index
            .get(&(namespace.to_string(), name.to_string()))
            .map(|&i| &self.relations[i])
    }

    pub fn callable(&self, namespace: &str, name: &str) -> Option<&Callable> {
        self.callable_index
            .get(&(namespace.to_string(), name.to_string()))
            .map(|&i| &self.callables[i])
    }

    pub fn relation_by_oid(&self, oid: u32) -> Option<&Relation> {
        self.relation_by_oid.get(&oid).map(|&i| &self.relations[i])
    }

    pub fn composite_fields(&self, class_oid: u32) -> Option<&[(String, u32)]> {
        self.composite_fields.get(&class_oid).map(|v| v.as_slice())
    }

    /// Assembles a snapshot from raw catalog rows. All-or-nothing: any
    /// unresolved type reference fails the whole build.
    pub fn build(raw: RawCatalog, config: &GatewayConfig) -> Result<Self, AppError> {
        let ns_by_oid: HashMap<u32, &str> = raw
            .namespaces
            .iter()
            .map(|n| (n.oid, n.nspname.as_str()))
            .collect();

        let mut ext_classes = HashSet::new();
        let mut ext_procs = HashSet::new();
        for x in &raw.extension_owned {
            match x.catalog.as_str() {
                "pg_class" => {
                    ext_classes.insert(x.objid);
                }
                "pg_proc" => {
                    ext_procs.insert(x.objid);
                }
                _ => {}
            }
        }

        let mut attrs_by_class: HashMap<u32, Vec<&catalog::RawAttribute>> = HashMap::new();
        for a in &raw.attributes {
            if !a.attisdropped {
                attrs_by_class.entry(a.attrelid).or_default().push(a);
            }
        }
        for attrs in attrs_by_class.values_mut() {
            attrs.sort_by_key(|a| a.attnum);
        }

        let mut comments: HashMap<(&str, u32, i32), &str> = HashMap::new();
        for d in &raw.descriptions {
            comments.insert((d.catalog.as_str(), d.objoid, d.objsubid), &d.description);
        }

        // Row-type fields for every class, composite decoding included.
        let composite_fields: HashMap<u32, Vec<(String, u32)>> = attrs_by_class
            .iter()
            .map(|(&oid, attrs)| {
                (
                    oid,
                    attrs
                        .iter()
                        .map(|a| (a.attname.clone(), a.atttypid))
                        .collect(),
                )
            })
            .collect();

        let type_oids: HashSet<u32> = raw.types.iter().map(|t| t.oid).collect();

        // First pass: relations without constraints, so foreign keys can be
        // resolved against the final relation set.
        let mut relations: Vec<Relation> = Vec::new();
        for cls in &raw.classes {
            let Some(kind) = RelationKind::from_catalog(&cls.relkind, cls.relispartition) else {
                continue;
            };
            if ext_classes.contains(&cls.oid) || config.is_excluded(&cls.relname) {
                continue;
            }
            let Some(&namespace) = ns_by_oid.get(&cls.relnamespace) else {
                continue;
            };

            let attributes: Vec<Attribute> = attrs_by_class
                .get(&cls.oid)
                .map(|attrs| {
                    attrs
                        .iter()
                        .map(|a| Attribute {
                            ordinal: a.attnum,
                            name: a.attname.clone(),
                            type_oid: a.atttypid,
                            not_null: a.attnotnull,
                            has_default: a.atthasdef,
                            generated: a.attgenerated == "s",
                            identity: match a.attidentity.as_str() {
                                "a" => IdentityMode::Always,
                                "d" => IdentityMode::ByDefault,
                                _ => IdentityMode::None,
                            },
                            comment: comments
                                .get(&("pg_class", cls.oid, a.attnum as i32))
                                .map(|s| s.to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default();

            for a in &attributes {
                if !type_oids.contains(&a.type_oid) {
                    return Err(AppError::Introspection {
                        kind: IntrospectionErrorKind::DecodeFailed,
                        context: format!(
                            "attribute {}.{}.{} references unknown type oid {}",
                            namespace, cls.relname, a.name, a.type_oid
                        ),
                    });
                }
            }

            relations.push(Relation {
                oid: cls.oid,
                namespace: namespace.to_string(),
                name: cls.relname.clone(),
                kind,
                attributes,
                constraints: Vec::new(),
                privileges: cls.acl.as_deref().map(acl::parse_acl).unwrap_or_default(),
                comment: comments
                    .get(&("pg_class", cls.oid, 0))
                    .map(|s| s.to_string()),
            });
        }

        let rel_pos_by_oid: HashMap<u32, usize> =
            relations.iter().enumerate().map(|(i, r)| (r.oid, i)).collect();

        // Second pass: attach constraints. Raw rows arrive ordered by
        // (conrelid, oid), which preserves definition order per relation.
        let mut constraints_by_rel: HashMap<u32, Vec<Constraint>> = HashMap::new();
        for con in &raw.constraints {
            let Some(&rel_pos) = rel_pos_by_oid.get(&con.conrelid) else {
                continue;
            };
            let kind = match con.contype.as_str() {
                "p" => ConstraintKind::PrimaryKey,
                "u" => ConstraintKind::Unique,
                "f" => ConstraintKind::ForeignKey,
                "c" => ConstraintKind::Check,
                "x" => ConstraintKind::Exclusion,
                _ => continue,
            };

            let rel = &relations[rel_pos];
            let Some(columns) = resolve_columns(rel, con.conkey.as_deref()) else {
                continue;
            };

            let (references, dangling) = if kind == ConstraintKind::ForeignKey {
                match rel_pos_by_oid
                    .get(&con.confrelid)
                    .map(|&i| &relations[i])
                    .and_then(|target| {
                        resolve_columns(target, con.confkey.as_deref()).map(|cols| ForeignRef {
                            namespace: target.namespace.clone(),
                            relation: target.name.clone(),
                            relation_oid: target.oid,
                            columns: cols,
                        })
                    }) {
                    Some(r) => (Some(r), false),
                    None => (None, true),
                }
            } else {
                (None, false)
            };

            constraints_by_rel
                .entry(con.conrelid)
                .or_default()
                .push(Constraint {
                    name: con.conname.clone(),
                    kind,
                    columns,
                    references,
                    dangling,
                    deferrable: con.condeferrable,
                });
        }
        for rel in &mut relations {
            if let Some(cons) = constraints_by_rel.remove(&rel.oid) {
                rel.constraints = cons;
            }
        }

        let mut callables: Vec<Callable> = Vec::new();
        for proc in &raw.procs {
            let kind = match proc.prokind.as_str() {
                "f" => CallableKind::Function,
                "p" => CallableKind::Procedure,
                "a" => CallableKind::Aggregate,
                "w" => CallableKind::Window,
                _ => continue,
            };
            if ext_procs.contains(&proc.oid) || config.is_excluded(&proc.proname) {
                continue;
            }
            let Some(&namespace) = ns_by_oid.get(&proc.pronamespace) else {
                continue;
            };

            let args = build_args(proc);
            let composite = |oid: u32| {
                oid == RECORD_OID
                    || raw
                        .types
                        .iter()
                        .any(|t| t.oid == oid && (t.typtype == "c" || t.typrelid != 0))
            };
            let returns = if proc.prorettype == VOID_OID {
                ReturnSignature::Void
            } else if proc.proretset {
                ReturnSignature::SetOf {
                    type_oid: proc.prorettype,
                    composite: composite(proc.prorettype),
                }
            } else if composite(proc.prorettype) || proc.multiple_out_args() {
                ReturnSignature::Composite {
                    type_oid: proc.prorettype,
                }
            } else {
                ReturnSignature::Scalar {
                    type_oid: proc.prorettype,
                }
            };

            callables.push(Callable {
                oid: proc.oid,
                namespace: namespace.to_string(),
                name: proc.proname.clone(),
                kind,
                args,
                returns,
                volatility: match proc.provolatile.as_str() {
                    "i" => Volatility::Immutable,
                    "s" => Volatility::Stable,
                    _ => Volatility::Volatile,
                },
                strict: proc.proisstrict,
                security_definer: proc.prosecdef,
                comment: comments
                    .get(&("pg_proc", proc.oid, 0))
                    .map(|s| s.to_string()),
            });
        }

        let mut types: Vec<TypeRow> = raw
            .types
            .iter()
            .map(|t| TypeRow {
                oid: t.oid,
                name: t.typname.clone(),
                namespace: t.namespace.clone(),
                typtype: t.typtype.clone(),
                category: t.typcategory.clone(),
                elem_oid: t.typelem,
                base_oid: t.typbasetype,
                class_oid: t.typrelid,
                not_null: t.typnotnull,
                enum_labels: Vec::new(),
            })
            .collect();
        let type_pos: HashMap<u32, usize> =
            types.iter().enumerate().map(|(i, t)| (t.oid, i)).collect();
        for e in &raw.enums {
            if let Some(&i) = type_pos.get(&e.enumtypid) {
                types[i].enum_labels.push(e.enumlabel.clone());
            }
        }
        for r in &raw.ranges {
            if let Some(&i) = type_pos.get(&r.rngtypid) {
                types[i].elem_oid = r.rngsubtype;
            }
        }

        let namespaces = raw
            .namespaces
            .iter()
            .map(|n| Namespace {
                name: n.nspname.clone(),
                owner: n.owner.clone(),
                privileges: n.acl.as_deref().map(acl::parse_acl).unwrap_or_default(),
            })
            .collect();

        let relation_index = relations
            .iter()
            .enumerate()
            .map(|(i, r)| ((r.namespace.clone(), r.name.clone()), i))
            .collect();
        let callable_index = callables
            .iter()
            .enumerate()
            .map(|(i, c)| ((c.namespace.clone(), c.name.clone()), i))
            .collect();
        let relation_by_oid = relations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.oid, i))
            .collect();

        Ok(SchemaModel {
            namespaces,
            relations,
            callables,
            types,
            current_user: raw.current_user,
            pg_version: raw.pg_version,
            relation_index,
            callable_index,
            relation_by_oid,
            composite_fields,
        })
    }
}

fn resolve_columns(rel: &Relation, attnums: Option<&[i16]>) -> Option<Vec<String>> {
    let attnums = attnums?;
    let mut out = Vec::with_capacity(attnums.len());
    for &num in attnums {
        let attr = rel.attributes.iter().find(|a| a.ordinal == num)?;
        out.push(attr.name.clone());
    }
    Some(out)
}

fn build_args(proc: &catalog::RawProc) -> Vec<CallableArg> {
    // (name, was declared) — unnamed arguments get a synthesized name and
    // bind positionally.
    let named = |i: usize| {
        proc.proargnames
            .as_ref()
            .and_then(|names| names.get(i))
            .filter(|n| !n.is_empty())
            .map(|n| (n.clone(), true))
            .unwrap_or_else(|| (format!("arg_{}", i), false))
    };

    let args: Vec<(String, bool, ArgMode, u32)> = match (&proc.proallargtypes, &proc.proargmodes)
    {
        (Some(all_types), Some(modes)) => all_types
            .iter()
            .zip(modes.iter())
            .enumerate()
            .map(|(i, (&type_oid, mode))| {
                let (name, declared) = named(i);
                (name, declared, ArgMode::from_catalog(mode), type_oid)
            })
            .collect(),
        _ => proc
            .proargtypes
            .iter()
            .enumerate()
            .map(|(i, &type_oid)| {
                let (name, declared) = named(i);
                (name, declared, ArgMode::In, type_oid)
            })
            .collect(),
    };

    // Defaults cover the trailing input arguments.
    let input_count = args.iter().filter(|(_, _, m, _)| m.is_input()).count();
    let defaults_from = input_count.saturating_sub(proc.pronargdefaults as usize);

    let mut input_seen = 0usize;
    args.into_iter()
        .map(|(name, declared, mode, type_oid)| {
            let has_default = if mode.is_input() {
                let has = input_seen >= defaults_from;
                input_seen += 1;
                has
            } else {
                false
            };
            CallableArg {
                name,
                named: declared,
                mode,
                type_oid,
                has_default,
            }
        })
        .collect()
}

impl catalog::RawProc {
    /// More than one OUT/INOUT parameter means the function returns a record
    /// even when `prorettype` is a scalar.
    fn multiple_out_args(&self) -> bool {
        self.proargmodes
            .as_ref()
            .map(|modes| modes.iter().filter(|m| *m == "o" || *m == "b").count() > 1)
            .unwrap_or(false)
    }
}

/// Snapshot the catalog: fetch + assemble.
pub async fn introspect(pool: &PgPool, config: &GatewayConfig) -> Result<SchemaModel, AppError> {
    let raw = catalog::fetch_catalog(pool, &config.schemas).await?;
    let model = SchemaModel::build(raw, config)?;
    tracing::debug!(
        relations = model.relations.len(),
        callables = model.callables.len(),
        types = model.types.len(),
        "catalog snapshot assembled"
    );
    Ok(model)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_assembles_relations_and_keys() {
        let model = fixtures::test_model();

        let users = model.relation("public", "users").unwrap();
        assert_eq!(users.kind, RelationKind::Ordinary);
        assert_eq!(users.attributes.len(), 5);
        assert_eq!(users.primary_key().unwrap().columns, vec!["id"]);
        let uniques: Vec<_> = users.unique_keys().collect();
        assert_eq!(uniques.len(), 1);
        assert_eq!(uniques[0].columns, vec!["email"]);
        assert_eq!(users.comment.as_deref(), Some("user accounts"));
        assert_eq!(
            users.attribute("name").unwrap().comment.as_deref(),
            Some("display name")
        );
    }

    #[test]
    fn foreign_keys_resolve_within_snapshot() {
        let model = fixtures::test_model();
        let orders = model.relation("public", "orders").unwrap();

        let fks: Vec<_> = orders
            .constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
            .collect();
        assert_eq!(fks.len(), 2);

        let resolved = fks.iter().find(|c| !c.dangling).unwrap();
        let target = resolved.references.as_ref().unwrap();
        assert_eq!(target.relation, "users");
        assert_eq!(target.columns, vec!["id"]);

        // FK to the regex-excluded `_hidden` table is dangling.
        let dangling = fks.iter().find(|c| c.dangling).unwrap();
        assert!(dangling.references.is_none());
        assert_eq!(orders.foreign_keys().count(), 1);
    }

    #[test]
    fn excluded_and_partition_children_are_not_mounted() {
        let model = fixtures::test_model();
        assert!(model.relation("public", "_hidden").is_none());
        let child = model.relation("public", "events_2024").unwrap();
        assert_eq!(child.kind, RelationKind::PartitionChild);
        assert!(!child.kind.is_mounted());
    }

    #[test]
    fn generated_and_identity_columns_reject_input() {
        let model = fixtures::test_model();
        let orders = model.relation("public", "orders").unwrap();
        assert!(!orders.attribute("total_cents").unwrap().accepts_input());
        let id = orders.attribute("id").unwrap();
        assert_eq!(id.identity, IdentityMode::ByDefault);
        assert!(id.accepts_input());
        assert!(id.omittable());
    }

    #[test]
    fn callables_carry_signatures_and_defaults() {
        let model = fixtures::test_model();

        let add_one = model.callable("public", "add_one").unwrap();
        assert_eq!(add_one.kind, CallableKind::Function);
        assert_eq!(add_one.volatility, Volatility::Immutable);
        assert_eq!(add_one.returns, ReturnSignature::Scalar { type_oid: 23 });
        assert!(!add_one.args[0].has_default);

        let list_users = model.callable("public", "list_users").unwrap();
        assert_eq!(
            list_users.returns,
            ReturnSignature::SetOf {
                type_oid: 60000,
                composite: true
            }
        );

        let cleanup = model.callable("public", "do_cleanup").unwrap();
        assert_eq!(cleanup.kind, CallableKind::Procedure);
        assert_eq!(cleanup.returns, ReturnSignature::Void);
        assert!(!cleanup.args[0].has_default);
        assert!(cleanup.args[1].has_default);
    }

    #[test]
    fn enum_labels_fold_into_type_rows() {
        let model = fixtures::test_model();
        let mood = model.types.iter().find(|t| t.oid == 70000).unwrap();
        assert_eq!(mood.enum_labels, vec!["happy", "sad"]);
    }

    #[test]
    fn unresolved_attribute_type_fails_build() {
        let mut raw = fixtures::raw_catalog();
        raw.types.retain(|t| t.oid != 1700);
        let config = GatewayConfig::for_tests();
        let err = SchemaModel::build(raw, &config).unwrap_err();
        assert!(matches!(err, AppError::Introspection { .. }));
    }

    #[test]
    fn namespace_privileges_parse() {
        let model = fixtures::test_model();
        let public = &model.namespaces[0];
        assert_eq!(public.privileges.len(), 2);
        assert_eq!(public.privileges[1].grantee, "public");
    }
}
