//! Per-object endpoint logic and the published resolver set.

pub mod callable;
pub mod relation;

use crate::config::GatewayConfig;
use crate::introspection::{Callable, Relation, SchemaModel};
use crate::sql::{BoundLiteral, QueryCompiler};
use crate::typereg::TypeRegistry;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use std::collections::HashMap;

/// What a path resolves to.
#[derive(Debug, Clone, Copy)]
enum ObjectEntry {
    Relation(usize),
    Callable(usize),
}

pub enum ResolvedObject<'a> {
    Relation(&'a Relation),
    Callable(&'a Callable),
}

/// The currently published endpoint fabric: one entry per mounted relation
/// and callable, plus the snapshot and registry they compile against.
/// Immutable once built; the router swaps whole sets atomically.
pub struct ResolverSet {
    pub model: SchemaModel,
    pub registry: TypeRegistry,
    objects: HashMap<(String, String), ObjectEntry>,
}

impl ResolverSet {
    pub fn build(model: SchemaModel) -> Self {
        let registry = TypeRegistry::from_model(&model);
        let mut objects: HashMap<(String, String), ObjectEntry> = HashMap::new();

        for (i, rel) in model.relations.iter().enumerate() {
            if rel.kind.is_mounted() {
                objects.insert(
                    (rel.namespace.clone(), rel.name.clone()),
                    ObjectEntry::Relation(i),
                );
            }
        }
        for (i, callable) in model.callables.iter().enumerate() {
            if !callable.is_mounted() {
                continue;
            }
            let key = (callable.namespace.clone(), callable.name.clone());
            if objects.contains_key(&key) {
                // A relation with the same name wins the mount.
                tracing::warn!(
                    object = %callable.qualified_name(),
                    "callable shadowed by a relation with the same name"
                );
                continue;
            }
            objects.insert(key, ObjectEntry::Callable(i));
        }

        ResolverSet {
            model,
            registry,
            objects,
        }
    }

    pub fn lookup(&self, namespace: &str, name: &str) -> Option<ResolvedObject<'_>> {
        match self
            .objects
            .get(&(namespace.to_string(), name.to_string()))?
        {
            ObjectEntry::Relation(i) => Some(ResolvedObject::Relation(&self.model.relations[*i])),
            ObjectEntry::Callable(i) => Some(ResolvedObject::Callable(&self.model.callables[*i])),
        }
    }

    pub fn mounted_count(&self) -> usize {
        self.objects.len()
    }

    pub fn compiler<'a>(&'a self, config: &GatewayConfig) -> QueryCompiler<'a> {
        QueryCompiler {
            model: &self.model,
            registry: &self.registry,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }
}

/// Binds a compiled argument vector onto a query in placeholder order.
pub(crate) fn bind_query<'q>(
    sql: &'q str,
    args: &[BoundLiteral],
) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for a in args {
        query = query.bind(a.clone());
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures;

    #[test]
    fn build_mounts_relations_and_callables() {
        let set = ResolverSet::build(fixtures::test_model());
        assert!(matches!(
            set.lookup("public", "users"),
            Some(ResolvedObject::Relation(_))
        ));
        assert!(matches!(
            set.lookup("public", "add_one"),
            Some(ResolvedObject::Callable(_))
        ));
        assert!(set.lookup("public", "missing").is_none());
    }

    #[test]
    fn partition_children_are_not_mounted() {
        let set = ResolverSet::build(fixtures::test_model());
        assert!(set.lookup("public", "events_2024").is_none());
        // still present in the model
        assert!(set.model.relation("public", "events_2024").is_some());
    }

    #[test]
    fn views_are_mounted_read_only_objects() {
        let set = ResolverSet::build(fixtures::test_model());
        assert!(matches!(
            set.lookup("public", "user_names"),
            Some(ResolvedObject::Relation(_))
        ));
    }
}
