//! Shared application state. The resolver set is swapped atomically after
//! every schema rebuild; in-flight requests keep the set they started with.

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::introspection;
use crate::resolver::ResolverSet;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<GatewayConfig>,
    /// Published resolver set. Readers clone the inner Arc once per request;
    /// the writer stores a new Arc under the lock. Old sets drop when the
    /// last in-flight request releases them.
    resolvers: Arc<RwLock<Arc<ResolverSet>>>,
    /// Single-writer rebuild guard.
    rebuild_lock: Arc<tokio::sync::Mutex<()>>,
}

/// What a completed rebuild published.
#[derive(Debug, Clone, Copy)]
pub struct RebuildSummary {
    pub relations: usize,
    pub callables: usize,
    pub mounted: usize,
}

impl AppState {
    /// Connects the pool and publishes the first snapshot.
    pub async fn connect(config: GatewayConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .max_lifetime(config.pool_max_lifetime)
            .acquire_timeout(config.pool_acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Self::with_pool(pool, config).await
    }

    pub async fn with_pool(pool: PgPool, config: GatewayConfig) -> Result<Self, AppError> {
        let model = introspection::introspect(&pool, &config).await?;
        let set = Arc::new(ResolverSet::build(model));
        Ok(AppState {
            pool,
            config: Arc::new(config),
            resolvers: Arc::new(RwLock::new(set)),
            rebuild_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// The resolver set for this request. A request that begins after a
    /// publish sees the new set; one that began before keeps the old one.
    pub fn current(&self) -> Arc<ResolverSet> {
        self.resolvers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Introspects and atomically publishes a fresh resolver set. On any
    /// failure the previous set stays published.
    pub async fn rebuild(&self) -> Result<RebuildSummary, AppError> {
        let _guard = self.rebuild_lock.lock().await;

        let model = introspection::introspect(&self.pool, &self.config).await?;
        let set = Arc::new(ResolverSet::build(model));
        let summary = RebuildSummary {
            relations: set.model.relations.len(),
            callables: set.model.callables.len(),
            mounted: set.mounted_count(),
        };

        let mut published = self
            .resolvers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *published = set;

        tracing::info!(
            relations = summary.relations,
            callables = summary.callables,
            mounted = summary.mounted,
            "published new resolver set"
        );
        Ok(summary)
    }
}
