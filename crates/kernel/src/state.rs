//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::catalog::{AggregateService, SearchService};
use crate::config::Config;
use crate::db;
use crate::store::{PgProductStore, PriceRules, ProductStore};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Document store the catalog core reads from.
    store: Arc<dyn ProductStore>,

    /// Paginated search service.
    search: SearchService,

    /// Count/price aggregation service.
    aggregates: AggregateService,

    /// Maximum accepted page size.
    max_page_size: u64,
}

impl AppState {
    /// Initialize state from configuration: connect the pool and wire the
    /// catalog services together.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config).await?;

        let store: Arc<dyn ProductStore> = Arc::new(PgProductStore::new(pool.clone()));
        let price_rules = PriceRules {
            currencies: config.price_currencies.clone(),
            price_type_codes: config.price_type_codes.clone(),
        };
        let aggregates = AggregateService::new(Arc::clone(&store), price_rules);
        let search = SearchService::new(Arc::clone(&store), aggregates.clone());

        info!(
            currencies = config.price_currencies.len(),
            price_type_codes = config.price_type_codes.len(),
            "catalog services initialized"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                db: pool,
                store,
                search,
                aggregates,
                max_page_size: config.max_page_size,
            }),
        })
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.inner.store
    }

    pub fn search(&self) -> &SearchService {
        &self.inner.search
    }

    pub fn aggregates(&self) -> &AggregateService {
        &self.inner.aggregates
    }

    pub fn max_page_size(&self) -> u64 {
        self.inner.max_page_size
    }

    /// Check PostgreSQL connectivity.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}
