use std::sync::Arc;

use chrono::Duration;

use crate::{
    config::Config,
    db::{Cache, Store},
    services::{
        AccountService, AccountSettings, CatalogService, InteractionService, Mailer, Paginator,
        RecommendationService,
    },
};

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub catalog: CatalogService,
    pub interactions: InteractionService,
    pub recommendations: RecommendationService,
    pub paginator: Paginator,
}

impl AppState {
    /// Wires the services over one store. `cache` is optional.
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        config: &Config,
        cache: Option<Cache>,
    ) -> Self {
        let settings = AccountSettings {
            bcrypt_cost: config.bcrypt_cost,
            token_ttl: Duration::hours(config.token_ttl_hours),
            public_url: config.public_url.clone(),
        };

        Self {
            accounts: AccountService::new(store.clone(), mailer, settings),
            catalog: CatalogService::new(store.clone(), cache.clone()),
            interactions: InteractionService::new(store.clone(), cache),
            recommendations: RecommendationService::new(store),
            paginator: Paginator::new(config.page_size, config.page_size_max),
        }
    }
}
