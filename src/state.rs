// state.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::{create_pool, migrate};
use crate::error::StoreError;
use crate::poll::PgPollStore;
use crate::store::PollStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PollStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn PollStore>) -> Arc<Self> {
        Arc::new(Self { config, store })
    }

    /// Connects to PostgreSQL, migrates and seeds the configured staff account.
    pub async fn connect(config: Config) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let pool = create_pool(&config).await?;
        migrate(&pool).await?;

        let state = Self::new(config, Arc::new(PgPollStore::new(pool)));
        state.ensure_admin().await?;
        Ok(state)
    }

    pub async fn ensure_admin(&self) -> Result<(), StoreError> {
        let Some(admin) = &self.config.admin else {
            return Ok(());
        };

        match self.store.create_user(&admin.username, &admin.password, true).await {
            Ok(user) => info!(username = %user.username, "Created staff account"),
            Err(StoreError::DuplicateUsername(username)) => {
                warn!(%username, "Staff account already exists, leaving it unchanged")
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
