use std::sync::Arc;

use tokio_rusqlite::Connection;
use tracing::info;

use crate::config::AppConfig;
use crate::core::notifications::create_notifier;
use crate::core::{Orchestrator, StateStore};
use crate::error::Result;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: Connection,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppContext {
    pub fn new(config: AppConfig, db: Connection) -> Result<Self> {
        let state = if config.ephemeral_state {
            info!("Using ephemeral copy state; nothing will be persisted");
            StateStore::ephemeral()
        } else {
            StateStore::open(config.state_file.clone())
        };

        Self::with_state(config, db, state)
    }

    /// Build a context around an already opened state store.
    pub fn with_state(config: AppConfig, db: Connection, state: StateStore) -> Result<Self> {
        let notifier = create_notifier(&config.notifications);
        let orchestrator = Orchestrator::new(config.run_settings()?, state, notifier);

        Ok(Self {
            config: Arc::new(config),
            db,
            orchestrator: Arc::new(orchestrator),
        })
    }
}
