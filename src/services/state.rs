use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::errors::SyncResult;
use crate::models::Settings;
use crate::services::estimates::EstimateBuilder;
use crate::services::quickbooks::QuickBooks;
use crate::services::sync::SyncEngine;
use crate::services::tokens::TokenManager;

/// Shared wiring for every command. The token manager and client are built
/// on demand so commands that never touch the network (configure, local
/// analytics) work before the connection is configured.
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(db: Database, settings: Settings) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
            settings,
        }
    }

    pub fn token_manager(&self) -> SyncResult<Arc<TokenManager>> {
        Ok(Arc::new(TokenManager::new(
            self.db.clone(),
            &self.settings,
        )?))
    }

    pub fn quickbooks(&self) -> SyncResult<Arc<QuickBooks>> {
        Ok(Arc::new(QuickBooks::new(&self.settings.environment)?))
    }

    pub fn sync_engine(&self) -> SyncResult<SyncEngine> {
        Ok(SyncEngine::new(
            self.db.clone(),
            self.token_manager()?,
            self.quickbooks()?,
        ))
    }

    pub fn estimate_builder(&self) -> SyncResult<EstimateBuilder> {
        Ok(EstimateBuilder::new(
            self.db.clone(),
            self.token_manager()?,
            self.quickbooks()?,
        ))
    }
}
