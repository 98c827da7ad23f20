//! Assembles a configured runtime: the database and one engine per profile.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::db::{Database, SqliteIdentityStore};
use crate::directory::DirectoryConnector;
use crate::errors::CoreError;
use crate::identity::IdentityStore;
use crate::sync_engine::SyncEngine;

pub struct Runtime {
    pub db: Arc<Database>,
    pub db_path: PathBuf,
    pub engines: Vec<Arc<SyncEngine>>,
}

impl Runtime {
    /// Validate `config`, open the database under `daemon.data_dir` and
    /// build an engine for every profile. All engines share one store.
    pub fn open(config: &AppConfig, connector: Arc<dyn DirectoryConnector>) -> Result<Self, CoreError> {
        config.validate()?;
        let (db, db_path) = Database::open_in(&config.daemon.data_dir)?;
        let db = Arc::new(db);

        let store: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(db.clone()));
        let engines: Vec<Arc<SyncEngine>> = config
            .profiles
            .iter()
            .map(|profile| Arc::new(SyncEngine::new(profile.clone(), connector.clone(), store.clone())))
            .collect();

        info!(path = %db_path.display(), profiles = engines.len(), "runtime ready");
        Ok(Self { db, db_path, engines })
    }

    pub fn engine(&self, profile: &str) -> Option<&Arc<SyncEngine>> {
        self.engines.iter().find(|e| e.profile().name == profile)
    }
}
