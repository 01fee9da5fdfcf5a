//! Application state management
//!
//! Everything a running client shares between its transport tasks. The
//! components synchronize internally, so the state itself is read-only.

use std::sync::Arc;

use crate::api::{DirectoryClient, PublicKeyDirectory};
use crate::config::ClientConfig;
use crate::crypto::{IdentityManager, KeyStore, RoomOrchestrator, SessionContext};
use crate::error::AppResult;

/// Global application state
pub struct AppState {
    pub config: ClientConfig,

    /// Persistent key store
    pub store: KeyStore,

    /// Local identity key pair
    pub identity: IdentityManager,

    /// Room protocol driver
    pub orchestrator: RoomOrchestrator,
}

impl AppState {
    /// Open the key store and connect the directory client
    pub async fn new(config: ClientConfig) -> AppResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = KeyStore::open(&config.database_path).await?;

        let directory: Arc<dyn PublicKeyDirectory> =
            Arc::new(DirectoryClient::new(config.directory_url()?, config.request_timeout())?);

        Ok(Self::with_parts(config, store, directory))
    }

    /// Assemble state from an already opened store and any directory
    pub fn with_parts(config: ClientConfig, store: KeyStore, directory: Arc<dyn PublicKeyDirectory>) -> Self {
        Self {
            identity: IdentityManager::new(store.clone()),
            orchestrator: RoomOrchestrator::new(store.clone(), directory),
            store,
            config,
        }
    }

    /// Session context for the local user in `room_id`
    pub fn session(&self, room_id: &str) -> SessionContext {
        SessionContext::new(self.config.user_id.clone(), room_id)
    }
}

/// Thread-safe shared state type
pub type SharedState = Arc<AppState>;

/// Create a new shared state instance
pub async fn create_shared_state(config: ClientConfig) -> AppResult<SharedState> {
    let state = AppState::new(config).await?;
    Ok(Arc::new(state))
}
