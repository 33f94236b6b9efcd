//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{Config, StorageConfig};
use crate::game::{FinishedMatch, SessionRegistry};
use crate::results::ResultRecorder;
use crate::store::{MemoryStore, Storage, SupabaseClient, SupabaseStore};
use crate::tournament::TournamentEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Storage>,
    pub sessions: Arc<SessionRegistry>,
    pub tournaments: Arc<TournamentEngine>,
    pub recorder: Arc<ResultRecorder>,
}

impl AppState {
    /// Wire every component on top of `store`. The receiver carries finished
    /// matches and must be handed to `ResultRecorder::run`.
    pub fn new(
        config: Config,
        store: Arc<dyn Storage>,
    ) -> (Self, mpsc::UnboundedReceiver<FinishedMatch>) {
        let config = Arc::new(config);

        // Initialize session registry
        let (registry, completed) = SessionRegistry::new(Arc::new(config.game.clone()));
        let sessions = Arc::new(registry);

        // Tournament engine doubles as the recorder's observer
        let tournaments = Arc::new(TournamentEngine::new(store.clone(), sessions.clone()));
        let recorder = Arc::new(ResultRecorder::new(store.clone(), tournaments.clone()));

        let state = Self {
            config,
            store,
            sessions,
            tournaments,
            recorder,
        };
        (state, completed)
    }

    /// Build the store selected by the configuration, then wire the state
    pub fn from_config(config: Config) -> (Self, mpsc::UnboundedReceiver<FinishedMatch>) {
        let store: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryStore::new()),
            StorageConfig::Supabase {
                url,
                service_role_key,
            } => Arc::new(SupabaseStore::new(SupabaseClient::new(url, service_role_key))),
        };
        Self::new(config, store)
    }
}
