//! Realtime group-location relay: authenticated websockets, a registry of
//! who is reachable per group, and the engine that pushes rosters to them.

pub mod backend;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod registry;
pub mod routes;

use std::sync::Arc;

use saathi_store::Store;

pub use backend::{LocationStore, MembershipResolver, StoreBackend};
pub use config::RelayConfig;
pub use engine::{BroadcastEngine, RosterReply, SweepHandle};
pub use error::RelayError;
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use routes::routes;

/// Shared by every connection task.
pub struct State {
    pub engine: Arc<BroadcastEngine>,
    pub jwt_secret: String,
    pub channel_buffer: usize,
}

impl State {
    pub fn new(engine: Arc<BroadcastEngine>, jwt_secret: String, channel_buffer: usize) -> Self {
        Self {
            engine,
            jwt_secret,
            channel_buffer,
        }
    }

    /// Wire the registry and engine to the SQLite store.
    pub fn with_store(store: Arc<Store>, config: &RelayConfig) -> Arc<Self> {
        let backend = Arc::new(StoreBackend::new(store));
        let registry = Arc::new(ConnectionRegistry::new(backend.clone()));
        let engine = Arc::new(BroadcastEngine::new(registry, backend.clone(), backend));
        Arc::new(Self::new(
            engine,
            config.jwt_secret.clone(),
            config.channel_buffer,
        ))
    }
}
