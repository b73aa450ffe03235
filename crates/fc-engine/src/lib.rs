//! Geofence monitoring and automatic clock-in/out.
//!
//! Location samples flow through the membership detector and the transition
//! machine; resulting Enter/Exit transitions open and close time entries
//! through the [`LifecycleManager`], serialized per user by the [`Engine`].

mod engine;
mod error;
mod lifecycle;
pub mod monitor;
pub mod notify;
mod registry;
mod store;
#[cfg(test)]
mod testing;

pub use engine::{DEFAULT_PERSISTENCE_TIMEOUT, Engine, EngineConfig, EngineStatus};
pub use error::EngineError;
pub use lifecycle::{LifecycleManager, TransitionReport};
pub use monitor::{
    ChannelProvider, LocationProvider, MonitorError, MonitorHandle, MonitorStatus, ProviderEvent,
};
pub use notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
pub use registry::{DEFAULT_CACHE_TTL, GeofenceRegistry};
pub use store::{DEFAULT_AUDIT_RETENTION, SqliteStore, Store, StoreError};
