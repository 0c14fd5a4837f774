//! # Application State Management
//!
//! State shared by every HTTP handler and every WebSocket connection.
//!
//! ## Arc<RwLock<T>> Pattern:
//! The counters are written by many relay tasks at once and read by the
//! metrics endpoint, so they live behind `Arc<RwLock<...>>`. Locks are held
//! only long enough to bump a counter or copy a snapshot, never across an
//! `.await`.
//!
//! The configuration is read-only after startup and shared as a plain `Arc`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Many owners of one value across threads
//! - **Cloning**: `Arc::clone` copies a pointer and bumps a counter, so every
//!   worker and every session can hold the same registry cheaply
//!
//! ### RwLock and Poisoning
//! - A lock is poisoned when a thread panics while holding it
//! - The counters stay meaningful after such a panic, so readers recover the
//!   guard with `PoisonError::into_inner` instead of propagating the panic
//!
//! ## What lives where:
//! | Data | Sharing | Written by |
//! |------|---------|------------|
//! | `config` | `Arc<AppConfig>` | startup only |
//! | `registry` | `Arc<RwLock<HashMap>>` inside `SessionRegistry` | accept and teardown |
//! | `metrics` | `Arc<RwLock<RelayMetrics>>` | the dispatcher |

use crate::backend::{BackendFactory, BackendMode};
use crate::config::AppConfig;
use crate::relay::dispatcher::Dispatcher;
use crate::relay::session::SessionRegistry;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// Relay counters since process start.
///
/// ## Rust Concepts:
/// - **#[derive(Default)]**: All counters start at zero
/// - **#[derive(Clone)]**: The metrics endpoint copies the counters out and
///   releases the lock before serializing
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    /// Sessions accepted into the registry
    pub sessions_opened: u64,

    /// Client envelopes that decoded into a known variant
    pub envelopes_received: u64,

    /// Backend `error` events forwarded to clients
    pub backend_errors: u64,
}

/// Counters as shared between the dispatcher and the metrics endpoint.
pub type SharedMetrics = Arc<RwLock<RelayMetrics>>;

/// The state handed to every Actix worker through `web::Data`.
///
/// ## Thread Safety:
/// Every field is either immutable after startup or synchronizes internally,
/// so `AppState` is `Send + Sync` and cloning it yields a handle onto the same
/// registry and counters rather than a copy of them.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: `HttpServer::new` builds one `App` per worker and
///   each needs its own handle
/// - No `Debug` derive: `BackendFactory` holds trait objects
#[derive(Clone)]
pub struct AppState {
    /// Configuration as loaded at startup
    pub config: Arc<AppConfig>,

    /// Backend family chosen at startup
    pub mode: BackendMode,

    /// Live sessions, keyed by connection
    pub registry: SessionRegistry,

    /// Counters updated by every session
    pub metrics: SharedMetrics,

    /// Builds one backend adapter per accepted connection
    pub backends: BackendFactory,

    /// When the server started; `Instant` is `Copy` and needs no lock
    pub start_time: Instant,
}

impl AppState {
    /// Build state from configuration, choosing the backend family from the
    /// credentials it contains.
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(config);
        Self::with_backends(BackendFactory::from_config(config.clone()), config)
    }

    /// Build state around a prepared backend factory (tests swap speech engines here).
    pub fn with_backends(backends: BackendFactory, config: Arc<AppConfig>) -> Self {
        Self {
            mode: backends.mode(),
            registry: SessionRegistry::new(config.performance.max_concurrent_sessions),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            backends,
            config,
            start_time: Instant::now(),
        }
    }

    /// A dispatcher bound to this process's registry and counters.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.performance.event_channel_capacity,
        )
    }

    /// Copy of the counters, taken under a read lock.
    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
