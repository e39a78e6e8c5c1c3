use std::sync::Arc;

use flowcore_common::Config;
use sqlx::PgPool;

use crate::courier::{Courier, MemoryCourier};
use crate::handlers::HandlerRegistry;
use crate::hooks::HookRegistry;
use crate::storage::{MemoryStorage, SessionStorage};

/// Central dependency container passed to handlers, hooks and session writes.
#[derive(Clone)]
pub struct Runtime {
    pub db: PgPool,
    pub config: Config,
    pub storage: Arc<dyn SessionStorage>,
    pub courier: Arc<dyn Courier>,
    pub handlers: Arc<HandlerRegistry>,
    pub hooks: Arc<HookRegistry>,
}

impl Runtime {
    pub fn new(
        db: PgPool,
        config: Config,
        storage: Arc<dyn SessionStorage>,
        courier: Arc<dyn Courier>,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            courier,
            handlers: Arc::new(HandlerRegistry::with_defaults()),
            hooks: Arc::new(HookRegistry::with_defaults()),
        }
    }

    /// Runtime with in-memory storage and courier. Used by tests and local runs.
    pub fn in_memory(db: PgPool, config: Config) -> Self {
        let bucket = config.sessions_bucket.clone();
        Self::new(
            db,
            config,
            Arc::new(MemoryStorage::new(bucket)),
            Arc::new(MemoryCourier::new()),
        )
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

/// Runtime over a pool that never connects, for tests that don't touch the
/// database. Must be called inside a tokio runtime.
#[cfg(test)]
pub(crate) fn test_runtime() -> Runtime {
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/flowcore_unit")
        .expect("lazy pool");
    Runtime::in_memory(db, Config::default())
}
