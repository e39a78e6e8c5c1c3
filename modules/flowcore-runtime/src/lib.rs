//! Session orchestration: persisting engine output, turning events into
//! commit hook work, scheduling wake-ups and interrupting sessions.
//!
//! Consumers construct a [`Runtime`] once, then for each batch of contacts
//! call [`runner::write_new_sessions`] or [`runner::resume_session`].

pub mod assets;
pub mod campaigns;
pub mod courier;
pub mod handlers;
pub mod hooks;
pub mod models;
pub mod runner;
pub mod runtime;
pub mod scene;
pub mod storage;

pub use assets::{Channel, OrgAssets};
pub use campaigns::{CampaignEvent, OffsetUnit};
pub use courier::{Courier, MemoryCourier, QueuedMsg};
pub use handlers::{EventHandler, HandlerRegistry};
pub use hooks::{
    apply_post_commit_hooks, apply_pre_commit_hooks, BestEffort, BestEffortOutcome, CommitHook,
    HookId, HookRegistry, SceneItems,
};
pub use models::{ContactFire, Session, SessionOutput};
pub use runner::{resume_session, write_new_sessions};
pub use runtime::Runtime;
pub use scene::Scene;
pub use storage::{MemoryStorage, SessionStorage};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
