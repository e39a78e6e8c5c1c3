//! Commit hooks.
//!
//! A hook is a typed, ordered side effect. Handlers attach items to scenes
//! under a hook id; the dispatcher inverts scene → items into hook → scenes
//! and calls each hook once per pass with every scene's items, so one bulk
//! statement covers the whole batch.
//!
//! Pre-commit hooks run inside the transaction that writes sessions and runs.
//! Post-commit hooks run afterwards, best effort (see [`BestEffort`]).

mod best_effort;
mod contact;
mod messages;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flowcore_common::FlowcoreError;
use indexmap::IndexMap;
use sqlx::PgConnection;
use tracing::{debug, error};

use crate::assets::OrgAssets;
use crate::runtime::Runtime;
use crate::scene::Scene;

pub use best_effort::{BestEffort, BestEffortOutcome};
pub use contact::{
    ContactModifiedHook, FieldChange, GroupsChange, UpdateContactFieldsHook,
    UpdateContactGroupsHook, UpdateContactLanguageHook, UpdateContactNameHook,
    UpdateContactStatusHook, UpdateLastSeenHook,
};
pub use messages::{InsertMessagesHook, QueueMessagesHook};

/// Stable identity of a commit hook. Scenes key their attachments on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub &'static str);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub const INSERT_MESSAGES: HookId = HookId("insert_messages");
pub const QUEUE_MESSAGES: HookId = HookId("queue_messages");
pub const UPDATE_CONTACT_NAME: HookId = HookId("update_contact_name");
pub const UPDATE_CONTACT_LANGUAGE: HookId = HookId("update_contact_language");
pub const UPDATE_CONTACT_STATUS: HookId = HookId("update_contact_status");
pub const UPDATE_CONTACT_FIELDS: HookId = HookId("update_contact_fields");
pub const UPDATE_CONTACT_GROUPS: HookId = HookId("update_contact_groups");
pub const UPDATE_LAST_SEEN: HookId = HookId("update_last_seen");
pub const CONTACT_MODIFIED: HookId = HookId("contact_modified");

/// A work item attached to a scene. Each hook knows the concrete type it reads.
pub type HookItem = Box<dyn Any + Send + Sync>;

/// One scene's items for a single hook.
pub struct SceneItems<'a> {
    pub scene: &'a Scene,
    pub items: &'a [HookItem],
}

impl<'a> SceneItems<'a> {
    /// Items of type `T`, in attachment order.
    pub fn items_of<T: Any>(&self) -> impl Iterator<Item = &'a T> + 'a {
        self.items.iter().filter_map(|i| (**i).downcast_ref::<T>())
    }

    /// The last attached item of type `T`. Used by hooks where a later change
    /// in the same sprint overrides an earlier one.
    pub fn last_of<T: Any>(&self) -> Option<&'a T> {
        self.items_of::<T>().last()
    }
}

#[async_trait]
pub trait CommitHook: Send + Sync {
    fn id(&self) -> HookId;

    /// Hooks run in ascending order; ties keep first-attached order.
    fn order(&self) -> i32;

    async fn apply(
        &self,
        rt: &Runtime,
        conn: &mut PgConnection,
        oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Hook strategies by id. Built once at startup, immutable afterwards.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookId, Arc<dyn CommitHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(InsertMessagesHook);
        registry.register(QueueMessagesHook);
        registry.register(UpdateContactNameHook);
        registry.register(UpdateContactLanguageHook);
        registry.register(UpdateContactStatusHook);
        registry.register(UpdateContactFieldsHook);
        registry.register(UpdateContactGroupsHook);
        registry.register(UpdateLastSeenHook);
        registry.register(ContactModifiedHook);
        registry
    }

    /// Panics if a hook with the same id is already registered.
    pub fn register(&mut self, hook: impl CommitHook + 'static) {
        let id = hook.id();
        if self.hooks.insert(id, Arc::new(hook)).is_some() {
            panic!("duplicate commit hook registered: {id}");
        }
    }

    pub fn get(&self, id: HookId) -> Result<Arc<dyn CommitHook>, FlowcoreError> {
        self.hooks
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowcoreError::UnknownHook(id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    PreCommit,
    PostCommit,
}

/// A hook and every scene's items for it.
pub(crate) struct HookBatch<'a> {
    pub hook: Arc<dyn CommitHook>,
    pub scenes: Vec<SceneItems<'a>>,
}

/// Invert scene → (hook → items) into hook → scenes, sorted by hook order.
fn group_hooks<'a>(
    registry: &HookRegistry,
    scenes: &'a [Scene],
    phase: Phase,
) -> Result<Vec<HookBatch<'a>>> {
    let mut grouped: IndexMap<HookId, Vec<SceneItems<'a>>> = IndexMap::new();

    for scene in scenes {
        let attached = match phase {
            Phase::PreCommit => scene.pre_commits(),
            Phase::PostCommit => scene.post_commits(),
        };
        for (id, items) in attached {
            grouped
                .entry(*id)
                .or_default()
                .push(SceneItems { scene, items });
        }
    }

    let mut batches = grouped
        .into_iter()
        .map(|(id, scenes)| -> Result<HookBatch<'a>> {
            Ok(HookBatch {
                hook: registry.get(id)?,
                scenes,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    // sort_by_key is stable
    batches.sort_by_key(|b| b.hook.order());
    Ok(batches)
}

async fn apply_batches(
    rt: &Runtime,
    conn: &mut PgConnection,
    oa: &OrgAssets,
    batches: &[HookBatch<'_>],
) -> Result<()> {
    for batch in batches {
        debug!(hook = %batch.hook.id(), scenes = batch.scenes.len(), "Applying commit hook");
        batch
            .hook
            .apply(rt, &mut *conn, oa, &batch.scenes)
            .await
            .with_context(|| format!("error applying {} hook", batch.hook.id()))?;
    }
    Ok(())
}

/// Apply every scene's pre-commit hooks on the caller's transaction. Any
/// failure is returned so the caller's transaction rolls back.
pub async fn apply_pre_commit_hooks(
    rt: &Runtime,
    conn: &mut PgConnection,
    oa: &OrgAssets,
    scenes: &[Scene],
) -> Result<()> {
    let batches = group_hooks(&rt.hooks, scenes, Phase::PreCommit)?;
    apply_batches(rt, conn, oa, &batches).await
}

/// Apply post-commit hooks in their own transaction, falling back to one
/// scene per transaction if the batch fails. Never fails the caller: scenes
/// whose effects couldn't be applied are logged and dropped.
pub async fn apply_post_commit_hooks(
    rt: &Runtime,
    oa: &OrgAssets,
    scenes: &[Scene],
) -> BestEffortOutcome {
    if scenes.iter().all(|s| s.post_commits().is_empty()) {
        return BestEffortOutcome::default();
    }

    let policy = BestEffort::new(
        rt.config.post_commit_batch_timeout(scenes.len()),
        rt.config.post_commit_scene_timeout,
    );

    let outcome = policy
        .run(
            scenes.len(),
            move || async move { apply_post_commits_in_tx(rt, oa, scenes).await },
            move |i| async move {
                apply_post_commits_in_tx(rt, oa, std::slice::from_ref(&scenes[i])).await
            },
        )
        .await;

    for &i in &outcome.failed {
        let scene = &scenes[i];
        error!(
            contact_id = scene.contact_id(),
            session_uuid = ?scene.session_uuid(),
            "Dropped post-commit effects for scene"
        );
    }

    outcome
}

async fn apply_post_commits_in_tx(rt: &Runtime, oa: &OrgAssets, scenes: &[Scene]) -> Result<()> {
    let batches = group_hooks(&rt.hooks, scenes, Phase::PostCommit)?;
    let mut tx = rt.db.begin().await?;
    apply_batches(rt, &mut *tx, oa, &batches).await?;
    tx.commit().await?;
    Ok(())
}
