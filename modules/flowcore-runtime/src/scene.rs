//! One contact's unit of work for one processing pass.
//!
//! Event handlers attach work items to a scene; commit hooks later receive the
//! items of every scene in the batch at once. Scenes are never persisted.

use std::any::Any;

use anyhow::Result;
use flowcore_common::{ContactId, SessionId, UserId};
use flowcore_engine::{Contact, Event, FlowRun, Step};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::assets::OrgAssets;
use crate::hooks::{HookId, HookItem};
use crate::models::Session;
use crate::runtime::Runtime;

pub struct Scene {
    contact: Contact,
    session: Option<Session>,
    user_id: Option<UserId>,

    pre_commits: IndexMap<HookId, Vec<HookItem>>,
    post_commits: IndexMap<HookId, Vec<HookItem>>,
}

impl Scene {
    /// A scene for changes made outside of a flow session (e.g. by a user).
    pub fn new(contact: Contact, user_id: Option<UserId>) -> Self {
        Self {
            contact,
            session: None,
            user_id,
            pre_commits: IndexMap::new(),
            post_commits: IndexMap::new(),
        }
    }

    pub fn for_session(session: Session) -> Self {
        let mut scene = Self::new(session.contact().clone(), None);
        scene.session = Some(session);
        scene
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn contact_id(&self) -> ContactId {
        self.contact.id
    }

    pub fn contact_uuid(&self) -> Uuid {
        self.contact.uuid
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn session_uuid(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.uuid())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Give the session back, e.g. to update it again after a later sprint.
    pub fn into_session(self) -> Option<Session> {
        self.session
    }

    /// Locate the run a step belongs to in this scene's engine session.
    pub fn find_step(&self, step_uuid: Uuid) -> Option<(&FlowRun, &Step)> {
        self.session
            .as_ref()
            .and_then(|s| s.flow_session())
            .and_then(|fs| fs.find_step(step_uuid))
    }

    pub fn attach_pre_commit_hook<T: Any + Send + Sync>(&mut self, hook: HookId, item: T) {
        self.pre_commits.entry(hook).or_default().push(Box::new(item));
    }

    pub fn attach_post_commit_hook<T: Any + Send + Sync>(&mut self, hook: HookId, item: T) {
        self.post_commits.entry(hook).or_default().push(Box::new(item));
    }

    pub fn pre_commits(&self) -> &IndexMap<HookId, Vec<HookItem>> {
        &self.pre_commits
    }

    pub fn post_commits(&self) -> &IndexMap<HookId, Vec<HookItem>> {
        &self.post_commits
    }

    /// Run each event through its registered handler, in order.
    pub fn add_events(&mut self, rt: &Runtime, oa: &OrgAssets, events: &[Event]) -> Result<()> {
        let handlers = rt.handlers.clone();
        handlers.handle_events(rt, oa, self, events)
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("contact_id", &self.contact.id)
            .field("session_uuid", &self.session_uuid())
            .field("pre_commits", &self.pre_commits.keys().collect::<Vec<_>>())
            .field("post_commits", &self.post_commits.keys().collect::<Vec<_>>())
            .finish()
    }
}
