//! Event handlers.
//!
//! A handler looks at one event and attaches work to the scene's commit
//! hooks. Handlers are plain functions with no database handle, so all I/O
//! happens later in the hooks, once per batch.

mod contact;
mod messages;
mod session;

use std::collections::HashMap;

use anyhow::Result;
use flowcore_common::FlowcoreError;
use flowcore_engine::Event;

use crate::assets::OrgAssets;
use crate::runtime::Runtime;
use crate::scene::Scene;

pub type EventHandler = fn(&Runtime, &OrgAssets, &mut Scene, &Event) -> Result<()>;

/// Handlers keyed by event type. Built once at startup, immutable afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, EventHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        messages::register(&mut registry);
        contact::register(&mut registry);
        session::register(&mut registry);
        registry
    }

    /// Panics if a handler for the event type is already registered.
    pub fn register(&mut self, event_type: &'static str, handler: EventHandler) {
        if self.handlers.insert(event_type, handler).is_some() {
            panic!("duplicate handler registered for event type: {event_type}");
        }
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Run each event through its handler, in order. An event with no
    /// handler fails the whole call.
    pub fn handle_events(
        &self,
        rt: &Runtime,
        oa: &OrgAssets,
        scene: &mut Scene,
        events: &[Event],
    ) -> Result<()> {
        for event in events {
            let handler = self
                .handlers
                .get(event.type_name())
                .ok_or_else(|| FlowcoreError::UnhandledEventType(event.type_name().to_string()))?;
            handler(rt, oa, scene, event)?;
        }
        Ok(())
    }
}

/// A handler was given an event of a type it wasn't registered for.
fn wrong_payload(expected: &str, event: &Event) -> anyhow::Error {
    anyhow::anyhow!(
        "handler for {expected} called with {} event",
        event.type_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookId, CONTACT_MODIFIED, UPDATE_CONTACT_NAME, UPDATE_LAST_SEEN};
    use crate::runtime::test_runtime;
    use flowcore_common::ContactStatus;
    use flowcore_engine::{Contact, EventPayload, MsgIn};
    use uuid::Uuid;

    fn scene() -> Scene {
        Scene::new(
            Contact {
                uuid: Uuid::new_v4(),
                id: 1,
                name: None,
                language: None,
                status: ContactStatus::Active,
            },
            None,
        )
    }

    fn oa() -> OrgAssets {
        OrgAssets::new(1, chrono_tz::UTC)
    }

    fn hooks(scene: &Scene) -> Vec<HookId> {
        scene.pre_commits().keys().copied().collect()
    }

    #[tokio::test]
    async fn events_are_dispatched_in_order() {
        let rt = test_runtime();
        let mut scene = scene();
        let events = vec![
            Event::new(EventPayload::MsgReceived {
                msg: MsgIn {
                    uuid: Uuid::new_v4(),
                    urn: None,
                    channel: None,
                    text: "hi".into(),
                },
            }),
            Event::new(EventPayload::ContactNameChanged {
                name: "Ann".into(),
            }),
        ];

        rt.handlers
            .handle_events(&rt, &oa(), &mut scene, &events)
            .unwrap();

        assert_eq!(
            hooks(&scene),
            vec![UPDATE_LAST_SEEN, UPDATE_CONTACT_NAME, CONTACT_MODIFIED]
        );
    }

    #[tokio::test]
    async fn unhandled_event_type_fails_the_batch() {
        let rt = test_runtime();
        let registry = HandlerRegistry::new();
        let mut scene = scene();
        let events = vec![Event::new(EventPayload::Error {
            text: "boom".into(),
        })];

        let err = registry
            .handle_events(&rt, &oa(), &mut scene, &events)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<FlowcoreError>(),
            Some(FlowcoreError::UnhandledEventType(t)) if t == "error"
        ));
    }

    #[test]
    fn defaults_cover_every_event_type() {
        let registry = HandlerRegistry::with_defaults();
        for event_type in [
            Event::MSG_CREATED,
            Event::MSG_RECEIVED,
            Event::MSG_WAIT,
            Event::DIAL_WAIT,
            Event::CONTACT_NAME_CHANGED,
            Event::CONTACT_LANGUAGE_CHANGED,
            Event::CONTACT_STATUS_CHANGED,
            Event::CONTACT_FIELD_CHANGED,
            Event::CONTACT_GROUPS_CHANGED,
            Event::RUN_RESULT_CHANGED,
            Event::FLOW_ENTERED,
            Event::ERROR,
            Event::FAILURE,
        ] {
            assert!(registry.is_registered(event_type), "{event_type}");
        }
    }

    #[test]
    #[should_panic(expected = "duplicate handler")]
    fn duplicate_registration_panics() {
        let mut registry = HandlerRegistry::with_defaults();
        registry.register(Event::MSG_CREATED, |_, _, _, _| Ok(()));
    }
}
