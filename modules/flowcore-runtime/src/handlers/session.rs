//! Events that need no commit work here. Waits are turned into fires when
//! the session is written; results and paths are part of the run.

use anyhow::Result;
use flowcore_engine::{Event, EventPayload};
use tracing::{debug, warn};

use super::HandlerRegistry;
use crate::assets::OrgAssets;
use crate::runtime::Runtime;
use crate::scene::Scene;

pub(super) fn register(registry: &mut HandlerRegistry) {
    registry.register(Event::MSG_WAIT, handle_noop);
    registry.register(Event::DIAL_WAIT, handle_noop);
    registry.register(Event::RUN_RESULT_CHANGED, handle_noop);
    registry.register(Event::FLOW_ENTERED, handle_noop);
    registry.register(Event::ERROR, handle_error);
    registry.register(Event::FAILURE, handle_error);
}

fn handle_noop(_rt: &Runtime, _oa: &OrgAssets, scene: &mut Scene, event: &Event) -> Result<()> {
    debug!(contact_id = scene.contact_id(), event = event.type_name(), "Event needs no commit work");
    Ok(())
}

fn handle_error(_rt: &Runtime, _oa: &OrgAssets, scene: &mut Scene, event: &Event) -> Result<()> {
    match &event.payload {
        EventPayload::Error { text } => {
            debug!(contact_id = scene.contact_id(), session_uuid = ?scene.session_uuid(), text, "Flow error");
        }
        EventPayload::Failure { text } => {
            warn!(contact_id = scene.contact_id(), session_uuid = ?scene.session_uuid(), text, "Flow failure");
        }
        _ => {}
    }
    Ok(())
}
