use anyhow::Result;
use flowcore_engine::{Event, EventPayload};

use super::{wrong_payload, HandlerRegistry};
use crate::assets::OrgAssets;
use crate::hooks::{INSERT_MESSAGES, QUEUE_MESSAGES, UPDATE_LAST_SEEN};
use crate::models::Msg;
use crate::runtime::Runtime;
use crate::scene::Scene;

pub(super) fn register(registry: &mut HandlerRegistry) {
    registry.register(Event::MSG_CREATED, handle_msg_created);
    registry.register(Event::MSG_RECEIVED, handle_msg_received);
}

/// The message is written before commit and sent after it.
fn handle_msg_created(
    _rt: &Runtime,
    oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::MsgCreated { msg } = &event.payload else {
        return Err(wrong_payload(Event::MSG_CREATED, event));
    };

    let flow_id = event
        .step_uuid
        .and_then(|step| scene.find_step(step))
        .map(|(run, _)| oa.flow_id(run.flow.uuid))
        .transpose()?;

    let msg = Msg::new_outgoing(oa, scene.contact_id(), msg, flow_id, event.created_on);
    scene.attach_pre_commit_hook(INSERT_MESSAGES, msg.clone());
    scene.attach_post_commit_hook(QUEUE_MESSAGES, msg);
    Ok(())
}

fn handle_msg_received(
    _rt: &Runtime,
    _oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    if !matches!(event.payload, EventPayload::MsgReceived { .. }) {
        return Err(wrong_payload(Event::MSG_RECEIVED, event));
    }

    scene.attach_pre_commit_hook(UPDATE_LAST_SEEN, event.created_on);
    Ok(())
}
