use anyhow::Result;
use flowcore_engine::{Event, EventPayload};
use tracing::warn;

use super::{wrong_payload, HandlerRegistry};
use crate::assets::OrgAssets;
use crate::hooks::{
    FieldChange, GroupsChange, CONTACT_MODIFIED, UPDATE_CONTACT_FIELDS, UPDATE_CONTACT_GROUPS,
    UPDATE_CONTACT_LANGUAGE, UPDATE_CONTACT_NAME, UPDATE_CONTACT_STATUS,
};
use crate::runtime::Runtime;
use crate::scene::Scene;

pub(super) fn register(registry: &mut HandlerRegistry) {
    registry.register(Event::CONTACT_NAME_CHANGED, handle_name_changed);
    registry.register(Event::CONTACT_LANGUAGE_CHANGED, handle_language_changed);
    registry.register(Event::CONTACT_STATUS_CHANGED, handle_status_changed);
    registry.register(Event::CONTACT_FIELD_CHANGED, handle_field_changed);
    registry.register(Event::CONTACT_GROUPS_CHANGED, handle_groups_changed);
}

fn handle_name_changed(
    _rt: &Runtime,
    _oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::ContactNameChanged { name } = &event.payload else {
        return Err(wrong_payload(Event::CONTACT_NAME_CHANGED, event));
    };

    scene.attach_pre_commit_hook(UPDATE_CONTACT_NAME, name.clone());
    scene.attach_pre_commit_hook(CONTACT_MODIFIED, ());
    Ok(())
}

fn handle_language_changed(
    _rt: &Runtime,
    _oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::ContactLanguageChanged { language } = &event.payload else {
        return Err(wrong_payload(Event::CONTACT_LANGUAGE_CHANGED, event));
    };

    scene.attach_pre_commit_hook(UPDATE_CONTACT_LANGUAGE, language.clone());
    scene.attach_pre_commit_hook(CONTACT_MODIFIED, ());
    Ok(())
}

fn handle_status_changed(
    _rt: &Runtime,
    _oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::ContactStatusChanged { status } = &event.payload else {
        return Err(wrong_payload(Event::CONTACT_STATUS_CHANGED, event));
    };

    scene.attach_pre_commit_hook(UPDATE_CONTACT_STATUS, *status);
    scene.attach_pre_commit_hook(CONTACT_MODIFIED, ());
    Ok(())
}

fn handle_field_changed(
    _rt: &Runtime,
    _oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::ContactFieldChanged { field, value } = &event.payload else {
        return Err(wrong_payload(Event::CONTACT_FIELD_CHANGED, event));
    };

    scene.attach_pre_commit_hook(
        UPDATE_CONTACT_FIELDS,
        FieldChange {
            key: field.key.clone(),
            value: value.clone(),
        },
    );
    scene.attach_pre_commit_hook(CONTACT_MODIFIED, ());
    Ok(())
}

/// Groups the org doesn't know about (e.g. deleted since the flow ran) are
/// skipped.
fn handle_groups_changed(
    _rt: &Runtime,
    oa: &OrgAssets,
    scene: &mut Scene,
    event: &Event,
) -> Result<()> {
    let EventPayload::ContactGroupsChanged {
        groups_added,
        groups_removed,
    } = &event.payload
    else {
        return Err(wrong_payload(Event::CONTACT_GROUPS_CHANGED, event));
    };

    let resolve = |groups: &[flowcore_engine::GroupRef]| {
        groups
            .iter()
            .filter_map(|g| {
                let id = oa.group_id(g.uuid);
                if id.is_none() {
                    warn!(group_uuid = %g.uuid, group = %g.name, "Ignoring change to unknown group");
                }
                id
            })
            .collect::<Vec<_>>()
    };

    let change = GroupsChange {
        added: resolve(groups_added),
        removed: resolve(groups_removed),
    };
    if change == GroupsChange::default() {
        return Ok(());
    }

    scene.attach_pre_commit_hook(UPDATE_CONTACT_GROUPS, change);
    scene.attach_pre_commit_hook(CONTACT_MODIFIED, ());
    Ok(())
}
