//! Hooks that write contact changes made during a sprint.
//!
//! Each one turns every scene's items into a single bulk statement, using
//! UNNEST over parallel arrays so N contacts cost one round trip.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore_common::{ContactId, ContactStatus, GroupId};
use sqlx::PgConnection;
use tracing::debug;

use super::{
    CommitHook, HookId, SceneItems, CONTACT_MODIFIED, UPDATE_CONTACT_FIELDS,
    UPDATE_CONTACT_GROUPS, UPDATE_CONTACT_LANGUAGE, UPDATE_CONTACT_NAME, UPDATE_CONTACT_STATUS,
    UPDATE_LAST_SEEN,
};
use crate::assets::OrgAssets;
use crate::runtime::Runtime;

/// A single field value set or cleared (`value: None`).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub key: String,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupsChange {
    pub added: Vec<GroupId>,
    pub removed: Vec<GroupId>,
}

/// Last item of type `T` per scene, as parallel (contact ids, values) arrays.
fn last_per_scene<T: std::any::Any, V>(
    scenes: &[SceneItems<'_>],
    map: impl Fn(&T) -> V,
) -> (Vec<ContactId>, Vec<V>) {
    scenes
        .iter()
        .filter_map(|s| s.last_of::<T>().map(|item| (s.scene.contact_id(), map(item))))
        .unzip()
}

pub struct UpdateContactNameHook;

#[async_trait]
impl CommitHook for UpdateContactNameHook {
    fn id(&self) -> HookId {
        UPDATE_CONTACT_NAME
    }

    fn order(&self) -> i32 {
        2
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (ids, names) = last_per_scene::<String, _>(scenes, Clone::clone);

        sqlx::query(
            r#"
            UPDATE contacts c
            SET name = NULLIF(v.name, ''), modified_on = NOW()
            FROM UNNEST($1::bigint[], $2::text[]) AS v(id, name)
            WHERE c.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .execute(&mut *conn)
        .await
        .context("error updating contact names")?;

        Ok(())
    }
}

/// Items are the new language code, empty to clear.
pub struct UpdateContactLanguageHook;

#[async_trait]
impl CommitHook for UpdateContactLanguageHook {
    fn id(&self) -> HookId {
        UPDATE_CONTACT_LANGUAGE
    }

    fn order(&self) -> i32 {
        3
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (ids, languages) = last_per_scene::<String, _>(scenes, Clone::clone);

        sqlx::query(
            r#"
            UPDATE contacts c
            SET language = NULLIF(v.language, ''), modified_on = NOW()
            FROM UNNEST($1::bigint[], $2::text[]) AS v(id, language)
            WHERE c.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&languages)
        .execute(&mut *conn)
        .await
        .context("error updating contact languages")?;

        Ok(())
    }
}

pub struct UpdateContactStatusHook;

#[async_trait]
impl CommitHook for UpdateContactStatusHook {
    fn id(&self) -> HookId {
        UPDATE_CONTACT_STATUS
    }

    fn order(&self) -> i32 {
        4
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (ids, statuses) =
            last_per_scene::<ContactStatus, _>(scenes, |s| s.code().to_string());

        sqlx::query(
            r#"
            UPDATE contacts c
            SET status = v.status, modified_on = NOW()
            FROM UNNEST($1::bigint[], $2::text[]) AS v(id, status)
            WHERE c.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&statuses)
        .execute(&mut *conn)
        .await
        .context("error updating contact statuses")?;

        Ok(())
    }
}

pub struct UpdateContactFieldsHook;

impl UpdateContactFieldsHook {
    /// Merge a scene's field changes into one JSON patch. Later changes to a
    /// key win; cleared keys are null and get stripped on write.
    fn patch(scene: &SceneItems<'_>) -> Option<serde_json::Value> {
        let mut patch = serde_json::Map::new();
        for change in scene.items_of::<FieldChange>() {
            patch.insert(
                change.key.clone(),
                change.value.clone().unwrap_or(serde_json::Value::Null),
            );
        }
        (!patch.is_empty()).then_some(serde_json::Value::Object(patch))
    }
}

#[async_trait]
impl CommitHook for UpdateContactFieldsHook {
    fn id(&self) -> HookId {
        UPDATE_CONTACT_FIELDS
    }

    fn order(&self) -> i32 {
        5
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (ids, patches): (Vec<ContactId>, Vec<String>) = scenes
            .iter()
            .filter_map(|s| Self::patch(s).map(|p| (s.scene.contact_id(), p.to_string())))
            .unzip();

        sqlx::query(
            r#"
            UPDATE contacts c
            SET fields = jsonb_strip_nulls(c.fields || v.patch::jsonb), modified_on = NOW()
            FROM UNNEST($1::bigint[], $2::text[]) AS v(id, patch)
            WHERE c.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&patches)
        .execute(&mut *conn)
        .await
        .context("error updating contact fields")?;

        Ok(())
    }
}

pub struct UpdateContactGroupsHook;

impl UpdateContactGroupsHook {
    /// Net membership changes per scene as (group, contact) pairs, split into
    /// additions and removals. A group added then removed in the same sprint
    /// ends up removed.
    fn net_changes(
        scenes: &[SceneItems<'_>],
    ) -> (Vec<(GroupId, ContactId)>, Vec<(GroupId, ContactId)>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for scene in scenes {
            let mut membership: BTreeMap<GroupId, bool> = BTreeMap::new();
            for change in scene.items_of::<GroupsChange>() {
                for &g in &change.added {
                    membership.insert(g, true);
                }
                for &g in &change.removed {
                    membership.insert(g, false);
                }
            }

            let contact_id = scene.scene.contact_id();
            for (group_id, member) in membership {
                if member {
                    added.push((group_id, contact_id));
                } else {
                    removed.push((group_id, contact_id));
                }
            }
        }

        (added, removed)
    }
}

#[async_trait]
impl CommitHook for UpdateContactGroupsHook {
    fn id(&self) -> HookId {
        UPDATE_CONTACT_GROUPS
    }

    fn order(&self) -> i32 {
        6
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (added, removed) = Self::net_changes(scenes);
        debug!(added = added.len(), removed = removed.len(), "Updating group memberships");

        if !added.is_empty() {
            let (groups, contacts): (Vec<GroupId>, Vec<ContactId>) = added.into_iter().unzip();
            sqlx::query(
                r#"
                INSERT INTO contact_groups_contacts (group_id, contact_id)
                SELECT * FROM UNNEST($1::bigint[], $2::bigint[])
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&groups)
            .bind(&contacts)
            .execute(&mut *conn)
            .await
            .context("error adding contacts to groups")?;
        }

        if !removed.is_empty() {
            let (groups, contacts): (Vec<GroupId>, Vec<ContactId>) = removed.into_iter().unzip();
            sqlx::query(
                r#"
                DELETE FROM contact_groups_contacts g
                USING UNNEST($1::bigint[], $2::bigint[]) AS v(group_id, contact_id)
                WHERE g.group_id = v.group_id AND g.contact_id = v.contact_id
                "#,
            )
            .bind(&groups)
            .bind(&contacts)
            .execute(&mut *conn)
            .await
            .context("error removing contacts from groups")?;
        }

        Ok(())
    }
}

/// Items are the time a message was received from the contact.
pub struct UpdateLastSeenHook;

#[async_trait]
impl CommitHook for UpdateLastSeenHook {
    fn id(&self) -> HookId {
        UPDATE_LAST_SEEN
    }

    fn order(&self) -> i32 {
        7
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let (ids, seen): (Vec<ContactId>, Vec<DateTime<Utc>>) = scenes
            .iter()
            .filter_map(|s| {
                s.items_of::<DateTime<Utc>>()
                    .max()
                    .map(|t| (s.scene.contact_id(), *t))
            })
            .unzip();

        sqlx::query(
            r#"
            UPDATE contacts c
            SET last_seen_on = GREATEST(c.last_seen_on, v.seen)
            FROM UNNEST($1::bigint[], $2::timestamptz[]) AS v(id, seen)
            WHERE c.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&seen)
        .execute(&mut *conn)
        .await
        .context("error updating contact last seen")?;

        Ok(())
    }
}

/// Bumps `modified_on` once per contact after the other contact hooks ran.
pub struct ContactModifiedHook;

#[async_trait]
impl CommitHook for ContactModifiedHook {
    fn id(&self) -> HookId {
        CONTACT_MODIFIED
    }

    fn order(&self) -> i32 {
        100
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let ids: Vec<ContactId> = scenes.iter().map(|s| s.scene.contact_id()).collect();

        sqlx::query("UPDATE contacts SET modified_on = NOW() WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *conn)
            .await
            .context("error marking contacts modified")?;

        Ok(())
    }
}
