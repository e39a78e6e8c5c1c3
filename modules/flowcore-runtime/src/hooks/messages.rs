use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::{CommitHook, HookId, SceneItems, INSERT_MESSAGES, QUEUE_MESSAGES};
use crate::assets::OrgAssets;
use crate::courier::QueuedMsg;
use crate::models::Msg;
use crate::runtime::Runtime;

/// Writes every outgoing message created in the batch.
pub struct InsertMessagesHook;

#[async_trait]
impl CommitHook for InsertMessagesHook {
    fn id(&self) -> HookId {
        INSERT_MESSAGES
    }

    fn order(&self) -> i32 {
        1
    }

    async fn apply(
        &self,
        rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let msgs: Vec<&Msg> = scenes.iter().flat_map(|s| s.items_of::<Msg>()).collect();
        Msg::insert(conn, &msgs, rt.config.insert_batch_size).await?;
        Ok(())
    }
}

/// Hands committed messages on courier channels to courier. Messages on
/// relayer channels stay pending until the relayer syncs them.
pub struct QueueMessagesHook;

impl QueueMessagesHook {
    fn queued(scenes: &[SceneItems<'_>]) -> Vec<QueuedMsg> {
        let mut queued = Vec::new();

        for scene in scenes {
            let session = scene.scene.session();
            let timeout = session.and_then(|s| s.timeout()).map(|t| t.num_seconds());

            for msg in scene.items_of::<Msg>() {
                let Some(channel_uuid) = msg.channel_uuid.filter(|_| msg.courier) else {
                    continue;
                };
                queued.push(QueuedMsg {
                    msg_uuid: msg.uuid,
                    contact_id: msg.contact_id,
                    channel_uuid,
                    urn: msg.urn.clone(),
                    text: msg.text.clone(),
                    session_uuid: session.map(|s| s.uuid()),
                    session_timeout_seconds: timeout,
                });
            }
        }

        queued
    }
}

#[async_trait]
impl CommitHook for QueueMessagesHook {
    fn id(&self) -> HookId {
        QUEUE_MESSAGES
    }

    fn order(&self) -> i32 {
        1
    }

    async fn apply(
        &self,
        rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        let queued = Self::queued(scenes);
        if queued.is_empty() {
            return Ok(());
        }

        rt.courier
            .queue(&queued)
            .await
            .context("error queueing messages to courier")?;

        let uuids: Vec<Uuid> = queued.iter().map(|m| m.msg_uuid).collect();
        let marked = Msg::mark_queued(conn, &uuids).await?;
        info!(queued = queued.len(), marked, "Queued messages to courier");

        Ok(())
    }
}
