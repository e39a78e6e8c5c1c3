//! Writing engine output for a batch of contacts: sessions, runs, fires and
//! pre-commit hooks in one transaction, then post-commit hooks.

use anyhow::{Context, Result};
use flowcore_common::{ContactId, SessionStatus, StartId};
use flowcore_engine::{FlowSession, Sprint};

use crate::assets::OrgAssets;
use crate::hooks::apply_post_commit_hooks;
use crate::models::{exit_batch, insert_sessions, ExitSelector, Session, SessionOutput};
use crate::runtime::Runtime;
use crate::scene::Scene;

/// Write the first sprint of new sessions. With `interrupt_waiting`, any
/// session the contacts are still waiting in is interrupted first, in the
/// same transaction. Without it, a contact with a waiting session fails the
/// batch.
pub async fn write_new_sessions(
    rt: &Runtime,
    oa: &OrgAssets,
    outputs: Vec<SessionOutput>,
    start_id: Option<StartId>,
    interrupt_waiting: bool,
) -> Result<Vec<Scene>> {
    let mut tx = rt.db.begin().await?;

    if interrupt_waiting {
        let contact_ids: Vec<ContactId> = outputs.iter().map(|o| o.session.contact.id).collect();
        for chunk in contact_ids.chunks(rt.config.interrupt_batch_size.max(1)) {
            exit_batch(&mut *tx, ExitSelector::Contacts(chunk), SessionStatus::Interrupted).await?;
        }
    }

    let scenes = insert_sessions(rt, &mut *tx, oa, outputs, start_id).await?;
    tx.commit().await.context("error committing new sessions")?;

    apply_post_commit_hooks(rt, oa, &scenes).await;
    Ok(scenes)
}

/// Write the next sprint of a waiting session.
pub async fn resume_session(
    rt: &Runtime,
    oa: &OrgAssets,
    session: Session,
    fs: FlowSession,
    sprint: &Sprint,
) -> Result<Scene> {
    let mut tx = rt.db.begin().await?;
    let scene = session.update(rt, &mut *tx, oa, fs, sprint).await?;
    tx.commit().await.context("error committing session update")?;

    apply_post_commit_hooks(rt, oa, std::slice::from_ref(&scene)).await;
    Ok(scene)
}
