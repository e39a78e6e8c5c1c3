//! Forcibly ending waiting sessions.
//!
//! Sessions, their runs, the contacts' current session pointers and the
//! contacts' session fires change together, one transaction per batch. A
//! failure part way through leaves earlier batches committed.

use anyhow::{Context, Result};
use flowcore_common::{ChannelId, ContactId, FlowId, SessionId, SessionStatus};
use sqlx::PgConnection;
use tracing::info;

use super::contact::clear_current_sessions;
use super::contact_fire::ContactFire;
use crate::runtime::Runtime;

/// Which waiting sessions a batch exits.
#[derive(Debug, Clone, Copy)]
pub enum ExitSelector<'a> {
    Sessions(&'a [SessionId]),
    Contacts(&'a [ContactId]),
}

/// Exit one batch of waiting sessions on the caller's transaction. Returns
/// the number of sessions that were actually still waiting.
pub async fn exit_batch(
    conn: &mut PgConnection,
    selector: ExitSelector<'_>,
    status: SessionStatus,
) -> Result<u64> {
    if status == SessionStatus::Waiting {
        anyhow::bail!("can't exit sessions to waiting");
    }

    let (sql, ids) = match selector {
        ExitSelector::Sessions(ids) => (
            r#"
            UPDATE flow_sessions
            SET status = $2, ended_on = NOW(), current_flow_id = NULL
            WHERE id = ANY($1) AND status = 'W'
            RETURNING id, contact_id
            "#,
            ids,
        ),
        ExitSelector::Contacts(ids) => (
            r#"
            UPDATE flow_sessions
            SET status = $2, ended_on = NOW(), current_flow_id = NULL
            WHERE contact_id = ANY($1) AND status = 'W'
            RETURNING id, contact_id
            "#,
            ids,
        ),
    };
    if ids.is_empty() {
        return Ok(0);
    }

    let exited: Vec<(SessionId, ContactId)> = sqlx::query_as(sql)
        .bind(ids)
        .bind(status.code())
        .fetch_all(&mut *conn)
        .await
        .context("error exiting sessions")?;
    if exited.is_empty() {
        return Ok(0);
    }
    let (session_ids, contact_ids): (Vec<SessionId>, Vec<ContactId>) =
        exited.into_iter().unzip();

    sqlx::query(
        r#"
        UPDATE flow_runs
        SET status = $2, exited_on = NOW(), modified_on = NOW()
        WHERE session_id = ANY($1) AND status IN ('A', 'W')
        "#,
    )
    .bind(&session_ids)
    .bind(status.run_status().code())
    .execute(&mut *conn)
    .await
    .context("error exiting session runs")?;

    // only contacts whose session actually matched
    clear_current_sessions(&mut *conn, &contact_ids).await?;
    ContactFire::delete_session_fires(&mut *conn, &contact_ids).await?;

    Ok(session_ids.len() as u64)
}

async fn exit_in_batches(
    rt: &Runtime,
    ids: &[i64],
    status: SessionStatus,
    by_contact: bool,
) -> Result<u64> {
    let mut total = 0;

    for chunk in ids.chunks(rt.config.interrupt_batch_size.max(1)) {
        let selector = if by_contact {
            ExitSelector::Contacts(chunk)
        } else {
            ExitSelector::Sessions(chunk)
        };

        let mut tx = rt.db.begin().await?;
        total += exit_batch(&mut *tx, selector, status).await?;
        tx.commit().await?;
    }

    Ok(total)
}

/// Exit the given sessions, those still waiting, with a terminal status.
pub async fn exit_sessions(
    rt: &Runtime,
    session_ids: &[SessionId],
    status: SessionStatus,
) -> Result<u64> {
    let exited = exit_in_batches(rt, session_ids, status, false).await?;
    info!(requested = session_ids.len(), exited, status = %status, "Exited sessions");
    Ok(exited)
}

pub async fn interrupt_sessions_for_contacts(
    rt: &Runtime,
    contact_ids: &[ContactId],
) -> Result<u64> {
    let interrupted =
        exit_in_batches(rt, contact_ids, SessionStatus::Interrupted, true).await?;
    info!(
        contacts = contact_ids.len(),
        interrupted, "Interrupted sessions for contacts"
    );
    Ok(interrupted)
}

/// Interrupt the waiting sessions of calls on a channel, e.g. when the
/// channel is being removed.
pub async fn interrupt_sessions_for_channel(rt: &Runtime, channel_id: ChannelId) -> Result<u64> {
    let session_ids: Vec<SessionId> = sqlx::query_scalar(
        r#"
        SELECT s.id
        FROM flow_sessions s
        JOIN calls c ON c.id = s.call_id
        WHERE s.status = 'W' AND c.channel_id = $1
        "#,
    )
    .bind(channel_id)
    .fetch_all(&rt.db)
    .await
    .context("error selecting sessions for channel")?;

    let interrupted =
        exit_in_batches(rt, &session_ids, SessionStatus::Interrupted, false).await?;
    info!(channel_id, interrupted, "Interrupted sessions for channel");
    Ok(interrupted)
}

/// Interrupt sessions currently waiting in any of the given flows.
pub async fn interrupt_sessions_for_flows(rt: &Runtime, flow_ids: &[FlowId]) -> Result<u64> {
    if flow_ids.is_empty() {
        return Ok(0);
    }

    let session_ids: Vec<SessionId> = sqlx::query_scalar(
        "SELECT id FROM flow_sessions WHERE status = 'W' AND current_flow_id = ANY($1)",
    )
    .bind(flow_ids)
    .fetch_all(&rt.db)
    .await
    .context("error selecting sessions for flows")?;

    let interrupted =
        exit_in_batches(rt, &session_ids, SessionStatus::Interrupted, false).await?;
    info!(flows = flow_ids.len(), interrupted, "Interrupted sessions for flows");
    Ok(interrupted)
}
