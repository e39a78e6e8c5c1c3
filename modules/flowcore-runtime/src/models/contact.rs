//! The contact rows sessions touch: loading the engine's view of a contact
//! and keeping the current session pointer in step with session status.

use anyhow::{Context, Result};
use flowcore_common::{ContactId, ContactStatus, FlowId};
use flowcore_engine::Contact;
use sqlx::PgExecutor;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: i64,
    uuid: Uuid,
    name: Option<String>,
    language: Option<String>,
    status: String,
}

pub async fn load_contact<'c>(db: impl PgExecutor<'c>, id: ContactId) -> Result<Option<Contact>> {
    let row = sqlx::query_as::<_, ContactRow>(
        "SELECT id, uuid, name, language, status FROM contacts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("error loading contact")?;

    row.map(|r| -> Result<Contact> {
        Ok(Contact {
            uuid: r.uuid,
            id: r.id,
            name: r.name,
            language: r.language,
            status: ContactStatus::from_code(&r.status)?,
        })
    })
    .transpose()
}

/// Where a contact currently is, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::FromRow)]
pub struct CurrentSession {
    pub current_session_uuid: Option<Uuid>,
    pub current_flow_id: Option<FlowId>,
}

pub async fn load_current_session<'c>(
    db: impl PgExecutor<'c>,
    id: ContactId,
) -> Result<CurrentSession> {
    let current = sqlx::query_as::<_, CurrentSession>(
        "SELECT current_session_uuid, current_flow_id FROM contacts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;

    Ok(current.unwrap_or_default())
}

/// Point each contact at its session. `None` values clear the pointer.
pub async fn update_current_sessions<'c>(
    db: impl PgExecutor<'c>,
    contact_ids: &[ContactId],
    current: &[CurrentSession],
) -> Result<()> {
    if contact_ids.is_empty() {
        return Ok(());
    }
    let sessions: Vec<Option<Uuid>> = current.iter().map(|c| c.current_session_uuid).collect();
    let flows: Vec<Option<FlowId>> = current.iter().map(|c| c.current_flow_id).collect();

    sqlx::query(
        r#"
        UPDATE contacts c
        SET current_session_uuid = v.session_uuid, current_flow_id = v.flow_id, modified_on = NOW()
        FROM UNNEST($1::bigint[], $2::uuid[], $3::bigint[]) AS v(id, session_uuid, flow_id)
        WHERE c.id = v.id
        "#,
    )
    .bind(contact_ids)
    .bind(&sessions)
    .bind(&flows)
    .execute(db)
    .await
    .context("error updating contact current sessions")?;

    Ok(())
}

pub async fn clear_current_sessions<'c>(
    db: impl PgExecutor<'c>,
    contact_ids: &[ContactId],
) -> Result<()> {
    if contact_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE contacts
        SET current_session_uuid = NULL, current_flow_id = NULL, modified_on = NOW()
        WHERE id = ANY($1)
        "#,
    )
    .bind(contact_ids)
    .execute(db)
    .await
    .context("error clearing contact current sessions")?;

    Ok(())
}
