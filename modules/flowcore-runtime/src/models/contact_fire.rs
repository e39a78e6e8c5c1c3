//! Durable future wake-ups for contacts.
//!
//! At most one row exists per (contact, type, scope). Session fires are never
//! patched in place: they are deleted and recreated on every session write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flowcore_common::{
    CampaignEventId, ContactId, FireId, FireType, FlowcoreError, OrgId,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct ContactFire {
    /// Zero until the row is inserted.
    pub id: FireId,
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub fire_type: FireType,
    pub scope: String,
    pub extra: Option<serde_json::Value>,
    pub fire_on: DateTime<Utc>,
}

/// Payload carried by wait expiration and timeout fires, so a consumer can
/// tell whether the session it belongs to has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFireExtra {
    pub session_uuid: Uuid,
    pub sprint_uuid: Uuid,
}

#[derive(sqlx::FromRow)]
struct FireRow {
    id: i64,
    org_id: i64,
    contact_id: i64,
    fire_type: String,
    scope: String,
    extra: Option<serde_json::Value>,
    fire_on: DateTime<Utc>,
}

impl TryFrom<FireRow> for ContactFire {
    type Error = FlowcoreError;

    fn try_from(row: FireRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            contact_id: row.contact_id,
            fire_type: FireType::from_code(&row.fire_type)?,
            scope: row.scope,
            extra: row.extra,
            fire_on: row.fire_on,
        })
    }
}

impl ContactFire {
    pub fn new(
        org_id: OrgId,
        contact_id: ContactId,
        fire_type: FireType,
        scope: impl Into<String>,
        extra: Option<serde_json::Value>,
        fire_on: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            org_id,
            contact_id,
            fire_type,
            scope: scope.into(),
            extra,
            fire_on,
        }
    }

    pub fn for_session(
        org_id: OrgId,
        contact_id: ContactId,
        fire_type: FireType,
        session_uuid: Uuid,
        sprint_uuid: Uuid,
        fire_on: DateTime<Utc>,
    ) -> Self {
        let extra = SessionFireExtra {
            session_uuid,
            sprint_uuid,
        };
        Self::new(
            org_id,
            contact_id,
            fire_type,
            "",
            serde_json::to_value(extra).ok(),
            fire_on,
        )
    }

    pub fn for_campaign(
        org_id: OrgId,
        contact_id: ContactId,
        event_id: CampaignEventId,
        fire_on: DateTime<Utc>,
    ) -> Self {
        Self::new(
            org_id,
            contact_id,
            FireType::Campaign,
            event_id.to_string(),
            None,
            fire_on,
        )
    }

    pub fn session_extra(&self) -> Option<SessionFireExtra> {
        self.extra
            .as_ref()
            .and_then(|e| serde_json::from_value(e.clone()).ok())
    }

    /// Multi-row insert, `batch_size` rows per statement. Rows colliding with
    /// an existing (contact, type, scope) are skipped. Returns rows inserted.
    pub async fn insert(
        conn: &mut PgConnection,
        fires: &[ContactFire],
        batch_size: usize,
    ) -> Result<u64> {
        let mut inserted = 0;

        for chunk in fires.chunks(batch_size.max(1)) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO contact_fires (org_id, contact_id, fire_type, scope, extra, fire_on) ",
            );
            qb.push_values(chunk, |mut b, fire| {
                b.push_bind(fire.org_id)
                    .push_bind(fire.contact_id)
                    .push_bind(fire.fire_type.code())
                    .push_bind(fire.scope.clone())
                    .push_bind(fire.extra.clone())
                    .push_bind(fire.fire_on);
            });
            qb.push(" ON CONFLICT (contact_id, fire_type, scope) DO NOTHING");

            let result = qb
                .build()
                .execute(&mut *conn)
                .await
                .context("error inserting contact fires")?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    /// Delete fires of the given types for the given contacts.
    pub async fn delete_for_contacts<'c>(
        db: impl PgExecutor<'c>,
        contact_ids: &[ContactId],
        types: &[FireType],
    ) -> Result<u64> {
        if contact_ids.is_empty() {
            return Ok(0);
        }
        let codes: Vec<&str> = types.iter().map(|t| t.code()).collect();

        let result = sqlx::query(
            "DELETE FROM contact_fires WHERE contact_id = ANY($1) AND fire_type = ANY($2)",
        )
        .bind(contact_ids)
        .bind(&codes)
        .execute(db)
        .await
        .context("error deleting contact fires")?;

        Ok(result.rows_affected())
    }

    /// Delete the wait expiration and timeout fires for the given contacts.
    pub async fn delete_session_fires<'c>(
        db: impl PgExecutor<'c>,
        contact_ids: &[ContactId],
    ) -> Result<u64> {
        Self::delete_for_contacts(db, contact_ids, &FireType::SESSION).await
    }

    /// Delete specific fires, typically after a scheduler has handled them.
    pub async fn delete<'c>(db: impl PgExecutor<'c>, fires: &[ContactFire]) -> Result<u64> {
        let ids: Vec<FireId> = fires.iter().map(|f| f.id).collect();

        let result = sqlx::query("DELETE FROM contact_fires WHERE id = ANY($1)")
            .bind(&ids)
            .execute(db)
            .await
            .context("error deleting contact fires")?;

        Ok(result.rows_affected())
    }

    /// Fires due now or earlier, oldest first.
    pub async fn load_due<'c>(db: impl PgExecutor<'c>, limit: i64) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, FireRow>(
            r#"
            SELECT id, org_id, contact_id, fire_type, scope, extra, fire_on
            FROM contact_fires
            WHERE fire_on <= NOW()
            ORDER BY fire_on ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(db)
        .await
        .context("error loading due contact fires")?;

        rows.into_iter()
            .map(|r| ContactFire::try_from(r).map_err(Into::into))
            .collect()
    }

    pub async fn find_for_contact<'c>(
        db: impl PgExecutor<'c>,
        contact_id: ContactId,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, FireRow>(
            r#"
            SELECT id, org_id, contact_id, fire_type, scope, extra, fire_on
            FROM contact_fires
            WHERE contact_id = $1
            ORDER BY fire_type, scope
            "#,
        )
        .bind(contact_id)
        .fetch_all(db)
        .await?;

        rows.into_iter()
            .map(|r| ContactFire::try_from(r).map_err(Into::into))
            .collect()
    }
}
