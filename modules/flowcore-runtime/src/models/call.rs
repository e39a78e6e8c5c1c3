use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flowcore_common::{CallId, ChannelId, ContactId};
use sqlx::PgExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    InProgress,
    Completed,
}

impl CallStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InProgress => "I",
            Self::Completed => "D",
        }
    }
}

/// An IVR call a voice session is attached to.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Call {
    pub id: CallId,
    pub channel_id: ChannelId,
    pub contact_id: ContactId,
    pub status: String,
    pub ended_on: Option<DateTime<Utc>>,
}

impl Call {
    pub async fn find<'c>(db: impl PgExecutor<'c>, id: CallId) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, channel_id, contact_id, status, ended_on FROM calls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("error loading call")
    }

    pub fn is_completed(&self) -> bool {
        self.status == CallStatus::Completed.code()
    }

    /// Mark the calls of sessions that just ended as completed.
    pub async fn mark_completed<'c>(
        db: impl PgExecutor<'c>,
        ids: &[CallId],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("UPDATE calls SET status = $2, ended_on = $3 WHERE id = ANY($1)")
            .bind(ids)
            .bind(CallStatus::Completed.code())
            .bind(now)
            .execute(db)
            .await
            .context("error marking calls completed")?;

        Ok(result.rows_affected())
    }
}
