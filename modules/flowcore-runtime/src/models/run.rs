use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use flowcore_common::{
    ContactId, FlowId, FlowcoreError, OrgId, RunId, RunStatus, SessionId, StartId,
};
use flowcore_engine as engine;
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::assets::OrgAssets;

/// Map the engine's run status onto the persisted vocabulary.
pub fn run_status(status: engine::RunStatus) -> Result<RunStatus, FlowcoreError> {
    match status {
        engine::RunStatus::Active => Ok(RunStatus::Active),
        engine::RunStatus::Waiting => Ok(RunStatus::Waiting),
        engine::RunStatus::Completed => Ok(RunStatus::Completed),
        engine::RunStatus::Interrupted => Ok(RunStatus::Interrupted),
        engine::RunStatus::Expired => Ok(RunStatus::Expired),
        engine::RunStatus::Failed => Ok(RunStatus::Failed),
        engine::RunStatus::Unknown => Err(FlowcoreError::UnknownStatus("unknown".into())),
    }
}

/// Truncate to the microsecond precision Postgres stores, so times read back
/// compare equal to the ones written.
fn db_time(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(t.nanosecond() / 1_000 * 1_000).unwrap_or(t)
}

/// A persisted flow run.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRun {
    pub id: RunId,
    pub uuid: Uuid,
    pub status: RunStatus,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub exited_on: Option<DateTime<Utc>>,
    pub responded: bool,
    pub results: serde_json::Value,
    pub path: serde_json::Value,
    pub current_node_uuid: Option<Uuid>,
    pub contact_id: ContactId,
    pub flow_id: FlowId,
    pub org_id: OrgId,
    pub session_id: Option<SessionId>,
    pub start_id: Option<StartId>,
}

impl FlowRun {
    pub fn from_engine(
        oa: &OrgAssets,
        contact_id: ContactId,
        run: &engine::FlowRun,
        start_id: Option<StartId>,
    ) -> Result<Self> {
        Ok(Self {
            id: 0,
            uuid: run.uuid,
            status: run_status(run.status)?,
            created_on: db_time(run.created_on),
            modified_on: db_time(run.modified_on),
            exited_on: run.exited_on.map(db_time),
            responded: run.received_input(),
            results: serde_json::to_value(&run.results)?,
            path: serde_json::to_value(&run.path)?,
            current_node_uuid: run.current_node_uuid(),
            contact_id,
            flow_id: oa.flow_id(run.flow.uuid)?,
            org_id: oa.org_id(),
            session_id: None,
            start_id,
        })
    }

    pub async fn insert(conn: &mut PgConnection, runs: &[&FlowRun], batch_size: usize) -> Result<()> {
        for chunk in runs.chunks(batch_size.max(1)) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO flow_runs (uuid, status, created_on, modified_on, exited_on, responded, \
                 results, path, current_node_uuid, contact_id, flow_id, org_id, session_id, start_id) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.uuid)
                    .push_bind(r.status.code())
                    .push_bind(r.created_on)
                    .push_bind(r.modified_on)
                    .push_bind(r.exited_on)
                    .push_bind(r.responded)
                    .push_bind(r.results.clone())
                    .push_bind(r.path.clone())
                    .push_bind(r.current_node_uuid)
                    .push_bind(r.contact_id)
                    .push_bind(r.flow_id)
                    .push_bind(r.org_id)
                    .push_bind(r.session_id)
                    .push_bind(r.start_id);
            });

            qb.build()
                .execute(&mut *conn)
                .await
                .context("error inserting runs")?;
        }
        Ok(())
    }

    /// Write the new state of runs touched by a sprint. Once a run has
    /// responded it stays responded.
    pub async fn update<'c>(db: impl PgExecutor<'c>, runs: &[&FlowRun]) -> Result<()> {
        if runs.is_empty() {
            return Ok(());
        }

        let uuids: Vec<Uuid> = runs.iter().map(|r| r.uuid).collect();
        let statuses: Vec<&str> = runs.iter().map(|r| r.status.code()).collect();
        let modified: Vec<DateTime<Utc>> = runs.iter().map(|r| r.modified_on).collect();
        let exited: Vec<Option<DateTime<Utc>>> = runs.iter().map(|r| r.exited_on).collect();
        let responded: Vec<bool> = runs.iter().map(|r| r.responded).collect();
        let results: Vec<String> = runs.iter().map(|r| r.results.to_string()).collect();
        let paths: Vec<String> = runs.iter().map(|r| r.path.to_string()).collect();
        let nodes: Vec<Option<Uuid>> = runs.iter().map(|r| r.current_node_uuid).collect();

        sqlx::query(
            r#"
            UPDATE flow_runs r
            SET status = v.status,
                modified_on = v.modified_on,
                exited_on = v.exited_on,
                responded = r.responded OR v.responded,
                results = v.results::jsonb,
                path = v.path::jsonb,
                current_node_uuid = v.current_node_uuid
            FROM UNNEST($1::uuid[], $2::text[], $3::timestamptz[], $4::timestamptz[],
                        $5::bool[], $6::text[], $7::text[], $8::uuid[])
                AS v(uuid, status, modified_on, exited_on, responded, results, path, current_node_uuid)
            WHERE r.uuid = v.uuid
            "#,
        )
        .bind(&uuids)
        .bind(&statuses)
        .bind(&modified)
        .bind(&exited)
        .bind(&responded)
        .bind(&results)
        .bind(&paths)
        .bind(&nodes)
        .execute(db)
        .await
        .context("error updating runs")?;

        Ok(())
    }

    /// Modified times of a session's runs, so a later sprint can tell which
    /// runs it actually touched.
    pub async fn load_seen<'c>(
        db: impl PgExecutor<'c>,
        session_id: SessionId,
    ) -> Result<HashMap<Uuid, DateTime<Utc>>> {
        let rows: Vec<(Uuid, DateTime<Utc>)> =
            sqlx::query_as("SELECT uuid, modified_on FROM flow_runs WHERE session_id = $1")
                .bind(session_id)
                .fetch_all(db)
                .await
                .context("error loading session runs")?;

        Ok(rows.into_iter().collect())
    }

    pub async fn statuses_for_session<'c>(
        db: impl PgExecutor<'c>,
        session_id: SessionId,
    ) -> Result<Vec<(Uuid, RunStatus)>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT uuid, status FROM flow_runs WHERE session_id = $1 ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(db)
        .await?;

        rows.into_iter()
            .map(|(uuid, code)| -> Result<(Uuid, RunStatus)> {
                Ok((uuid, RunStatus::from_code(&code)?))
            })
            .collect()
    }
}
