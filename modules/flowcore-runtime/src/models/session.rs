//! Flow sessions.
//!
//! A session is persisted from the engine's snapshot after every sprint. New
//! sessions are written in bulk, a resumed session is updated on its own. In
//! both cases the runs, the contact's current session pointer and the
//! session's wait fires are written in the same transaction, then the
//! sprint's events go through the handler and pre-commit hook pipeline.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use flowcore_common::{
    CallId, ContactId, FireType, FlowId, FlowcoreError, OrgId, SessionId, SessionStatus,
    SessionStorageMode, SessionType, StartId,
};
use flowcore_engine::{self as engine, Contact, EventPayload, FlowSession, Sprint};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::call::Call;
use super::contact::{update_current_sessions, CurrentSession};
use super::contact_fire::ContactFire;
use super::run::FlowRun;
use crate::assets::OrgAssets;
use crate::hooks::apply_pre_commit_hooks;
use crate::runtime::Runtime;
use crate::scene::Scene;
use crate::storage::session_output_path;

pub fn session_status(status: engine::SessionStatus) -> Result<SessionStatus, FlowcoreError> {
    match status {
        engine::SessionStatus::Waiting => Ok(SessionStatus::Waiting),
        engine::SessionStatus::Completed => Ok(SessionStatus::Completed),
        engine::SessionStatus::Interrupted => Ok(SessionStatus::Interrupted),
        engine::SessionStatus::Expired => Ok(SessionStatus::Expired),
        engine::SessionStatus::Failed => Ok(SessionStatus::Failed),
        // an engine session only rests in a persistable state
        engine::SessionStatus::Active => Err(FlowcoreError::UnknownStatus("active".into())),
        engine::SessionStatus::Unknown => Err(FlowcoreError::UnknownStatus("unknown".into())),
    }
}

pub fn session_type(flow_type: engine::FlowType) -> Result<SessionType, FlowcoreError> {
    match flow_type {
        engine::FlowType::Messaging => Ok(SessionType::Messaging),
        engine::FlowType::MessagingBackground => Ok(SessionType::Background),
        engine::FlowType::Voice => Ok(SessionType::Voice),
        engine::FlowType::Unknown => Err(FlowcoreError::UnknownSessionType("unknown".into())),
    }
}

/// Fires to schedule for a sprint's wait, plus the timeout to hand courier
/// instead of a timeout fire when the prompt went out through courier.
pub fn get_new_fires(
    oa: &OrgAssets,
    contact_id: ContactId,
    session_uuid: Uuid,
    sprint: &Sprint,
    now: DateTime<Utc>,
) -> (Vec<ContactFire>, Option<Duration>) {
    let mut expires_on = None;
    let mut timeout_seconds = None;
    let mut courier_prompt = false;

    for event in &sprint.events {
        match &event.payload {
            EventPayload::MsgCreated { msg } => {
                courier_prompt = msg
                    .channel
                    .as_ref()
                    .and_then(|c| oa.channel(c.uuid))
                    .is_some_and(|c| c.is_courier());
            }
            EventPayload::MsgWait {
                timeout_seconds: t,
                expires_on: e,
            } => {
                timeout_seconds = *t;
                expires_on = *e;
            }
            EventPayload::DialWait { expires_on: e } => {
                timeout_seconds = None;
                expires_on = *e;
            }
            _ => {}
        }
    }

    let fire = |fire_type, fire_on| {
        ContactFire::for_session(
            oa.org_id(),
            contact_id,
            fire_type,
            session_uuid,
            sprint.uuid,
            fire_on,
        )
    };

    let mut fires = Vec::new();
    let mut timeout = None;

    if let Some(expires_on) = expires_on {
        fires.push(fire(FireType::WaitExpiration, expires_on));
    }
    if let Some(seconds) = timeout_seconds {
        let duration = Duration::seconds(seconds);
        if courier_prompt {
            timeout = Some(duration);
        } else {
            fires.push(fire(FireType::WaitTimeout, now + duration));
        }
    }

    (fires, timeout)
}

/// Flow of the innermost waiting run.
fn current_flow_id(runs: &[FlowRun]) -> Option<FlowId> {
    runs.iter()
        .rev()
        .find(|r| r.status == flowcore_common::RunStatus::Waiting)
        .map(|r| r.flow_id)
}

/// What the engine produced for one contact: the session snapshot and the
/// sprint that got it there.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub session: FlowSession,
    pub sprint: Sprint,
    pub call_id: Option<CallId>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    uuid: Uuid,
    session_type: SessionType,
    status: SessionStatus,
    last_sprint_uuid: Option<Uuid>,
    output: Option<String>,
    output_url: Option<String>,
    contact_id: ContactId,
    created_on: DateTime<Utc>,
    ended_on: Option<DateTime<Utc>>,
    current_flow_id: Option<FlowId>,
    call_id: Option<CallId>,

    org_id: OrgId,
    contact: Contact,
    start_id: Option<StartId>,
    runs: Vec<FlowRun>,
    seen_runs: HashMap<Uuid, DateTime<Utc>>,
    new_fires: Vec<ContactFire>,
    timeout: Option<Duration>,
    flow_session: Option<FlowSession>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    uuid: Uuid,
    session_type: String,
    status: String,
    last_sprint_uuid: Option<Uuid>,
    output: Option<String>,
    output_url: Option<String>,
    contact_id: i64,
    created_on: DateTime<Utc>,
    ended_on: Option<DateTime<Utc>>,
    current_flow_id: Option<i64>,
    call_id: Option<i64>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_sprint_uuid(&self) -> Option<Uuid> {
        self.last_sprint_uuid
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn output_url(&self) -> Option<&str> {
        self.output_url.as_deref()
    }

    pub fn contact_id(&self) -> ContactId {
        self.contact_id
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    pub fn ended_on(&self) -> Option<DateTime<Utc>> {
        self.ended_on
    }

    pub fn current_flow_id(&self) -> Option<FlowId> {
        self.current_flow_id
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    pub fn start_id(&self) -> Option<StartId> {
        self.start_id
    }

    pub fn runs(&self) -> &[FlowRun] {
        &self.runs
    }

    /// Fires computed from the last sprint.
    pub fn new_fires(&self) -> &[ContactFire] {
        &self.new_fires
    }

    /// Wait timeout tracked by courier rather than by a fire.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn flow_session(&self) -> Option<&FlowSession> {
        self.flow_session.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.status == SessionStatus::Waiting
    }

    /// Build a new session from the engine's snapshot after its first sprint.
    pub fn create(
        oa: &OrgAssets,
        fs: FlowSession,
        sprint: &Sprint,
        start_id: Option<StartId>,
        call_id: Option<CallId>,
    ) -> Result<Self> {
        let first_run = fs
            .runs
            .first()
            .ok_or_else(|| FlowcoreError::NoRuns(fs.uuid.to_string()))?;
        let created_on = first_run.created_on;

        let status = session_status(fs.status)?;
        let session_type = session_type(fs.session_type)?;
        let output = serde_json::to_string(&fs).context("error serializing session")?;

        let contact = fs.contact.clone();
        let runs = fs
            .runs
            .iter()
            .map(|r| FlowRun::from_engine(oa, contact.id, r, start_id))
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now();
        let (new_fires, timeout) = if status == SessionStatus::Waiting {
            get_new_fires(oa, contact.id, fs.uuid, sprint, now)
        } else {
            (vec![], None)
        };

        Ok(Self {
            id: 0,
            uuid: fs.uuid,
            session_type,
            status,
            last_sprint_uuid: Some(sprint.uuid),
            output: Some(output),
            output_url: None,
            contact_id: contact.id,
            created_on,
            ended_on: status.is_terminal().then_some(now),
            current_flow_id: current_flow_id(&runs),
            call_id,
            org_id: oa.org_id(),
            contact,
            start_id,
            runs,
            seen_runs: HashMap::new(),
            new_fires,
            timeout,
            flow_session: Some(fs),
        })
    }

    /// Move the output to object storage when configured to.
    async fn store_output(&mut self, rt: &Runtime, now: DateTime<Utc>) -> Result<()> {
        if rt.config.session_storage != SessionStorageMode::Storage {
            return Ok(());
        }
        let Some(output) = self.output.take() else {
            return Ok(());
        };

        let path = session_output_path(self.org_id, self.contact.uuid, self.uuid, now, &output);
        let url = rt
            .storage
            .put(&path, "application/json", output.into_bytes())
            .await
            .with_context(|| format!("error writing session {} to storage", self.uuid))?;

        self.output_url = Some(url);
        Ok(())
    }

    fn current_session(&self) -> CurrentSession {
        if self.is_waiting() {
            CurrentSession {
                current_session_uuid: Some(self.uuid),
                current_flow_id: self.current_flow_id,
            }
        } else {
            CurrentSession::default()
        }
    }

    /// Resume this waiting session with the engine's snapshot after a new
    /// sprint. Returns the scene, pre-commit hooks applied, for the caller to
    /// run post-commit hooks on once `conn`'s transaction commits.
    pub async fn update(
        mut self,
        rt: &Runtime,
        conn: &mut PgConnection,
        oa: &OrgAssets,
        fs: FlowSession,
        sprint: &Sprint,
    ) -> Result<Scene> {
        let now = Utc::now();

        self.status = session_status(fs.status)?;
        self.output = Some(serde_json::to_string(&fs).context("error serializing session")?);
        self.output_url = None;
        self.last_sprint_uuid = Some(sprint.uuid);
        self.ended_on = self.status.is_terminal().then_some(now);

        self.runs = fs
            .runs
            .iter()
            .map(|r| FlowRun::from_engine(oa, self.contact_id, r, None))
            .collect::<Result<Vec<_>>>()?;
        for run in &mut self.runs {
            run.session_id = Some(self.id);
        }
        self.current_flow_id = current_flow_id(&self.runs);

        (self.new_fires, self.timeout) = if self.is_waiting() {
            get_new_fires(oa, self.contact_id, self.uuid, sprint, now)
        } else {
            (vec![], None)
        };

        self.store_output(rt, now).await?;

        let result = sqlx::query(
            r#"
            UPDATE flow_sessions
            SET output = $2, output_url = $3, status = $4, last_sprint_uuid = $5,
                ended_on = $6, current_flow_id = $7
            WHERE id = $1 AND status = 'W'
            "#,
        )
        .bind(self.id)
        .bind(&self.output)
        .bind(&self.output_url)
        .bind(self.status.code())
        .bind(self.last_sprint_uuid)
        .bind(self.ended_on)
        .bind(self.current_flow_id)
        .execute(&mut *conn)
        .await
        .context("error updating session")?;

        if result.rows_affected() == 0 {
            return Err(FlowcoreError::SessionNotWaiting(self.uuid.to_string()).into());
        }

        // only runs this sprint created or touched get written
        let (new_runs, updated_runs): (Vec<&FlowRun>, Vec<&FlowRun>) = self
            .runs
            .iter()
            .filter(|r| self.seen_runs.get(&r.uuid).map_or(true, |seen| r.modified_on > *seen))
            .partition(|r| !self.seen_runs.contains_key(&r.uuid));

        debug!(
            session_uuid = %self.uuid,
            new = new_runs.len(),
            updated = updated_runs.len(),
            "Writing session runs"
        );
        FlowRun::insert(conn, &new_runs, rt.config.insert_batch_size).await?;
        FlowRun::update(&mut *conn, &updated_runs).await?;

        self.seen_runs = self.runs.iter().map(|r| (r.uuid, r.modified_on)).collect();

        update_current_sessions(&mut *conn, &[self.contact_id], &[self.current_session()]).await?;

        ContactFire::delete_session_fires(&mut *conn, &[self.contact_id]).await?;
        ContactFire::insert(conn, &self.new_fires, rt.config.insert_batch_size).await?;

        if self.status.is_terminal() {
            if let Some(call_id) = self.call_id {
                Call::mark_completed(&mut *conn, &[call_id], now).await?;
            }
        }

        self.flow_session = Some(fs);

        let mut scene = Scene::for_session(self);
        scene.add_events(rt, oa, &sprint.events)?;
        apply_pre_commit_hooks(rt, conn, oa, std::slice::from_ref(&scene)).await?;

        Ok(scene)
    }

    /// The contact's waiting session, if it has one, with its output loaded
    /// from storage if it was written there.
    pub async fn find_waiting_for_contact(
        rt: &Runtime,
        db: &PgPool,
        oa: &OrgAssets,
        contact: &Contact,
    ) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, uuid, session_type, status, last_sprint_uuid, output, output_url,
                   contact_id, created_on, ended_on, current_flow_id, call_id
            FROM flow_sessions
            WHERE contact_id = $1 AND status = 'W'
            ORDER BY created_on DESC
            LIMIT 1
            "#,
        )
        .bind(contact.id)
        .fetch_optional(db)
        .await
        .context("error loading waiting session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let output = match (&row.output, &row.output_url) {
            (_, Some(url)) => {
                let body = rt
                    .storage
                    .get(url)
                    .await
                    .with_context(|| format!("error reading session {} from storage", row.uuid))?;
                String::from_utf8(body).context("session output isn't valid UTF-8")?
            }
            (Some(output), None) => output.clone(),
            (None, None) => anyhow::bail!("session {} has no output", row.uuid),
        };
        let fs: FlowSession =
            serde_json::from_str(&output).context("error deserializing session output")?;

        let seen_runs = FlowRun::load_seen(db, row.id).await?;

        Ok(Some(Self {
            id: row.id,
            uuid: row.uuid,
            session_type: SessionType::from_code(&row.session_type)?,
            status: SessionStatus::from_code(&row.status)?,
            last_sprint_uuid: row.last_sprint_uuid,
            output: row.output,
            output_url: row.output_url,
            contact_id: row.contact_id,
            created_on: row.created_on,
            ended_on: row.ended_on,
            current_flow_id: row.current_flow_id,
            call_id: row.call_id,
            org_id: oa.org_id(),
            contact: contact.clone(),
            start_id: None,
            runs: vec![],
            seen_runs,
            new_fires: vec![],
            timeout: None,
            flow_session: Some(fs),
        }))
    }
}

/// Insert sessions of one kind. Ended sessions carry `ended_on`, waiting
/// ones leave it null.
async fn insert_session_rows(
    conn: &mut PgConnection,
    sessions: &[&Session],
    ended: bool,
    batch_size: usize,
) -> Result<Vec<(Uuid, SessionId)>> {
    let mut ids = Vec::with_capacity(sessions.len());

    for chunk in sessions.chunks(batch_size.max(1)) {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO flow_sessions (uuid, session_type, status, last_sprint_uuid, output, \
             output_url, contact_id, created_on, current_flow_id, call_id",
        );
        qb.push(if ended { ", ended_on) " } else { ") " });
        qb.push_values(chunk, |mut b, s| {
            b.push_bind(s.uuid)
                .push_bind(s.session_type.code())
                .push_bind(s.status.code())
                .push_bind(s.last_sprint_uuid)
                .push_bind(s.output.clone())
                .push_bind(s.output_url.clone())
                .push_bind(s.contact_id)
                .push_bind(s.created_on)
                .push_bind(s.current_flow_id)
                .push_bind(s.call_id);
            if ended {
                b.push_bind(s.ended_on);
            }
        });
        qb.push(" RETURNING uuid, id");

        let rows: Vec<(Uuid, SessionId)> = qb
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .context("error inserting sessions")?;
        ids.extend(rows);
    }

    Ok(ids)
}

/// Persist a batch of new sessions on `conn`'s transaction, then build each
/// contact's scene and apply pre-commit hooks across all of them.
pub async fn insert_sessions(
    rt: &Runtime,
    conn: &mut PgConnection,
    oa: &OrgAssets,
    outputs: Vec<SessionOutput>,
    start_id: Option<StartId>,
) -> Result<Vec<Scene>> {
    if outputs.is_empty() {
        return Ok(vec![]);
    }
    let now = Utc::now();
    let batch_size = rt.config.insert_batch_size;

    let mut sessions = Vec::with_capacity(outputs.len());
    let mut sprints = Vec::with_capacity(outputs.len());
    for output in outputs {
        let mut session =
            Session::create(oa, output.session, &output.sprint, start_id, output.call_id)?;
        session.store_output(rt, now).await?;
        sessions.push(session);
        sprints.push(output.sprint);
    }

    let (waiting, ended): (Vec<&Session>, Vec<&Session>) =
        sessions.iter().partition(|s| s.is_waiting());

    let mut ids: HashMap<Uuid, SessionId> = HashMap::with_capacity(sessions.len());
    ids.extend(insert_session_rows(conn, &waiting, false, batch_size).await?);
    ids.extend(insert_session_rows(conn, &ended, true, batch_size).await?);

    let ended_calls: Vec<CallId> = ended.iter().filter_map(|s| s.call_id).collect();
    let waiting_contacts: Vec<ContactId> = waiting.iter().map(|s| s.contact_id).collect();

    for session in &mut sessions {
        session.id = *ids
            .get(&session.uuid)
            .with_context(|| format!("no id returned for session {}", session.uuid))?;
        for run in &mut session.runs {
            run.session_id = Some(session.id);
        }
        session.seen_runs = session.runs.iter().map(|r| (r.uuid, r.modified_on)).collect();
    }

    let runs: Vec<&FlowRun> = sessions.iter().flat_map(|s| s.runs.iter()).collect();
    FlowRun::insert(conn, &runs, batch_size).await?;

    Call::mark_completed(&mut *conn, &ended_calls, now).await?;

    let contact_ids: Vec<ContactId> = sessions.iter().map(|s| s.contact_id).collect();
    let current: Vec<CurrentSession> = sessions.iter().map(|s| s.current_session()).collect();
    update_current_sessions(&mut *conn, &contact_ids, &current).await?;

    let stale = ContactFire::delete_session_fires(&mut *conn, &waiting_contacts).await?;
    if stale > 0 {
        error!(
            count = stale,
            contact_ids = ?waiting_contacts,
            "Deleted session fires for contacts that had no waiting session"
        );
    }

    let fires: Vec<ContactFire> = sessions
        .iter()
        .flat_map(|s| s.new_fires.iter().cloned())
        .collect();
    ContactFire::insert(conn, &fires, batch_size).await?;

    info!(
        waiting = waiting_contacts.len(),
        ended = sessions.len() - waiting_contacts.len(),
        fires = fires.len(),
        "Inserted sessions"
    );

    let mut scenes = Vec::with_capacity(sessions.len());
    for (session, sprint) in sessions.into_iter().zip(&sprints) {
        let mut scene = Scene::for_session(session);
        scene.add_events(rt, oa, &sprint.events)?;
        scenes.push(scene);
    }

    apply_pre_commit_hooks(rt, conn, oa, &scenes).await?;

    Ok(scenes)
}
