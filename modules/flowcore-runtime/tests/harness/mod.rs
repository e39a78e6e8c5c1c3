//! Shared fixtures for integration tests.
//!
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are
//! skipped. Every test creates its own org and contacts, so tests can share
//! a database and run concurrently without truncating anything.

#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use flowcore_common::{ChannelId, Config, ContactId, ContactStatus, FlowId, GroupId, OrgId};
use flowcore_engine::{
    ChannelRef, Contact, Event, EventPayload, FlowRef, FlowRun, FlowSession, FlowType, MsgOut,
    RunStatus, SessionStatus, Sprint, Step,
};
use flowcore_runtime::assets::Channel;
use flowcore_runtime::models::{ContactFire, SessionOutput};
use flowcore_runtime::{OrgAssets, Runtime};
use sqlx::PgPool;
use uuid::Uuid;

/// Get a migrated test database pool, or skip if no test DB is available.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    flowcore_runtime::MIGRATOR.run(&pool).await.ok()?;
    Some(pool)
}

pub fn runtime(pool: &PgPool) -> Runtime {
    Runtime::in_memory(pool.clone(), Config::default())
}

pub struct TestFlow {
    pub uuid: Uuid,
    pub id: FlowId,
}

pub struct TestOrg {
    pub id: OrgId,
    pub oa: OrgAssets,
    pub favorites: TestFlow,
    pub pick_a_number: TestFlow,
    pub android: Uuid,
    pub courier: Uuid,
    pub courier_id: ChannelId,
    pub testers: (Uuid, GroupId),
}

async fn create_flow(pool: &PgPool, org_id: OrgId, name: &str) -> TestFlow {
    let uuid = Uuid::new_v4();
    let id: FlowId =
        sqlx::query_scalar("INSERT INTO flows (uuid, org_id, name) VALUES ($1, $2, $3) RETURNING id")
            .bind(uuid)
            .bind(org_id)
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap();
    TestFlow { uuid, id }
}

async fn create_channel(pool: &PgPool, org_id: OrgId, channel_type: &str) -> Channel {
    let uuid = Uuid::new_v4();
    let id: ChannelId = sqlx::query_scalar(
        "INSERT INTO channels (uuid, org_id, channel_type, name) VALUES ($1, $2, $3, $3) RETURNING id",
    )
    .bind(uuid)
    .bind(org_id)
    .bind(channel_type)
    .fetch_one(pool)
    .await
    .unwrap();
    Channel {
        id,
        uuid,
        channel_type: channel_type.to_string(),
    }
}

pub async fn create_org(pool: &PgPool) -> TestOrg {
    let id: OrgId = sqlx::query_scalar(
        "INSERT INTO orgs (name, timezone) VALUES ('Test Org', 'America/New_York') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let favorites = create_flow(pool, id, "Favorites").await;
    let pick_a_number = create_flow(pool, id, "Pick a Number").await;
    let android = create_channel(pool, id, "A").await;
    let courier = create_channel(pool, id, "TG").await;

    let group_uuid = Uuid::new_v4();
    let group_id: GroupId = sqlx::query_scalar(
        "INSERT INTO contact_groups (uuid, org_id, name) VALUES ($1, $2, 'Testers') RETURNING id",
    )
    .bind(group_uuid)
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap();

    let oa = OrgAssets::new(id, chrono_tz::America::New_York)
        .with_flow(favorites.uuid, favorites.id)
        .with_flow(pick_a_number.uuid, pick_a_number.id)
        .with_channel(android.clone())
        .with_channel(courier.clone())
        .with_group(group_uuid, group_id);

    TestOrg {
        id,
        oa,
        favorites,
        pick_a_number,
        android: android.uuid,
        courier: courier.uuid,
        courier_id: courier.id,
        testers: (group_uuid, group_id),
    }
}

pub async fn create_contact(pool: &PgPool, org: &TestOrg, name: &str) -> Contact {
    let uuid = Uuid::new_v4();
    let id: ContactId = sqlx::query_scalar(
        "INSERT INTO contacts (uuid, org_id, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(uuid)
    .bind(org.id)
    .bind(name)
    .fetch_one(pool)
    .await
    .unwrap();

    Contact {
        uuid,
        id,
        name: Some(name.to_string()),
        language: None,
        status: ContactStatus::Active,
    }
}

pub async fn create_call(pool: &PgPool, org: &TestOrg, contact: &Contact) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO calls (org_id, channel_id, contact_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(org.id)
    .bind(org.courier_id)
    .bind(contact.id)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// The current time at the precision Postgres stores.
pub fn now() -> DateTime<Utc> {
    let t = Utc::now();
    t.with_nanosecond(t.nanosecond() / 1_000 * 1_000).unwrap()
}

pub fn run(flow: &TestFlow, status: RunStatus) -> FlowRun {
    let now = now();
    FlowRun {
        uuid: Uuid::new_v4(),
        flow: FlowRef {
            uuid: flow.uuid,
            name: "Flow".into(),
        },
        status,
        path: vec![Step {
            uuid: Uuid::new_v4(),
            node_uuid: Uuid::new_v4(),
            exit_uuid: None,
            arrived_on: now,
        }],
        events: vec![],
        results: BTreeMap::new(),
        created_on: now,
        modified_on: now,
        exited_on: None,
        parent_uuid: None,
    }
}

pub fn session(contact: &Contact, status: SessionStatus, runs: Vec<FlowRun>) -> FlowSession {
    FlowSession {
        uuid: Uuid::new_v4(),
        session_type: FlowType::Messaging,
        status,
        contact: contact.clone(),
        runs,
    }
}

pub fn msg_wait(expires_on: DateTime<Utc>, timeout_seconds: Option<i64>) -> Event {
    Event::new(EventPayload::MsgWait {
        timeout_seconds,
        expires_on: Some(expires_on),
    })
}

pub fn msg_created(channel: Uuid, text: &str) -> Event {
    Event::new(EventPayload::MsgCreated {
        msg: MsgOut {
            uuid: Uuid::new_v4(),
            urn: Some("tel:+16055741111".into()),
            channel: Some(ChannelRef {
                uuid: channel,
                name: "Channel".into(),
            }),
            text: text.into(),
        },
    })
}

/// A waiting session in one flow whose sprint waits for `expires_in`.
pub fn waiting_output(org: &TestOrg, contact: &Contact, expires_in: Duration) -> SessionOutput {
    SessionOutput {
        session: session(
            contact,
            SessionStatus::Waiting,
            vec![run(&org.favorites, RunStatus::Waiting)],
        ),
        sprint: Sprint::new(vec![msg_wait(now() + expires_in, None)]),
        call_id: None,
    }
}

pub fn completed_output(org: &TestOrg, contact: &Contact) -> SessionOutput {
    SessionOutput {
        session: session(
            contact,
            SessionStatus::Completed,
            vec![run(&org.favorites, RunStatus::Completed)],
        ),
        sprint: Sprint::new(vec![]),
        call_id: None,
    }
}

pub async fn waiting_count(pool: &PgPool, contact_id: ContactId) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM flow_sessions WHERE contact_id = $1 AND status = 'W'")
        .bind(contact_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn session_status(pool: &PgPool, session_uuid: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM flow_sessions WHERE uuid = $1")
        .bind(session_uuid)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn run_statuses(pool: &PgPool, session_uuid: Uuid) -> Vec<String> {
    sqlx::query_scalar(
        r#"
        SELECT r.status FROM flow_runs r
        JOIN flow_sessions s ON s.id = r.session_id
        WHERE s.uuid = $1
        ORDER BY r.id
        "#,
    )
    .bind(session_uuid)
    .fetch_all(pool)
    .await
    .unwrap()
}

pub async fn fires(pool: &PgPool, contact_id: ContactId) -> Vec<ContactFire> {
    ContactFire::find_for_contact(pool, contact_id).await.unwrap()
}
