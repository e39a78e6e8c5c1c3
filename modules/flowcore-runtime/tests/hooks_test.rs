//! Integration tests for commit hook dispatch.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

mod harness;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use flowcore_common::{Config, ContactId, ContactStatus, GroupId};
use flowcore_engine::{Contact, Event, EventPayload, FieldRef, GroupRef, MsgIn};
use flowcore_runtime::{
    apply_post_commit_hooks, apply_pre_commit_hooks, CommitHook, HookId, HookRegistry, OrgAssets,
    Runtime, Scene, SceneItems,
};
use harness::*;
use serde_json::json;
use sqlx::{PgConnection, PgPool};

/// Records the order hooks are applied in.
struct RecordingHook {
    id: HookId,
    order: i32,
    applied: Arc<Mutex<Vec<HookId>>>,
}

#[async_trait]
impl CommitHook for RecordingHook {
    fn id(&self) -> HookId {
        self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        _conn: &mut PgConnection,
        _oa: &OrgAssets,
        _scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        self.applied.lock().unwrap().push(self.id);
        Ok(())
    }
}

/// Renames every contact it's given, failing the whole call if one of them
/// is the poisoned contact.
struct RenameHook {
    poisoned: ContactId,
}

const RENAME: HookId = HookId("rename");

#[async_trait]
impl CommitHook for RenameHook {
    fn id(&self) -> HookId {
        RENAME
    }

    fn order(&self) -> i32 {
        1
    }

    async fn apply(
        &self,
        _rt: &Runtime,
        conn: &mut PgConnection,
        _oa: &OrgAssets,
        scenes: &[SceneItems<'_>],
    ) -> Result<()> {
        for s in scenes {
            let name = s.last_of::<String>().cloned().unwrap_or_default();
            sqlx::query("UPDATE contacts SET name = $2 WHERE id = $1")
                .bind(s.scene.contact_id())
                .bind(name)
                .execute(&mut *conn)
                .await?;
            if s.scene.contact_id() == self.poisoned {
                anyhow::bail!("can't rename contact {}", self.poisoned);
            }
        }
        Ok(())
    }
}

async fn contact_name(pool: &PgPool, id: ContactId) -> Option<String> {
    sqlx::query_scalar("SELECT name FROM contacts WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn pre_commit_hooks_run_in_order_on_the_callers_transaction() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let org = create_org(&pool).await;
    let contact = create_contact(&pool, &org, "Ann").await;

    let applied = Arc::new(Mutex::new(Vec::new()));
    let mut registry = HookRegistry::new();
    for (name, order) in [("third", 3), ("first", 1), ("second", 2)] {
        registry.register(RecordingHook {
            id: HookId(name),
            order,
            applied: applied.clone(),
        });
    }
    let rt = runtime(&pool).with_hooks(registry);

    let mut scene = Scene::new(contact, None);
    scene.attach_pre_commit_hook(HookId("third"), ());
    scene.attach_pre_commit_hook(HookId("first"), ());
    scene.attach_pre_commit_hook(HookId("second"), ());

    let mut tx = pool.begin().await.unwrap();
    apply_pre_commit_hooks(&rt, &mut *tx, &org.oa, std::slice::from_ref(&scene))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        *applied.lock().unwrap(),
        vec![HookId("first"), HookId("second"), HookId("third")]
    );
}

#[tokio::test]
async fn post_commit_failure_only_drops_the_failing_scene() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let org = create_org(&pool).await;
    let ann = create_contact(&pool, &org, "Ann").await;
    let bob = create_contact(&pool, &org, "Bob").await;
    let cat = create_contact(&pool, &org, "Cat").await;

    let mut registry = HookRegistry::new();
    registry.register(RenameHook { poisoned: bob.id });
    let config = Config {
        post_commit_timeout_per_scene: std::time::Duration::from_secs(5),
        post_commit_scene_timeout: std::time::Duration::from_secs(5),
        ..Config::default()
    };
    let rt = Runtime::in_memory(pool.clone(), config).with_hooks(registry);

    let scenes: Vec<Scene> = [&ann, &bob, &cat]
        .into_iter()
        .map(|c| {
            let mut scene = Scene::new(c.clone(), None);
            scene.attach_post_commit_hook(RENAME, format!("{} (renamed)", c.id));
            scene
        })
        .collect();

    let outcome = apply_post_commit_hooks(&rt, &org.oa, &scenes).await;

    assert!(!outcome.batched);
    assert_eq!(outcome.failed, vec![1]);
    assert_eq!(
        contact_name(&pool, ann.id).await,
        Some(format!("{} (renamed)", ann.id))
    );
    assert_eq!(contact_name(&pool, bob.id).await, Some("Bob".to_string()));
    assert_eq!(
        contact_name(&pool, cat.id).await,
        Some(format!("{} (renamed)", cat.id))
    );
}

#[tokio::test]
async fn failing_pre_commit_hook_rolls_back_the_transaction() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let org = create_org(&pool).await;
    let ann = create_contact(&pool, &org, "Ann").await;

    let mut registry = HookRegistry::new();
    registry.register(RenameHook { poisoned: ann.id });
    let rt = runtime(&pool).with_hooks(registry);

    let mut scene = Scene::new(ann.clone(), None);
    scene.attach_pre_commit_hook(RENAME, "Annie".to_string());

    let mut tx = pool.begin().await.unwrap();
    let result =
        apply_pre_commit_hooks(&rt, &mut *tx, &org.oa, std::slice::from_ref(&scene)).await;
    assert!(result.is_err());
    drop(tx);

    assert_eq!(contact_name(&pool, ann.id).await, Some("Ann".to_string()));
}

// =========================================================================
// Contact hooks, end to end through handlers
// =========================================================================

fn events_scene(rt: &Runtime, oa: &OrgAssets, contact: &Contact, events: Vec<Event>) -> Scene {
    let mut scene = Scene::new(contact.clone(), None);
    scene.add_events(rt, oa, &events).unwrap();
    scene
}

#[tokio::test]
async fn contact_changes_are_written_in_one_pass() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let rt = runtime(&pool);
    let org = create_org(&pool).await;
    let ann = create_contact(&pool, &org, "Ann").await;
    let bob = create_contact(&pool, &org, "Bob").await;
    let (group_uuid, group_id) = org.testers;

    let seen = now() - Duration::minutes(1);
    let mut received = Event::new(EventPayload::MsgReceived {
        msg: MsgIn {
            uuid: uuid::Uuid::new_v4(),
            urn: None,
            channel: None,
            text: "hi".into(),
        },
    });
    received.created_on = seen;

    let field = |key: &str, value: Option<serde_json::Value>| {
        Event::new(EventPayload::ContactFieldChanged {
            field: FieldRef {
                key: key.into(),
                name: key.into(),
            },
            value,
        })
    };

    let scenes = vec![
        events_scene(
            &rt,
            &org.oa,
            &ann,
            vec![
                Event::new(EventPayload::ContactNameChanged {
                    name: "Annie".into(),
                }),
                Event::new(EventPayload::ContactLanguageChanged {
                    language: "spa".into(),
                }),
                field("age", Some(json!("23"))),
                field("state", Some(json!("Kigali"))),
                Event::new(EventPayload::ContactGroupsChanged {
                    groups_added: vec![GroupRef {
                        uuid: group_uuid,
                        name: "Testers".into(),
                    }],
                    groups_removed: vec![],
                }),
                received,
            ],
        ),
        events_scene(
            &rt,
            &org.oa,
            &bob,
            vec![
                Event::new(EventPayload::ContactStatusChanged {
                    status: ContactStatus::Blocked,
                }),
                Event::new(EventPayload::ContactNameChanged { name: String::new() }),
            ],
        ),
    ];

    let mut tx = pool.begin().await.unwrap();
    apply_pre_commit_hooks(&rt, &mut *tx, &org.oa, &scenes)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    type ContactRow = (
        Option<String>,
        Option<String>,
        String,
        serde_json::Value,
        Option<chrono::DateTime<chrono::Utc>>,
    );
    let load = |id: ContactId| {
        let pool = pool.clone();
        async move {
            sqlx::query_as::<_, ContactRow>(
                "SELECT name, language, status, fields, last_seen_on FROM contacts WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap()
        }
    };

    let (name, language, status, fields, last_seen) = load(ann.id).await;
    assert_eq!(name.as_deref(), Some("Annie"));
    assert_eq!(language.as_deref(), Some("spa"));
    assert_eq!(status, "A");
    assert_eq!(fields, json!({"age": "23", "state": "Kigali"}));
    assert_eq!(last_seen, Some(seen));

    let (name, _, status, _, _) = load(bob.id).await;
    assert_eq!(name, None);
    assert_eq!(status, "B");

    let groups: Vec<GroupId> = sqlx::query_scalar(
        "SELECT group_id FROM contact_groups_contacts WHERE contact_id = $1",
    )
    .bind(ann.id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(groups, vec![group_id]);

    // clearing a field and leaving the group
    let scenes = vec![events_scene(
        &rt,
        &org.oa,
        &ann,
        vec![
            field("age", None),
            Event::new(EventPayload::ContactGroupsChanged {
                groups_added: vec![],
                groups_removed: vec![GroupRef {
                    uuid: group_uuid,
                    name: "Testers".into(),
                }],
            }),
        ],
    )];
    let mut tx = pool.begin().await.unwrap();
    apply_pre_commit_hooks(&rt, &mut *tx, &org.oa, &scenes)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let (_, _, _, fields, _) = load(ann.id).await;
    assert_eq!(fields, json!({"state": "Kigali"}));
    let in_group: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM contact_groups_contacts WHERE contact_id = $1)",
    )
    .bind(ann.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!in_group);
}
