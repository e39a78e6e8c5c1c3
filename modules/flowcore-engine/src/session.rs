use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flowcore_common::{ContactId, ContactStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Event, EventPayload, FlowRef};

/// Session type as the engine names it. Unrecognised values deserialize to
/// `Unknown` and are rejected when the session is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Messaging,
    MessagingBackground,
    Voice,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    Completed,
    Interrupted,
    Expired,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Waiting,
    Completed,
    Interrupted,
    Expired,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub uuid: Uuid,
    pub id: ContactId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    pub status: ContactStatus,
}

/// One visit to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub uuid: Uuid,
    pub node_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_uuid: Option<Uuid>,
    pub arrived_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub category: Option<String>,
    pub node_uuid: Uuid,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRun {
    pub uuid: Uuid,
    pub flow: FlowRef,
    pub status: RunStatus,
    #[serde(default)]
    pub path: Vec<Step>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub results: BTreeMap<String, RunResult>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    #[serde(default)]
    pub exited_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_uuid: Option<Uuid>,
}

impl FlowRun {
    /// Whether a message was received at any point in this run.
    pub fn received_input(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::MsgReceived { .. }))
    }

    pub fn current_node_uuid(&self) -> Option<Uuid> {
        self.path.last().map(|s| s.node_uuid)
    }
}

/// Full engine session snapshot. This is what gets serialized into
/// `flow_sessions.output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSession {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub session_type: FlowType,
    pub status: SessionStatus,
    pub contact: Contact,
    #[serde(default)]
    pub runs: Vec<FlowRun>,
}

impl FlowSession {
    /// Locate the run and step a step UUID belongs to.
    pub fn find_step(&self, step_uuid: Uuid) -> Option<(&FlowRun, &Step)> {
        self.runs.iter().find_map(|run| {
            run.path
                .iter()
                .find(|s| s.uuid == step_uuid)
                .map(|step| (run, step))
        })
    }
}

/// The events produced by one engine step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub uuid: Uuid,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Sprint {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with_steps(steps: Vec<Step>) -> FlowRun {
        let now = Utc::now();
        FlowRun {
            uuid: Uuid::new_v4(),
            flow: FlowRef {
                uuid: Uuid::new_v4(),
                name: "Registration".into(),
            },
            status: RunStatus::Waiting,
            path: steps,
            events: vec![],
            results: BTreeMap::new(),
            created_on: now,
            modified_on: now,
            exited_on: None,
            parent_uuid: None,
        }
    }

    fn step() -> Step {
        Step {
            uuid: Uuid::new_v4(),
            node_uuid: Uuid::new_v4(),
            exit_uuid: None,
            arrived_on: Utc::now(),
        }
    }

    #[test]
    fn find_step_searches_every_run() {
        let (a, b) = (step(), step());
        let (a_uuid, b_uuid) = (a.uuid, b.uuid);
        let session = FlowSession {
            uuid: Uuid::new_v4(),
            session_type: FlowType::Messaging,
            status: SessionStatus::Waiting,
            contact: Contact {
                uuid: Uuid::new_v4(),
                id: 1,
                name: None,
                language: None,
                status: ContactStatus::Active,
            },
            runs: vec![run_with_steps(vec![a]), run_with_steps(vec![b])],
        };

        let (run, found) = session.find_step(b_uuid).unwrap();
        assert_eq!(found.uuid, b_uuid);
        assert_eq!(run.uuid, session.runs[1].uuid);
        assert!(session.find_step(a_uuid).is_some());
        assert!(session.find_step(Uuid::new_v4()).is_none());
    }

    #[test]
    fn unknown_session_type_deserializes_as_unknown() {
        let t: FlowType = serde_json::from_str("\"messaging_offline\"").unwrap();
        assert_eq!(t, FlowType::Unknown);
    }

    #[test]
    fn current_node_is_last_step() {
        let steps = vec![step(), step()];
        let last = steps[1].node_uuid;
        assert_eq!(run_with_steps(steps).current_node_uuid(), Some(last));
        assert_eq!(run_with_steps(vec![]).current_node_uuid(), None);
    }
}
