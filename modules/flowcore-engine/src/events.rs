//! Engine events. Serialized with a `type` tag so the registry can key
//! handlers on the same string the engine writes.

use chrono::{DateTime, Utc};
use flowcore_common::ContactStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRef {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub key: String,
    pub name: String,
}

/// An outgoing message, already rendered by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgOut {
    pub uuid: Uuid,
    #[serde(default)]
    pub urn: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgIn {
    pub uuid: Uuid,
    #[serde(default)]
    pub urn: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    pub text: String,
}

/// An event produced during a sprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub created_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_uuid: Option<Uuid>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    MsgCreated {
        msg: MsgOut,
    },
    MsgReceived {
        msg: MsgIn,
    },
    MsgWait {
        #[serde(default)]
        timeout_seconds: Option<i64>,
        #[serde(default)]
        expires_on: Option<DateTime<Utc>>,
    },
    DialWait {
        #[serde(default)]
        expires_on: Option<DateTime<Utc>>,
    },
    ContactNameChanged {
        name: String,
    },
    ContactLanguageChanged {
        language: String,
    },
    ContactStatusChanged {
        status: ContactStatus,
    },
    ContactFieldChanged {
        field: FieldRef,
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
    ContactGroupsChanged {
        #[serde(default)]
        groups_added: Vec<GroupRef>,
        #[serde(default)]
        groups_removed: Vec<GroupRef>,
    },
    RunResultChanged {
        name: String,
        value: String,
        #[serde(default)]
        category: Option<String>,
    },
    FlowEntered {
        flow: FlowRef,
        #[serde(default)]
        parent_run_uuid: Option<Uuid>,
    },
    Error {
        text: String,
    },
    Failure {
        text: String,
    },
}

impl Event {
    pub const MSG_CREATED: &'static str = "msg_created";
    pub const MSG_RECEIVED: &'static str = "msg_received";
    pub const MSG_WAIT: &'static str = "msg_wait";
    pub const DIAL_WAIT: &'static str = "dial_wait";
    pub const CONTACT_NAME_CHANGED: &'static str = "contact_name_changed";
    pub const CONTACT_LANGUAGE_CHANGED: &'static str = "contact_language_changed";
    pub const CONTACT_STATUS_CHANGED: &'static str = "contact_status_changed";
    pub const CONTACT_FIELD_CHANGED: &'static str = "contact_field_changed";
    pub const CONTACT_GROUPS_CHANGED: &'static str = "contact_groups_changed";
    pub const RUN_RESULT_CHANGED: &'static str = "run_result_changed";
    pub const FLOW_ENTERED: &'static str = "flow_entered";
    pub const ERROR: &'static str = "error";
    pub const FAILURE: &'static str = "failure";

    pub fn new(payload: EventPayload) -> Self {
        Self {
            created_on: Utc::now(),
            step_uuid: None,
            payload,
        }
    }

    pub fn with_step(mut self, step_uuid: Uuid) -> Self {
        self.step_uuid = Some(step_uuid);
        self
    }

    pub fn with_created_on(mut self, created_on: DateTime<Utc>) -> Self {
        self.created_on = created_on;
        self
    }

    /// The discriminant the handler registry is keyed on. Matches the serde tag.
    pub fn type_name(&self) -> &'static str {
        match &self.payload {
            EventPayload::MsgCreated { .. } => Self::MSG_CREATED,
            EventPayload::MsgReceived { .. } => Self::MSG_RECEIVED,
            EventPayload::MsgWait { .. } => Self::MSG_WAIT,
            EventPayload::DialWait { .. } => Self::DIAL_WAIT,
            EventPayload::ContactNameChanged { .. } => Self::CONTACT_NAME_CHANGED,
            EventPayload::ContactLanguageChanged { .. } => Self::CONTACT_LANGUAGE_CHANGED,
            EventPayload::ContactStatusChanged { .. } => Self::CONTACT_STATUS_CHANGED,
            EventPayload::ContactFieldChanged { .. } => Self::CONTACT_FIELD_CHANGED,
            EventPayload::ContactGroupsChanged { .. } => Self::CONTACT_GROUPS_CHANGED,
            EventPayload::RunResultChanged { .. } => Self::RUN_RESULT_CHANGED,
            EventPayload::FlowEntered { .. } => Self::FLOW_ENTERED,
            EventPayload::Error { .. } => Self::ERROR,
            EventPayload::Failure { .. } => Self::FAILURE,
        }
    }
}
