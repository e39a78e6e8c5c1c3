//! Shared identifiers and the persisted status vocabularies.
//!
//! Statuses are stored as single-letter codes. Decoding an unknown code is a
//! programming error and surfaces as `FlowcoreError::UnknownStatus`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlowcoreError;

pub type OrgId = i64;
pub type ContactId = i64;
pub type SessionId = i64;
pub type RunId = i64;
pub type FlowId = i64;
pub type ChannelId = i64;
pub type CallId = i64;
pub type GroupId = i64;
pub type StartId = i64;
pub type UserId = i64;
pub type FireId = i64;
pub type CampaignEventId = i64;

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Completed,
    Expired,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn code(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "W",
            SessionStatus::Completed => "C",
            SessionStatus::Expired => "X",
            SessionStatus::Interrupted => "I",
            SessionStatus::Failed => "F",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, FlowcoreError> {
        match code {
            "W" => Ok(SessionStatus::Waiting),
            "C" => Ok(SessionStatus::Completed),
            "X" => Ok(SessionStatus::Expired),
            "I" => Ok(SessionStatus::Interrupted),
            "F" => Ok(SessionStatus::Failed),
            other => Err(FlowcoreError::UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Waiting)
    }

    /// Session codes are a strict subset of run codes.
    pub fn run_status(&self) -> RunStatus {
        match self {
            SessionStatus::Waiting => RunStatus::Waiting,
            SessionStatus::Completed => RunStatus::Completed,
            SessionStatus::Expired => RunStatus::Expired,
            SessionStatus::Interrupted => RunStatus::Interrupted,
            SessionStatus::Failed => RunStatus::Failed,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Waiting,
    Completed,
    Expired,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn code(&self) -> &'static str {
        match self {
            RunStatus::Active => "A",
            RunStatus::Waiting => "W",
            RunStatus::Completed => "C",
            RunStatus::Expired => "X",
            RunStatus::Interrupted => "I",
            RunStatus::Failed => "F",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, FlowcoreError> {
        match code {
            "A" => Ok(RunStatus::Active),
            "W" => Ok(RunStatus::Waiting),
            "C" => Ok(RunStatus::Completed),
            "X" => Ok(RunStatus::Expired),
            "I" => Ok(RunStatus::Interrupted),
            "F" => Ok(RunStatus::Failed),
            other => Err(FlowcoreError::UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Active | RunStatus::Waiting)
    }
}

// ---------------------------------------------------------------------------
// Session type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Messaging,
    Background,
    Voice,
}

impl SessionType {
    pub fn code(&self) -> &'static str {
        match self {
            SessionType::Messaging => "M",
            SessionType::Background => "B",
            SessionType::Voice => "V",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, FlowcoreError> {
        match code {
            "M" => Ok(SessionType::Messaging),
            "B" => Ok(SessionType::Background),
            "V" => Ok(SessionType::Voice),
            other => Err(FlowcoreError::UnknownSessionType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact fire type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireType {
    WaitExpiration,
    WaitTimeout,
    Campaign,
}

impl FireType {
    /// Fire types owned by a contact's waiting session.
    pub const SESSION: [FireType; 2] = [FireType::WaitExpiration, FireType::WaitTimeout];

    pub fn code(&self) -> &'static str {
        match self {
            FireType::WaitExpiration => "E",
            FireType::WaitTimeout => "T",
            FireType::Campaign => "C",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, FlowcoreError> {
        match code {
            "E" => Ok(FireType::WaitExpiration),
            "T" => Ok(FireType::WaitTimeout),
            "C" => Ok(FireType::Campaign),
            other => Err(FlowcoreError::UnknownFireType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Contact status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Blocked,
    Stopped,
    Archived,
}

impl ContactStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ContactStatus::Active => "A",
            ContactStatus::Blocked => "B",
            ContactStatus::Stopped => "S",
            ContactStatus::Archived => "V",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, FlowcoreError> {
        match code {
            "A" => Ok(ContactStatus::Active),
            "B" => Ok(ContactStatus::Blocked),
            "S" => Ok(ContactStatus::Stopped),
            "V" => Ok(ContactStatus::Archived),
            other => Err(FlowcoreError::UnknownStatus(other.to_string())),
        }
    }
}
