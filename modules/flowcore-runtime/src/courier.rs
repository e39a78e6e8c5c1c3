//! Seam to the message sending service. Provider clients live outside this
//! crate; the runtime only hands over messages that are ready to send.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use flowcore_common::ContactId;
use uuid::Uuid;

/// A message handed to courier after its row is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMsg {
    pub msg_uuid: Uuid,
    pub contact_id: ContactId,
    pub channel_uuid: Uuid,
    pub urn: Option<String>,
    pub text: String,
    pub session_uuid: Option<Uuid>,
    /// Wait timeout courier should start once the message is sent.
    pub session_timeout_seconds: Option<i64>,
}

#[async_trait]
pub trait Courier: Send + Sync {
    async fn queue(&self, msgs: &[QueuedMsg]) -> Result<()>;
}

/// In-memory courier for testing. Records everything queued.
#[derive(Default)]
pub struct MemoryCourier {
    queued: Mutex<Vec<QueuedMsg>>,
}

impl MemoryCourier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All queued messages (for test assertions).
    pub fn queued(&self) -> Vec<QueuedMsg> {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Courier for MemoryCourier {
    async fn queue(&self, msgs: &[QueuedMsg]) -> Result<()> {
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(msgs);
        Ok(())
    }
}
