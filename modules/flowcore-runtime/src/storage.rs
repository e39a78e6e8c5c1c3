//! Object storage for serialized session output.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore_common::{FlowcoreError, OrgId};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stores one object per session. Returns a URL the session row can point at.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn put(&self, path: &str, content_type: &str, body: Vec<u8>) -> Result<String>;

    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Path for a session output object:
/// `/orgs/{org}/c/{uuid[..4]}/{uuid}/{timestamp}_{session}_{hash}.json`.
pub fn session_output_path(
    org_id: OrgId,
    contact_uuid: Uuid,
    session_uuid: Uuid,
    now: DateTime<Utc>,
    output: &str,
) -> String {
    let contact = contact_uuid.to_string();
    let hash = hex::encode(Sha256::digest(output.as_bytes()));

    format!(
        "/orgs/{org_id}/c/{}/{contact}/{}_{session_uuid}_{}.json",
        &contact[..4],
        now.format("%Y%m%dT%H%M%S%.6f"),
        &hash[..16],
    )
}

// ---------------------------------------------------------------------------
// MemoryStorage (tests and local runs)
// ---------------------------------------------------------------------------

pub struct MemoryStorage {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored objects (for test assertions).
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn put(&self, path: &str, _content_type: &str, body: Vec<u8>) -> Result<String> {
        let url = format!("memory://{}{}", self.bucket, path);
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.clone(), body);
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| FlowcoreError::Storage(format!("no object at {url}")).into())
    }
}
