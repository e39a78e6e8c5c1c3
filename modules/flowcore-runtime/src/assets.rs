//! Read-only per-org view of the assets sessions and hooks resolve against.
//!
//! Loading and caching assets is the caller's concern; this is just the
//! lookup surface.

use std::collections::HashMap;

use chrono_tz::Tz;
use flowcore_common::{ChannelId, FlowId, FlowcoreError, GroupId, OrgId};
use uuid::Uuid;

/// Channel type code for Android relayers, which sync messages themselves
/// rather than going through courier.
pub const ANDROID_CHANNEL_TYPE: &str = "A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub uuid: Uuid,
    pub channel_type: String,
}

impl Channel {
    /// Messages on this channel are queued to courier, which reports sends
    /// back and owns any wait timeout that follows.
    pub fn is_courier(&self) -> bool {
        self.channel_type != ANDROID_CHANNEL_TYPE
    }
}

#[derive(Debug, Clone)]
pub struct OrgAssets {
    org_id: OrgId,
    timezone: Tz,
    channels: HashMap<Uuid, Channel>,
    flows: HashMap<Uuid, FlowId>,
    groups: HashMap<Uuid, GroupId>,
}

impl OrgAssets {
    pub fn new(org_id: OrgId, timezone: Tz) -> Self {
        Self {
            org_id,
            timezone,
            channels: HashMap::new(),
            flows: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel.uuid, channel);
        self
    }

    pub fn with_flow(mut self, uuid: Uuid, id: FlowId) -> Self {
        self.flows.insert(uuid, id);
        self
    }

    pub fn with_group(mut self, uuid: Uuid, id: GroupId) -> Self {
        self.groups.insert(uuid, id);
        self
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn channel(&self, uuid: Uuid) -> Option<&Channel> {
        self.channels.get(&uuid)
    }

    pub fn group_id(&self, uuid: Uuid) -> Option<GroupId> {
        self.groups.get(&uuid).copied()
    }

    /// Resolve a flow UUID to its id. Sessions can't be persisted against
    /// flows the org doesn't have.
    pub fn flow_id(&self, uuid: Uuid) -> Result<FlowId, FlowcoreError> {
        self.flows
            .get(&uuid)
            .copied()
            .ok_or_else(|| FlowcoreError::UnknownFlow(uuid.to_string()))
    }
}
