use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flowcore_common::{ChannelId, ContactId, FlowId, OrgId};
use flowcore_engine::MsgOut;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::assets::OrgAssets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgDirection {
    Incoming,
    Outgoing,
}

impl MsgDirection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Incoming => "I",
            Self::Outgoing => "O",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgStatus {
    Pending,
    Queued,
    /// No channel could send it.
    Failed,
}

impl MsgStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "P",
            Self::Queued => "Q",
            Self::Failed => "F",
        }
    }
}

/// An outgoing message row, built from a `msg_created` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Msg {
    pub uuid: Uuid,
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub channel_id: Option<ChannelId>,
    pub channel_uuid: Option<Uuid>,
    /// Whether the channel hands messages to courier.
    pub courier: bool,
    pub flow_id: Option<FlowId>,
    pub urn: Option<String>,
    pub text: String,
    pub direction: MsgDirection,
    pub status: MsgStatus,
    pub created_on: DateTime<Utc>,
}

impl Msg {
    pub fn new_outgoing(
        oa: &OrgAssets,
        contact_id: ContactId,
        out: &MsgOut,
        flow_id: Option<FlowId>,
        created_on: DateTime<Utc>,
    ) -> Self {
        let channel = out.channel.as_ref().and_then(|c| oa.channel(c.uuid));

        Self {
            uuid: out.uuid,
            org_id: oa.org_id(),
            contact_id,
            channel_id: channel.map(|c| c.id),
            channel_uuid: channel.map(|c| c.uuid),
            courier: channel.is_some_and(|c| c.is_courier()),
            flow_id,
            urn: out.urn.clone(),
            text: out.text.clone(),
            direction: MsgDirection::Outgoing,
            status: if channel.is_some() {
                MsgStatus::Pending
            } else {
                MsgStatus::Failed
            },
            created_on,
        }
    }

    /// Multi-row insert, `batch_size` rows per statement. Returns rows inserted.
    pub async fn insert(conn: &mut PgConnection, msgs: &[&Msg], batch_size: usize) -> Result<u64> {
        let mut inserted = 0;

        for chunk in msgs.chunks(batch_size.max(1)) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO msgs (uuid, org_id, contact_id, channel_id, flow_id, urn, text, \
                 direction, status, created_on) ",
            );
            qb.push_values(chunk, |mut b, m| {
                b.push_bind(m.uuid)
                    .push_bind(m.org_id)
                    .push_bind(m.contact_id)
                    .push_bind(m.channel_id)
                    .push_bind(m.flow_id)
                    .push_bind(m.urn.clone())
                    .push_bind(m.text.clone())
                    .push_bind(m.direction.code())
                    .push_bind(m.status.code())
                    .push_bind(m.created_on);
            });

            let result = qb
                .build()
                .execute(&mut *conn)
                .await
                .context("error inserting messages")?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    /// Pending messages become queued once handed to courier.
    pub async fn mark_queued(conn: &mut PgConnection, uuids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE msgs SET status = 'Q', modified_on = NOW() WHERE uuid = ANY($1) AND status = 'P'",
        )
        .bind(uuids)
        .execute(conn)
        .await
        .context("error marking messages queued")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Channel;
    use flowcore_engine::ChannelRef;

    fn out(channel: Option<Uuid>) -> MsgOut {
        MsgOut {
            uuid: Uuid::new_v4(),
            urn: Some("tel:+250788123123".into()),
            channel: channel.map(|uuid| ChannelRef {
                uuid,
                name: "Nexmo".into(),
            }),
            text: "Hi there".into(),
        }
    }

    #[test]
    fn resolves_channel_from_assets() {
        let (courier, android) = (Uuid::new_v4(), Uuid::new_v4());
        let oa = OrgAssets::new(1, chrono_tz::UTC)
            .with_channel(Channel {
                id: 7,
                uuid: courier,
                channel_type: "NX".into(),
            })
            .with_channel(Channel {
                id: 8,
                uuid: android,
                channel_type: "A".into(),
            });

        let m = Msg::new_outgoing(&oa, 3, &out(Some(courier)), Some(4), Utc::now());
        assert_eq!(m.channel_id, Some(7));
        assert!(m.courier);
        assert_eq!(m.status, MsgStatus::Pending);

        let m = Msg::new_outgoing(&oa, 3, &out(Some(android)), None, Utc::now());
        assert_eq!(m.channel_id, Some(8));
        assert!(!m.courier);

        let m = Msg::new_outgoing(&oa, 3, &out(None), None, Utc::now());
        assert_eq!(m.channel_id, None);
        assert_eq!(m.status, MsgStatus::Failed);
    }
}
