//! When a campaign event fires for a contact.
//!
//! Minute and hour offsets are durations. Day and week offsets are calendar
//! arithmetic in the org's timezone, so "2 days later" lands on the same
//! wall-clock time even when a DST change falls in between.

use chrono::{DateTime, Duration, DurationRound, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use flowcore_common::{CampaignEventId, ContactId, OrgId};
use serde::{Deserialize, Serialize};

use crate::models::ContactFire;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub id: CampaignEventId,
    /// May be negative, e.g. a reminder before an appointment date.
    pub offset: i64,
    pub unit: OffsetUnit,
    /// Fixed local hour of delivery, if any.
    pub delivery_hour: Option<u32>,
}

/// Resolve a local wall-clock time. Ambiguous times (clocks going back) take
/// the earlier instant; times skipped by clocks going forward move an hour on.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(local + Duration::hours(1))).earliest(),
    }
}

impl CampaignEvent {
    /// The fire time for a contact whose relative-to value is `start`, or
    /// `None` if that time isn't after `now`.
    pub fn schedule_for_time(
        &self,
        tz: Tz,
        now: DateTime<Utc>,
        start: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut scheduled = start;
        let truncated = start.duration_trunc(Duration::minutes(1)).ok()?;
        if truncated != start {
            scheduled = truncated + Duration::minutes(1);
        }

        let mut local = scheduled.with_timezone(&tz);
        local = match self.unit {
            OffsetUnit::Minutes => local + Duration::minutes(self.offset),
            OffsetUnit::Hours => local + Duration::hours(self.offset),
            OffsetUnit::Days => resolve_local(tz, local.naive_local() + Duration::days(self.offset))?,
            OffsetUnit::Weeks => {
                resolve_local(tz, local.naive_local() + Duration::weeks(self.offset))?
            }
        };

        if let Some(hour) = self.delivery_hour {
            let at_hour = local.date_naive().and_hms_opt(hour, 0, 0)?;
            local = resolve_local(tz, at_hour)?;
        }

        let scheduled = local.with_timezone(&Utc);
        (scheduled > now).then_some(scheduled)
    }

    /// Fires for every contact whose event time is still ahead.
    pub fn fires_for_contacts(
        &self,
        org_id: OrgId,
        tz: Tz,
        now: DateTime<Utc>,
        starts: &[(ContactId, DateTime<Utc>)],
    ) -> Vec<ContactFire> {
        starts
            .iter()
            .filter_map(|&(contact_id, start)| {
                self.schedule_for_time(tz, now, start)
                    .map(|fire_on| ContactFire::for_campaign(org_id, contact_id, self.id, fire_on))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn event(offset: i64, unit: OffsetUnit, delivery_hour: Option<u32>) -> CampaignEvent {
        CampaignEvent {
            id: 1,
            offset,
            unit,
            delivery_hour,
        }
    }

    fn ny(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, m, d, h, min, s)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn long_ago() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn two_days_across_fall_back_is_49_hours() {
        let start = ny(2025, 11, 1, 12, 0, 0);
        let fire = event(2, OffsetUnit::Days, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire - start, Duration::hours(49));
        assert_eq!(fire, ny(2025, 11, 3, 12, 0, 0));
    }

    #[test]
    fn two_days_across_spring_forward_is_47_hours() {
        let start = ny(2025, 3, 8, 12, 0, 0);
        let fire = event(2, OffsetUnit::Days, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire - start, Duration::hours(47));
    }

    #[test]
    fn hours_are_plain_durations_across_dst() {
        let start = ny(2025, 3, 8, 12, 0, 0);
        let fire = event(48, OffsetUnit::Hours, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire - start, Duration::hours(48));
    }

    #[test]
    fn weeks_keep_wall_clock_time() {
        let start = ny(2025, 10, 30, 8, 15, 0);
        let fire = event(1, OffsetUnit::Weeks, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire, ny(2025, 11, 6, 8, 15, 0));
    }

    #[test]
    fn sub_minute_start_rounds_up() {
        let start = ny(2025, 6, 1, 12, 0, 30);
        let fire = event(5, OffsetUnit::Minutes, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire, ny(2025, 6, 1, 12, 6, 0));
    }

    #[test]
    fn delivery_hour_overrides_time_of_day() {
        let start = ny(2025, 6, 1, 17, 42, 0);
        let fire = event(1, OffsetUnit::Days, Some(9))
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire, ny(2025, 6, 2, 9, 0, 0));
    }

    #[test]
    fn skipped_local_time_moves_forward() {
        // 02:30 doesn't exist on 2025-03-09 in New York
        let start = ny(2025, 3, 8, 2, 30, 0);
        let fire = event(1, OffsetUnit::Days, None)
            .schedule_for_time(New_York, long_ago(), start)
            .unwrap();

        assert_eq!(fire, ny(2025, 3, 9, 3, 30, 0));
    }

    #[test]
    fn past_events_are_not_scheduled() {
        let start = ny(2025, 6, 1, 12, 0, 0);
        let e = event(-1, OffsetUnit::Days, None);

        assert_eq!(e.schedule_for_time(New_York, start, start), None);
        // exactly now isn't after now either
        let e = event(0, OffsetUnit::Minutes, None);
        assert_eq!(e.schedule_for_time(New_York, start, start), None);
    }

    #[test]
    fn fires_only_for_future_contacts() {
        let now = ny(2025, 6, 10, 0, 0, 0);
        let e = event(3, OffsetUnit::Days, None);
        let starts = [(1, ny(2025, 6, 1, 9, 0, 0)), (2, ny(2025, 6, 9, 9, 0, 0))];

        let fires = e.fires_for_contacts(7, New_York, now, &starts);

        assert_eq!(fires.len(), 1);
        assert_eq!(fires[0].contact_id, 2);
        assert_eq!(fires[0].scope, "1");
        assert_eq!(fires[0].fire_on, ny(2025, 6, 12, 9, 0, 0));
    }
}
