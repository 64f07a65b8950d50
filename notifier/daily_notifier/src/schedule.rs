use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::Deserialize;
use tracing::info;

/// The subset of the core's settings the notifier cares about.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub receive_notifications: bool,
    #[serde(default)]
    pub notification_time: String,
    #[serde(default)]
    pub selected_category: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub time: NaiveTime,
    pub category: String,
}

pub fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Merges core settings with command-line overrides. `None` means notifications are off.
///
/// A forced time arms the schedule even when the core is unreachable or has notifications
/// disabled.
pub fn resolve_plan(
    settings: Option<&NotifySettings>,
    forced_time: Option<NaiveTime>,
    forced_category: Option<&str>,
) -> Option<Plan> {
    let enabled = forced_time.is_some() || settings.is_some_and(|s| s.receive_notifications);
    if !enabled {
        return None;
    }
    let time = forced_time
        .or_else(|| settings.and_then(|s| parse_time_of_day(&s.notification_time)))
        .unwrap_or_else(default_time);
    let category = forced_category
        .map(str::to_string)
        .or_else(|| settings.map(|s| s.selected_category.clone()))
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(Plan { time, category })
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    // A wall-clock time skipped by a DST jump fires an hour later instead.
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// First instant strictly after `now` whose wall-clock time is `at` (seconds dropped).
pub fn next_fire_at<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let at = at
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at);

    let mut day = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(&tz, day.and_time(at)) {
            if candidate > *now {
                return candidate;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    now.clone() + Duration::days(1)
}

#[derive(Clone, Debug)]
pub enum ScheduleState<Tz: TimeZone> {
    Unscheduled,
    Scheduled {
        fire_at: DateTime<Tz>,
        plan: Plan,
    },
    Fired {
        fired_at: DateTime<Tz>,
        plan: Plan,
    },
}

/// One pending daily notification: `Unscheduled -> Scheduled -> Fired`.
///
/// Firing does not re-arm; the owner calls [`NotificationSchedule::schedule`] again.
#[derive(Debug)]
pub struct NotificationSchedule<Tz: TimeZone> {
    state: ScheduleState<Tz>,
}

impl<Tz: TimeZone> NotificationSchedule<Tz> {
    pub fn new() -> Self {
        Self {
            state: ScheduleState::Unscheduled,
        }
    }

    pub fn state(&self) -> &ScheduleState<Tz> {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, ScheduleState::Scheduled { .. })
    }

    /// Cancels whatever was pending and arms the next occurrence of `plan.time`.
    pub fn schedule(&mut self, now: &DateTime<Tz>, plan: Plan) -> DateTime<Tz> {
        if self.is_armed() {
            info!("replacing pending notification");
        }
        let fire_at = next_fire_at(now, plan.time);
        self.state = ScheduleState::Scheduled {
            fire_at: fire_at.clone(),
            plan,
        };
        fire_at
    }

    pub fn cancel(&mut self) {
        self.state = ScheduleState::Unscheduled;
    }

    /// True when nothing is pending for `plan`: unscheduled, already fired, or armed for a
    /// different time or category.
    pub fn needs_arming(&self, plan: &Plan) -> bool {
        match &self.state {
            ScheduleState::Scheduled { plan: current, .. } => current != plan,
            ScheduleState::Unscheduled | ScheduleState::Fired { .. } => true,
        }
    }

    pub fn fire_at(&self) -> Option<&DateTime<Tz>> {
        match &self.state {
            ScheduleState::Scheduled { fire_at, .. } => Some(fire_at),
            _ => None,
        }
    }

    /// Category to notify for, once the armed instant has been reached.
    pub fn due(&self, now: &DateTime<Tz>) -> Option<&str> {
        match &self.state {
            ScheduleState::Scheduled { fire_at, plan } if *now >= *fire_at => {
                Some(plan.category.as_str())
            }
            _ => None,
        }
    }

    pub fn mark_fired(&mut self, now: &DateTime<Tz>) {
        let state = std::mem::replace(&mut self.state, ScheduleState::Unscheduled);
        self.state = match state {
            ScheduleState::Scheduled { plan, .. } => ScheduleState::Fired {
                fired_at: now.clone(),
                plan,
            },
            other => other,
        };
    }
}

impl<Tz: TimeZone> Default for NotificationSchedule<Tz> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn plan(h: u32, m: u32, category: &str) -> Plan {
        Plan {
            time: hm(h, m),
            category: category.to_string(),
        }
    }

    #[test]
    fn future_time_fires_today() {
        let now = utc("2026-10-19T08:15:30Z");
        assert_eq!(next_fire_at(&now, hm(9, 0)), utc("2026-10-19T09:00:00Z"));
    }

    #[test]
    fn past_time_rolls_to_tomorrow() {
        let now = utc("2026-10-19T10:00:00Z");
        assert_eq!(next_fire_at(&now, hm(9, 0)), utc("2026-10-20T09:00:00Z"));
    }

    #[test]
    fn exactly_now_rolls_to_tomorrow() {
        let now = utc("2026-10-19T09:00:00Z");
        assert_eq!(next_fire_at(&now, hm(9, 0)), utc("2026-10-20T09:00:00Z"));
    }

    #[test]
    fn month_end_rolls_over() {
        let now = utc("2026-12-31T23:30:00Z");
        assert_eq!(next_fire_at(&now, hm(7, 45)), utc("2027-01-01T07:45:00Z"));
    }

    #[test]
    fn uses_the_wall_clock_of_the_zone() {
        let tz = FixedOffset::east_opt(-3 * 3600).unwrap();
        // 11:00 UTC is 08:00 at UTC-3, so 09:00 local is still ahead.
        let now = utc("2026-10-19T11:00:00Z").with_timezone(&tz);
        let at = next_fire_at(&now, hm(9, 0));
        assert_eq!(at.with_timezone(&Utc), utc("2026-10-19T12:00:00Z"));
    }

    #[test]
    fn state_machine_round_trip() {
        let mut s = NotificationSchedule::<Utc>::new();
        assert!(matches!(s.state(), ScheduleState::Unscheduled));
        assert!(s.needs_arming(&plan(9, 0, "Motivation")));

        let now = utc("2026-10-19T10:00:00Z");
        let at = s.schedule(&now, plan(9, 0, "Motivation"));
        assert_eq!(at, utc("2026-10-20T09:00:00Z"));
        assert!(s.is_armed());
        assert!(!s.needs_arming(&plan(9, 0, "Motivation")));
        assert!(s.needs_arming(&plan(9, 30, "Motivation")));
        assert!(s.needs_arming(&plan(9, 0, "Wisdom")));

        assert_eq!(s.due(&utc("2026-10-20T08:59:59Z")), None);
        let fire_now = utc("2026-10-20T09:00:00Z");
        assert_eq!(s.due(&fire_now), Some("Motivation"));

        s.mark_fired(&fire_now);
        assert!(matches!(s.state(), ScheduleState::Fired { .. }));
        assert!(!s.is_armed());
        assert_eq!(s.due(&fire_now), None);
        assert!(s.needs_arming(&plan(9, 0, "Motivation")));

        let next = s.schedule(&utc("2026-10-20T09:00:01Z"), plan(9, 0, "Motivation"));
        assert_eq!(next, utc("2026-10-21T09:00:00Z"));

        s.cancel();
        assert!(matches!(s.state(), ScheduleState::Unscheduled));
        assert!(s.fire_at().is_none());
    }

    #[test]
    fn rescheduling_replaces_pending_time() {
        let mut s = NotificationSchedule::<Utc>::new();
        let now = utc("2026-10-19T06:00:00Z");
        s.schedule(&now, plan(9, 0, ""));
        s.schedule(&now, plan(7, 0, ""));
        assert_eq!(s.fire_at(), Some(&utc("2026-10-19T07:00:00Z")));
    }

    #[test]
    fn plan_resolution() {
        let on = NotifySettings {
            receive_notifications: true,
            notification_time: "21:15".to_string(),
            selected_category: " Wisdom ".to_string(),
        };
        let off = NotifySettings {
            receive_notifications: false,
            ..on.clone()
        };

        assert_eq!(resolve_plan(Some(&on), None, None), Some(plan(21, 15, "Wisdom")));
        assert_eq!(resolve_plan(Some(&off), None, None), None);
        assert_eq!(resolve_plan(None, None, None), None);
        assert_eq!(
            resolve_plan(Some(&off), Some(hm(6, 0)), None),
            Some(plan(6, 0, "Wisdom"))
        );
        assert_eq!(
            resolve_plan(None, Some(hm(6, 0)), Some("Motivation")),
            Some(plan(6, 0, "Motivation"))
        );

        let garbled = NotifySettings {
            notification_time: "later".to_string(),
            ..on
        };
        assert_eq!(resolve_plan(Some(&garbled), None, None).unwrap().time, hm(9, 0));
    }
}
