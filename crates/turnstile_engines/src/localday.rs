#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

pub const DEFAULT_GYM_TIMEZONE: &str = "Europe/Prague";

/// Gym-local calendar used for daily-entry limits. Day boundaries are
/// computed in the configured IANA timezone, not at UTC midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GymCalendar {
    tz: Tz,
}

impl GymCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an IANA timezone name, falling back to the default when the
    /// name is unknown.
    pub fn from_tz_name(name: &str) -> Self {
        let tz = name
            .parse::<Tz>()
            .or_else(|_| DEFAULT_GYM_TIMEZONE.parse::<Tz>())
            .unwrap_or(chrono_tz::UTC);
        Self { tz }
    }

    pub fn tz_name(&self) -> &'static str {
        self.tz.name()
    }

    /// UTC bounds `[start, end)` of the local calendar day containing `ts`.
    pub fn day_bounds_utc(&self, ts: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local = ts.with_timezone(&self.tz);
        let day_start_naive = local.date_naive().and_time(chrono::NaiveTime::MIN);
        // DST gaps can make local midnight ambiguous or nonexistent; take
        // the earliest valid instant of the day.
        let start = match self.tz.from_local_datetime(&day_start_naive) {
            chrono::offset::LocalResult::Single(dt) => dt,
            chrono::offset::LocalResult::Ambiguous(earliest, _) => earliest,
            chrono::offset::LocalResult::None => self
                .tz
                .from_utc_datetime(&(day_start_naive + Duration::hours(1))),
        };
        let start_utc = start.with_timezone(&Utc);
        (start_utc, start_utc + Duration::days(1))
    }

    /// Whether two instants fall on the same local calendar day.
    pub fn same_local_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let (start, end) = self.day_bounds_utc(a);
        b >= start && b < end
    }
}
