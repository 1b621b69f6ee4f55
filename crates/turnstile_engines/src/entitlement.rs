#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use turnstile_contracts::admission::AdmissionReason;
use turnstile_contracts::entitlement::{
    EntitlementPath, EntitlementVerdict, MembershipView,
};
use turnstile_contracts::presence::InferredDirection;

use crate::localday::GymCalendar;

/// Decides membership-path vs. credit-path for one identity. Pure: all
/// state arrives as arguments, the actual counter/balance mutation stays
/// with the admission ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementEvaluator {
    calendar: GymCalendar,
}

impl EntitlementEvaluator {
    pub fn new(calendar: GymCalendar) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> GymCalendar {
        self.calendar
    }

    /// The membership the ledger admits against: window contains `now`,
    /// status still entitles, most recent start wins.
    pub fn select_active_membership<'a>(
        &self,
        memberships: &'a [MembershipView],
        now: DateTime<Utc>,
    ) -> Option<&'a MembershipView> {
        memberships
            .iter()
            .filter(|m| m.status.entitles() && m.valid_from <= now && now < m.valid_to)
            .max_by_key(|m| m.valid_from)
    }

    /// The membership the kiosk verify flows report on: most recently
    /// started regardless of status, so inactive/expired memberships
    /// surface with their own reasons instead of falling through.
    pub fn select_latest_membership<'a>(
        &self,
        memberships: &'a [MembershipView],
        now: DateTime<Utc>,
    ) -> Option<&'a MembershipView> {
        memberships
            .iter()
            .filter(|m| m.valid_from <= now)
            .max_by_key(|m| m.valid_from)
    }

    /// Full rule set for one membership. Exit relaxes only the daily-limit
    /// rejection; everything else applies in both directions.
    pub fn check_membership(
        &self,
        membership: &MembershipView,
        now: DateTime<Utc>,
        direction: InferredDirection,
    ) -> EntitlementVerdict {
        if !membership.status.entitles() {
            return EntitlementVerdict::deny(AdmissionReason::MembershipInactive);
        }
        // Validity window is half-open: the membership lapses at the exact
        // valid_to instant.
        if membership.valid_to <= now {
            return EntitlementVerdict::deny(AdmissionReason::MembershipExpired);
        }
        if let Some(total) = membership.sessions_total {
            if membership.sessions_used >= total {
                return EntitlementVerdict::deny(AdmissionReason::SessionsLimitReached);
            }
        }
        if direction.is_entry() && self.daily_limit_hit(membership, now) {
            return EntitlementVerdict::deny(AdmissionReason::DailyLimit);
        }
        EntitlementVerdict::allow(EntitlementPath::Membership(membership.membership_id))
    }

    /// Membership path if one entitling membership covers `now`, otherwise
    /// the credit fallback. The credit decrement itself is deferred to the
    /// ledger, which re-reads the balance under its own serialization.
    pub fn evaluate(
        &self,
        credits: u32,
        memberships: &[MembershipView],
        now: DateTime<Utc>,
        direction: InferredDirection,
    ) -> EntitlementVerdict {
        if let Some(membership) = self.select_active_membership(memberships, now) {
            return self.check_membership(membership, now, direction);
        }
        if credits == 0 {
            return EntitlementVerdict::deny(AdmissionReason::NoCredits);
        }
        EntitlementVerdict::allow(EntitlementPath::Credits)
    }

    /// A daily-limited membership has hit its cap when the last recorded
    /// usage falls inside the current gym-local day and the counter is at
    /// or above the limit.
    pub fn daily_limit_hit(&self, membership: &MembershipView, now: DateTime<Utc>) -> bool {
        let Some(limit) = membership.daily_limit else {
            return false;
        };
        let Some(last_usage) = membership.last_usage_at else {
            return false;
        };
        self.calendar.same_local_day(now, last_usage) && membership.daily_usage_count >= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use turnstile_contracts::entitlement::{MembershipId, MembershipStatus};

    fn evaluator() -> EntitlementEvaluator {
        EntitlementEvaluator::new(GymCalendar::from_tz_name("Europe/Prague"))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
    }

    fn membership(id: u64, status: MembershipStatus) -> MembershipView {
        MembershipView {
            membership_id: MembershipId(id),
            valid_from: now() - Duration::days(5),
            valid_to: now() + Duration::days(25),
            status,
            daily_limit: None,
            daily_usage_count: 0,
            last_usage_at: None,
            sessions_total: None,
            sessions_used: 0,
        }
    }

    #[test]
    fn credit_fallback_when_no_membership() {
        let e = evaluator();
        let verdict = e.evaluate(3, &[], now(), InferredDirection::Entry);
        assert!(verdict.allowed);
        assert_eq!(verdict.path, Some(EntitlementPath::Credits));

        let verdict = e.evaluate(0, &[], now(), InferredDirection::Entry);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, AdmissionReason::NoCredits);
    }

    #[test]
    fn most_recent_start_wins_selection() {
        let e = evaluator();
        let mut older = membership(1, MembershipStatus::Active);
        older.valid_from = now() - Duration::days(20);
        let newer = membership(2, MembershipStatus::Active);
        let memberships = [older, newer.clone()];
        let selected = e
            .select_active_membership(&memberships, now())
            .unwrap();
        assert_eq!(selected.membership_id, MembershipId(2));
    }

    #[test]
    fn paused_membership_is_not_selected_for_admission() {
        let e = evaluator();
        let paused = membership(1, MembershipStatus::Paused);
        assert!(e.select_active_membership(&[paused], now()).is_none());
    }

    #[test]
    fn kiosk_selection_surfaces_inactive_reason() {
        let e = evaluator();
        let paused = membership(1, MembershipStatus::Paused);
        let memberships = [paused.clone()];
        let selected = e.select_latest_membership(&memberships, now()).unwrap();
        let verdict = e.check_membership(selected, now(), InferredDirection::Entry);
        assert_eq!(verdict.reason, AdmissionReason::MembershipInactive);
    }

    #[test]
    fn expired_window_rejects() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.valid_to = now() - Duration::days(1);
        let verdict = e.check_membership(&m, now(), InferredDirection::Entry);
        assert_eq!(verdict.reason, AdmissionReason::MembershipExpired);
    }

    #[test]
    fn validity_window_is_half_open_at_valid_to() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.valid_to = now();
        assert!(e.select_active_membership(&[m.clone()], now()).is_none());
        let verdict = e.check_membership(&m, now(), InferredDirection::Entry);
        assert_eq!(verdict.reason, AdmissionReason::MembershipExpired);

        // One instant earlier the membership still admits.
        let verdict = e.check_membership(&m, now() - Duration::seconds(1), InferredDirection::Entry);
        assert!(verdict.allowed);
    }

    #[test]
    fn session_cap_rejects_regardless_of_day() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.sessions_total = Some(1);
        m.sessions_used = 1;
        let verdict = e.check_membership(&m, now(), InferredDirection::Entry);
        assert_eq!(verdict.reason, AdmissionReason::SessionsLimitReached);
    }

    #[test]
    fn daily_limit_rejects_second_entry_same_local_day() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.daily_limit = Some(1);
        m.daily_usage_count = 1;
        m.last_usage_at = Some(now() - Duration::hours(2));
        let verdict = e.check_membership(&m, now(), InferredDirection::Entry);
        assert_eq!(verdict.reason, AdmissionReason::DailyLimit);
        assert!(verdict.daily_limit_hit);
    }

    #[test]
    fn daily_limit_resets_on_next_local_day() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.daily_limit = Some(1);
        m.daily_usage_count = 1;
        m.last_usage_at = Some(now() - Duration::days(1));
        let verdict = e.check_membership(&m, now(), InferredDirection::Entry);
        assert!(verdict.allowed);
    }

    #[test]
    fn exit_relaxes_daily_limit_only() {
        let e = evaluator();
        let mut m = membership(1, MembershipStatus::Active);
        m.daily_limit = Some(1);
        m.daily_usage_count = 1;
        m.last_usage_at = Some(now() - Duration::hours(1));
        let verdict = e.check_membership(&m, now(), InferredDirection::Exit);
        assert!(verdict.allowed);

        // Expiry still applies on exit.
        m.valid_to = now() - Duration::hours(1);
        let verdict = e.check_membership(&m, now(), InferredDirection::Exit);
        assert_eq!(verdict.reason, AdmissionReason::MembershipExpired);
    }

    #[test]
    fn membership_beats_credits_when_both_present() {
        let e = evaluator();
        let m = membership(7, MembershipStatus::Active);
        let verdict = e.evaluate(10, &[m], now(), InferredDirection::Entry);
        assert_eq!(verdict.membership_id(), Some(MembershipId(7)));
    }
}
