#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use rand::Rng;

use turnstile_contracts::admission::{TokenCode, UserId};
use turnstile_contracts::entitlement::{MembershipId, MembershipStatus, PackageId};
use turnstile_contracts::presence::{InferredDirection, PresenceSessionId};
use turnstile_engines::token_codes::generate_code;
use turnstile_storage::store::{
    AccessTokenRecord, MembershipInput, StorageError, TurnstileStore,
};

const TOKEN_ISSUE_MAX_ATTEMPTS: u32 = 32;

/// Administrative and repair operations run by staff tooling, not by the
/// turnstile itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct GymMaintenance;

impl GymMaintenance {
    /// Issue a fresh access token for the identity, retrying on the rare
    /// code collision.
    pub fn issue_access_token<R: Rng>(
        &self,
        store: &mut TurnstileStore,
        rng: &mut R,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<TokenCode, StorageError> {
        for _ in 0..TOKEN_ISSUE_MAX_ATTEMPTS {
            let code = generate_code(rng);
            if store.token_exists(&code) {
                continue;
            }
            let token = TokenCode::new(code)?;
            store.insert_token_row(AccessTokenRecord::v1(token.clone(), user_id, now))?;
            return Ok(token);
        }
        Err(StorageError::DuplicateKey {
            table: "access_tokens",
            key: "code space exhausted".to_string(),
        })
    }

    pub fn revoke_access_token(
        &self,
        store: &mut TurnstileStore,
        token: &TokenCode,
    ) -> Result<(), StorageError> {
        store.deactivate_token(token)
    }

    pub fn grant_credits(
        &self,
        store: &mut TurnstileStore,
        user_id: UserId,
        amount: u32,
    ) -> Result<u32, StorageError> {
        store.add_credits(user_id, amount)
    }

    pub fn revoke_credits(
        &self,
        store: &mut TurnstileStore,
        user_id: UserId,
        amount: u32,
    ) -> Result<u32, StorageError> {
        store.revoke_credits(user_id, amount)
    }

    /// Issue a membership directly, bypassing the payment flow (front-desk
    /// sale or goodwill grant).
    pub fn issue_membership(
        &self,
        store: &mut TurnstileStore,
        input: MembershipInput,
        now: DateTime<Utc>,
    ) -> Result<MembershipId, StorageError> {
        store.insert_membership_row(input, now)
    }

    pub fn revoke_membership(
        &self,
        store: &mut TurnstileStore,
        membership_id: MembershipId,
    ) -> Result<(), StorageError> {
        store.set_membership_status(membership_id, MembershipStatus::Cancelled)
    }

    pub fn set_package_offered(
        &self,
        store: &mut TurnstileStore,
        package_id: PackageId,
        offered: bool,
    ) -> Result<(), StorageError> {
        store.set_package_active(package_id, offered)
    }

    /// Close a presence session a member never scanned out of (overnight
    /// stragglers, staff sweep at closing time).
    pub fn force_close_presence_session(
        &self,
        store: &mut TurnstileStore,
        session_id: PresenceSessionId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let user_id = store
            .presence_session_rows()
            .iter()
            .find(|s| s.session_id == session_id)
            .map(|s| s.user_id);
        store.force_close_presence_session(session_id, now)?;
        if let Some(user_id) = user_id {
            store.set_presence(user_id, false, now)?;
        }
        Ok(())
    }

    /// Rebuild an identity's presence flag from its audit trail. The last
    /// allowed admission wins; an identity with no allowed rows reads as
    /// outside.
    pub fn rebuild_presence(
        &self,
        store: &mut TurnstileStore,
        user_id: UserId,
    ) -> Result<bool, StorageError> {
        let last_allowed = store
            .audit_rows()
            .iter()
            .rev()
            .find(|row| row.user_id == Some(user_id) && row.allowed)
            .map(|row| (row.inferred_direction, row.processed_at));
        match last_allowed {
            Some((Some(direction), at)) => {
                let inside = direction == InferredDirection::Entry;
                store.set_presence(user_id, inside, at)?;
                Ok(inside)
            }
            _ => {
                store.reset_presence(user_id)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use turnstile_contracts::admission::{
        AdmissionReason, DeclaredDirection, ScanRequest,
    };
    use turnstile_engines::localday::GymCalendar;
    use turnstile_storage::store::IdentityRecord;

    use crate::admission::AdmissionLedger;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
    }

    fn seed(store: &mut TurnstileStore, credits: u32) -> UserId {
        let uid = UserId(1);
        store
            .insert_identity_row(IdentityRecord::v1(
                uid,
                "alice@example.com",
                "Alice",
                credits,
                false,
                t0(),
            ))
            .unwrap();
        uid
    }

    #[test]
    fn issued_tokens_are_unique_and_scannable() {
        let mut store = TurnstileStore::new_in_memory();
        let uid = seed(&mut store, 1);
        let m = GymMaintenance;
        let mut rng = StdRng::seed_from_u64(7);

        let a = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();
        let b = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();
        assert_ne!(a, b);
        assert!(store.token_row(a.as_str()).unwrap().is_active);

        m.revoke_access_token(&mut store, &a).unwrap();
        assert!(!store.token_row(a.as_str()).unwrap().is_active);
    }

    #[test]
    fn force_close_clears_the_presence_flag_too() {
        let mut store = TurnstileStore::new_in_memory();
        let uid = seed(&mut store, 2);
        let m = GymMaintenance;
        let mut rng = StdRng::seed_from_u64(7);
        let token = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();

        let ledger = AdmissionLedger::new(GymCalendar::from_tz_name("Europe/Prague"));
        ledger
            .process_scan(
                &mut store,
                &ScanRequest {
                    token: token.as_str().to_string(),
                    timestamp: t0(),
                    device_id: "turnstile-entry-1".to_string(),
                },
                Some(DeclaredDirection::In),
                t0(),
            )
            .unwrap();
        let session = store.active_presence_session(uid).unwrap().session_id;

        m.force_close_presence_session(&mut store, session, t0() + Duration::hours(8))
            .unwrap();
        assert!(!store.identity_row(uid).unwrap().is_in_gym);
        assert!(store.active_presence_session(uid).is_none());
    }

    #[test]
    fn rebuild_presence_follows_the_audit_trail() {
        let mut store = TurnstileStore::new_in_memory();
        let uid = seed(&mut store, 5);
        let m = GymMaintenance;
        let mut rng = StdRng::seed_from_u64(7);
        let token = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();
        let ledger = AdmissionLedger::new(GymCalendar::from_tz_name("Europe/Prague"));

        let req = |at| ScanRequest {
            token: token.as_str().to_string(),
            timestamp: at,
            device_id: "turnstile-entry-1".to_string(),
        };
        ledger.process_scan(&mut store, &req(t0()), None, t0()).unwrap();
        let out_at = t0() + Duration::hours(1);
        ledger.process_scan(&mut store, &req(out_at), None, out_at).unwrap();

        // Simulate drift, then repair from the ledger.
        store.set_presence(uid, true, out_at).unwrap();
        let inside = m.rebuild_presence(&mut store, uid).unwrap();
        assert!(!inside);
        assert!(!store.identity_row(uid).unwrap().is_in_gym);
    }

    #[test]
    fn rebuild_presence_without_allowed_rows_reads_outside() {
        let mut store = TurnstileStore::new_in_memory();
        let uid = seed(&mut store, 0);
        let m = GymMaintenance;
        let mut rng = StdRng::seed_from_u64(7);
        let token = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();
        let ledger = AdmissionLedger::new(GymCalendar::from_tz_name("Europe/Prague"));

        // Only a denial in the trail.
        let result = ledger
            .process_scan(
                &mut store,
                &ScanRequest {
                    token: token.as_str().to_string(),
                    timestamp: t0(),
                    device_id: "turnstile-entry-1".to_string(),
                },
                None,
                t0(),
            )
            .unwrap();
        assert_eq!(result.reason(), AdmissionReason::NoCredits);

        store.set_presence(uid, true, t0()).unwrap();
        assert!(!m.rebuild_presence(&mut store, uid).unwrap());
    }

    #[test]
    fn goodwill_membership_admits_without_credits() {
        let mut store = TurnstileStore::new_in_memory();
        let uid = seed(&mut store, 0);
        let m = GymMaintenance;
        let mut rng = StdRng::seed_from_u64(7);
        let token = m.issue_access_token(&mut store, &mut rng, uid, t0()).unwrap();

        let mid = m
            .issue_membership(
                &mut store,
                MembershipInput {
                    user_id: uid,
                    package_id: None,
                    package_name_cache: "Comp Week".to_string(),
                    valid_from: t0() - Duration::days(1),
                    valid_to: t0() + Duration::days(6),
                    daily_limit: None,
                    sessions_total: None,
                },
                t0(),
            )
            .unwrap();

        let ledger = AdmissionLedger::new(GymCalendar::from_tz_name("Europe/Prague"));
        let result = ledger
            .process_scan(
                &mut store,
                &ScanRequest {
                    token: token.as_str().to_string(),
                    timestamp: t0(),
                    device_id: "turnstile-entry-1".to_string(),
                },
                None,
                t0(),
            )
            .unwrap();
        assert!(result.is_allowed());

        m.revoke_membership(&mut store, mid).unwrap();
        assert_eq!(
            store.membership_row(mid).unwrap().status,
            MembershipStatus::Cancelled
        );
    }
}
