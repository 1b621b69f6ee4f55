#![forbid(unsafe_code)]

use chrono::{Duration, TimeZone, Utc};

use turnstile_contracts::admission::{
    AdmissionReason, DeclaredDirection, DeviceId, DoorActuationStatus, UserId,
};
use turnstile_contracts::presence::{InferredDirection, PresenceSessionStatus};
use turnstile_storage::repo::{AuditLedgersRepo, IdentityTablesRepo};
use turnstile_storage::store::{AuditLogInput, IdentityRecord, StorageError, TurnstileStore};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn seed_identity(s: &mut TurnstileStore, user_id: u64) -> UserId {
    let uid = UserId(user_id);
    s.insert_identity_row(IdentityRecord::v1(
        uid,
        format!("member{user_id}@example.com"),
        format!("Member {user_id}"),
        0,
        false,
        t0(),
    ))
    .unwrap();
    uid
}

fn allowed_row(uid: UserId, direction: InferredDirection) -> AuditLogInput {
    AuditLogInput {
        token_string: "AB12CD".to_string(),
        user_id: Some(uid),
        allowed: true,
        reason: AdmissionReason::Ok,
        inferred_direction: Some(direction),
        declared_direction: Some(DeclaredDirection::In),
        direction_mismatch: direction == InferredDirection::Exit,
        device_id: Some(DeviceId::new("turnstile-entry-1").unwrap()),
        scanned_at: t0(),
        processed_at: t0(),
    }
}

#[test]
fn at_aud_db_01_rows_append_in_order_with_masked_token() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1);

    let first = s.append_audit_row(allowed_row(uid, InferredDirection::Entry)).unwrap();
    let second = s.append_audit_row(allowed_row(uid, InferredDirection::Exit)).unwrap();
    assert!(first < second);

    let rows = s.audit_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].token_string, "AB12CD");
    assert_eq!(rows[0].raw_token_masked, "AB12...");
    assert_eq!(rows[1].inferred_direction, Some(InferredDirection::Exit));
    assert!(rows[1].direction_mismatch);
}

#[test]
fn at_aud_db_02_denied_row_needs_no_identity() {
    let mut s = TurnstileStore::new_in_memory();

    s.append_audit_row(AuditLogInput {
        token_string: "ZZZZZZ".to_string(),
        user_id: None,
        allowed: false,
        reason: AdmissionReason::TokenNotFound,
        inferred_direction: None,
        declared_direction: Some(DeclaredDirection::In),
        direction_mismatch: false,
        device_id: None,
        scanned_at: t0(),
        processed_at: t0(),
    })
    .unwrap();

    let rows = s.audit_rows();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].allowed);
    assert_eq!(rows[0].user_id, None);
}

#[test]
fn at_aud_db_03_reason_and_flag_must_agree() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1);

    let mut row = allowed_row(uid, InferredDirection::Entry);
    row.reason = AdmissionReason::NoCredits;
    assert!(matches!(
        s.append_audit_row(row),
        Err(StorageError::ContractViolation(_))
    ));
    assert!(s.audit_rows().is_empty());
}

#[test]
fn at_aud_db_04_last_row_lookup_scopes_by_identity() {
    let mut s = TurnstileStore::new_in_memory();
    let alice = seed_identity(&mut s, 1);
    let bob = seed_identity(&mut s, 2);

    s.append_audit_row(allowed_row(alice, InferredDirection::Entry)).unwrap();
    s.append_audit_row(allowed_row(bob, InferredDirection::Entry)).unwrap();
    s.append_audit_row(allowed_row(alice, InferredDirection::Exit)).unwrap();

    let last = s.last_audit_row_for_user(alice).unwrap();
    assert_eq!(last.inferred_direction, Some(InferredDirection::Exit));
    let last_bob = s.last_audit_row_for_user(bob).unwrap();
    assert_eq!(last_bob.inferred_direction, Some(InferredDirection::Entry));
}

#[test]
fn at_aud_db_05_presence_session_lifecycle() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1);

    let sid = s.start_presence_session(uid, None, None, t0()).unwrap();
    assert_eq!(s.active_presence_session(uid).unwrap().session_id, sid);

    let ended = t0() + Duration::minutes(90);
    let closed = s.close_presence_session(uid, ended).unwrap();
    assert_eq!(closed, sid);

    let rows = s.presence_session_rows();
    assert_eq!(rows[0].status, PresenceSessionStatus::Closed);
    assert_eq!(rows[0].duration_seconds, Some(90 * 60));
    assert!(s.active_presence_session(uid).is_none());
}

#[test]
fn at_aud_db_06_close_without_active_session_is_tolerated() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1);

    assert!(s.close_presence_session(uid, t0()).is_none());
}

#[test]
fn at_aud_db_07_force_close_is_idempotent() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1);
    let sid = s.start_presence_session(uid, None, None, t0()).unwrap();

    let ended = t0() + Duration::hours(8);
    s.force_close_presence_session(sid, ended).unwrap();
    s.force_close_presence_session(sid, ended + Duration::hours(1)).unwrap();

    let rows = s.presence_session_rows();
    assert_eq!(rows[0].status, PresenceSessionStatus::ForceClosed);
    assert_eq!(rows[0].ended_at, Some(ended));
}

#[test]
fn at_aud_db_08_door_ledger_rejects_out_of_range_duration() {
    let mut s = TurnstileStore::new_in_memory();

    assert!(matches!(
        s.append_door_row(None, 0, DoorActuationStatus::Opened, t0()),
        Err(StorageError::ContractViolation(_))
    ));
    assert!(matches!(
        s.append_door_row(None, 61, DoorActuationStatus::Opened, t0()),
        Err(StorageError::ContractViolation(_))
    ));

    s.append_door_row(
        Some(DeviceId::new("turnstile-entry-1").unwrap()),
        5,
        DoorActuationStatus::Opened,
        t0(),
    )
    .unwrap();
    assert_eq!(s.door_rows().len(), 1);
    assert_eq!(s.door_rows()[0].duration_s, 5);
}
