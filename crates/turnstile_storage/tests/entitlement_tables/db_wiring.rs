#![forbid(unsafe_code)]

use chrono::{Duration, TimeZone, Utc};

use turnstile_contracts::admission::{TokenCode, UserId};
use turnstile_contracts::entitlement::MembershipStatus;
use turnstile_contracts::payment::{OrderId, OrderKind, OrderStatus};
use turnstile_storage::repo::{EntitlementTablesRepo, IdentityTablesRepo, PaymentTablesRepo};
use turnstile_storage::store::{
    AccessTokenRecord, IdentityRecord, MembershipInput, PaymentOrderRecord, StorageError,
    TurnstileStore,
};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

fn seed_identity(s: &mut TurnstileStore, user_id: u64, credits: u32) -> UserId {
    let uid = UserId(user_id);
    s.insert_identity_row(IdentityRecord::v1(
        uid,
        format!("member{user_id}@example.com"),
        format!("Member {user_id}"),
        credits,
        false,
        t0(),
    ))
    .unwrap();
    uid
}

fn membership_input(uid: UserId) -> MembershipInput {
    MembershipInput {
        user_id: uid,
        package_id: None,
        package_name_cache: "Monthly Unlimited".to_string(),
        valid_from: t0(),
        valid_to: t0() + Duration::days(30),
        daily_limit: Some(1),
        sessions_total: None,
    }
}

#[test]
fn at_ent_db_01_identity_insert_and_lookup() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 5);

    let row = s.identity_row(uid).unwrap();
    assert_eq!(row.credits, 5);
    assert!(!row.is_in_gym);
    assert!(s.identity_row(UserId(999)).is_none());
}

#[test]
fn at_ent_db_02_duplicate_identity_rejected() {
    let mut s = TurnstileStore::new_in_memory();
    seed_identity(&mut s, 1, 0);

    let dup = IdentityRecord::v1(UserId(1), "other@example.com", "Other", 0, false, t0());
    assert!(matches!(
        s.insert_identity_row(dup),
        Err(StorageError::DuplicateKey { table: "identities", .. })
    ));
}

#[test]
fn at_ent_db_03_credit_spend_never_goes_negative() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 1);

    assert_eq!(s.spend_credit(uid).unwrap(), 0);
    assert!(matches!(
        s.spend_credit(uid),
        Err(StorageError::ContractViolation(_))
    ));
    assert_eq!(s.identity_row(uid).unwrap().credits, 0);
}

#[test]
fn at_ent_db_04_token_requires_existing_identity() {
    let mut s = TurnstileStore::new_in_memory();
    let token = TokenCode::new("AB12CD").unwrap();
    let row = AccessTokenRecord::v1(token, UserId(42), t0());

    assert!(matches!(
        s.insert_token_row(row),
        Err(StorageError::ForeignKeyViolation { table: "access_tokens", .. })
    ));
}

#[test]
fn at_ent_db_05_scan_stamp_covers_all_active_tokens() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 3);
    let a = TokenCode::new("AAAAAA").unwrap();
    let b = TokenCode::new("BBBBBB").unwrap();
    let c = TokenCode::new("CCCCCC").unwrap();
    s.insert_token_row(AccessTokenRecord::v1(a.clone(), uid, t0()))
        .unwrap();
    s.insert_token_row(AccessTokenRecord::v1(b.clone(), uid, t0()))
        .unwrap();
    s.insert_token_row(AccessTokenRecord::v1(c.clone(), uid, t0()))
        .unwrap();
    s.deactivate_token(&c).unwrap();

    let at = t0() + Duration::minutes(10);
    s.stamp_token_scan(uid, &a, at).unwrap();

    assert_eq!(s.token_row("AAAAAA").unwrap().last_scan_at, Some(at));
    assert_eq!(s.token_row("BBBBBB").unwrap().last_scan_at, Some(at));
    assert_eq!(s.token_row("CCCCCC").unwrap().last_scan_at, None);
    assert_eq!(s.token_row("AAAAAA").unwrap().scan_count, 1);
    assert_eq!(s.token_row("BBBBBB").unwrap().scan_count, 0);
    assert_eq!(s.active_token_rows(uid).len(), 2);
}

#[test]
fn at_ent_db_06_membership_issue_and_usage_mutation() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 0);
    let mid = s.insert_membership_row(membership_input(uid), t0()).unwrap();

    let at = t0() + Duration::hours(1);
    s.apply_membership_usage(mid, 1, at, false).unwrap();

    let row = s.membership_row(mid).unwrap();
    assert_eq!(row.status, MembershipStatus::Active);
    assert_eq!(row.daily_usage_count, 1);
    assert_eq!(row.last_usage_at, Some(at));
    assert_eq!(row.sessions_used, 0);
}

#[test]
fn at_ent_db_07_session_counter_only_moves_when_capped() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 0);
    let mut input = membership_input(uid);
    input.daily_limit = None;
    input.sessions_total = Some(10);
    let mid = s.insert_membership_row(input, t0()).unwrap();

    s.apply_membership_usage(mid, 1, t0(), true).unwrap();

    let row = s.membership_row(mid).unwrap();
    assert_eq!(row.sessions_used, 1);
    // no daily limit on this package, daily counter untouched
    assert_eq!(row.daily_usage_count, 0);
    assert_eq!(row.last_usage_at, None);
}

#[test]
fn at_ent_db_08_package_edit_leaves_issued_membership_untouched() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 0);
    let pkg = s
        .insert_package_row(
            "monthly".to_string(),
            "Monthly Unlimited".to_string(),
            1200,
            30,
            Some(1),
            None,
            t0(),
        )
        .unwrap();
    let mut input = membership_input(uid);
    input.package_id = Some(pkg);
    let mid = s.insert_membership_row(input, t0()).unwrap();

    s.update_package_terms(pkg, 1500, 30, Some(2), None).unwrap();

    assert_eq!(s.package_row(pkg).unwrap().daily_entry_limit, Some(2));
    assert_eq!(s.membership_row(mid).unwrap().daily_limit, Some(1));
    assert_eq!(
        s.membership_row(mid).unwrap().package_name_cache,
        "Monthly Unlimited"
    );
}

#[test]
fn at_ent_db_09_order_status_transitions_persist() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 0);
    let order_id = OrderId::new("ord-20240601-0001").unwrap();
    s.insert_order_row(PaymentOrderRecord::v1(
        order_id.clone(),
        uid,
        OrderKind::Credits { token_amount: 10 },
        900,
        t0(),
    ))
    .unwrap();

    assert_eq!(s.order_row(&order_id).unwrap().status, OrderStatus::Pending);

    let paid_at = t0() + Duration::minutes(2);
    s.set_order_paid(&order_id, paid_at, None).unwrap();
    let row = s.order_row(&order_id).unwrap();
    assert_eq!(row.status, OrderStatus::Paid);
    assert_eq!(row.paid_at, Some(paid_at));
}

#[test]
fn at_ent_db_10_presence_flip_updates_timestamps() {
    let mut s = TurnstileStore::new_in_memory();
    let uid = seed_identity(&mut s, 1, 0);

    let entered = t0() + Duration::minutes(1);
    s.set_presence(uid, true, entered).unwrap();
    assert!(s.identity_row(uid).unwrap().is_in_gym);
    assert_eq!(s.identity_row(uid).unwrap().last_entry_at, Some(entered));

    let left = t0() + Duration::hours(2);
    s.set_presence(uid, false, left).unwrap();
    let row = s.identity_row(uid).unwrap();
    assert!(!row.is_in_gym);
    assert_eq!(row.last_exit_at, Some(left));
    assert_eq!(row.last_entry_at, Some(entered));
}
