#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use turnstile_contracts::admission::{DeviceId, DoorActuationStatus, TokenCode, UserId};
use turnstile_contracts::entitlement::{MembershipId, MembershipStatus, MembershipView, PackageId};
use turnstile_contracts::payment::{OrderId, OrderStatus};
use turnstile_contracts::presence::PresenceSessionId;

use crate::store::{
    AccessTokenRecord, AuditLogId, AuditLogInput, AuditLogRecord, DoorActuationId,
    DoorActuationRecord, IdentityRecord, MembershipInput, MembershipPackageRecord,
    MembershipRecord, PaymentOrderRecord, PresenceSessionRecord, StorageError, TurnstileStore,
};

/// Typed repository interface for identity + access token tables.
pub trait IdentityTablesRepo {
    fn insert_identity_row(&mut self, record: IdentityRecord) -> Result<(), StorageError>;
    fn identity_row(&self, user_id: UserId) -> Option<&IdentityRecord>;
    fn set_presence(
        &mut self,
        user_id: UserId,
        is_in_gym: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn add_credits(&mut self, user_id: UserId, amount: u32) -> Result<u32, StorageError>;
    fn spend_credit(&mut self, user_id: UserId) -> Result<u32, StorageError>;

    fn insert_token_row(&mut self, record: AccessTokenRecord) -> Result<(), StorageError>;
    fn token_row(&self, code: &str) -> Option<&AccessTokenRecord>;
    fn deactivate_token(&mut self, code: &TokenCode) -> Result<(), StorageError>;
    fn active_token_rows(&self, user_id: UserId) -> Vec<&AccessTokenRecord>;
    fn stamp_token_scan(
        &mut self,
        user_id: UserId,
        scanned: &TokenCode,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for package + membership tables.
pub trait EntitlementTablesRepo {
    #[allow(clippy::too_many_arguments)]
    fn insert_package_row(
        &mut self,
        slug: String,
        name: String,
        price: u32,
        duration_days: u32,
        daily_entry_limit: Option<u32>,
        session_limit: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Result<PackageId, StorageError>;
    fn package_row(&self, package_id: PackageId) -> Option<&MembershipPackageRecord>;
    fn set_package_active(
        &mut self,
        package_id: PackageId,
        is_active: bool,
    ) -> Result<(), StorageError>;

    fn insert_membership_row(
        &mut self,
        input: MembershipInput,
        created_at: DateTime<Utc>,
    ) -> Result<MembershipId, StorageError>;
    fn membership_row(&self, membership_id: MembershipId) -> Option<&MembershipRecord>;
    fn membership_views_for_user(&self, user_id: UserId) -> Vec<MembershipView>;
    fn set_membership_status(
        &mut self,
        membership_id: MembershipId,
        status: MembershipStatus,
    ) -> Result<(), StorageError>;
    fn apply_membership_usage(
        &mut self,
        membership_id: MembershipId,
        daily_usage_count: u32,
        last_usage_at: DateTime<Utc>,
        increment_session: bool,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for the payment order table.
pub trait PaymentTablesRepo {
    fn insert_order_row(&mut self, record: PaymentOrderRecord) -> Result<(), StorageError>;
    fn order_row(&self, order_id: &OrderId) -> Option<&PaymentOrderRecord>;
    fn set_order_paid(
        &mut self,
        order_id: &OrderId,
        paid_at: DateTime<Utc>,
        membership_id: Option<MembershipId>,
    ) -> Result<(), StorageError>;
    fn set_order_failed(
        &mut self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for append-only audit, presence session, and
/// door actuation ledgers.
pub trait AuditLedgersRepo {
    fn append_audit_row(&mut self, input: AuditLogInput) -> Result<AuditLogId, StorageError>;
    fn audit_rows(&self) -> &[AuditLogRecord];
    fn last_audit_row_for_user(&self, user_id: UserId) -> Option<&AuditLogRecord>;

    fn start_presence_session(
        &mut self,
        user_id: UserId,
        token: Option<TokenCode>,
        membership_id: Option<MembershipId>,
        started_at: DateTime<Utc>,
    ) -> Result<PresenceSessionId, StorageError>;
    fn active_presence_session(&self, user_id: UserId) -> Option<&PresenceSessionRecord>;
    fn close_presence_session(
        &mut self,
        user_id: UserId,
        ended_at: DateTime<Utc>,
    ) -> Option<PresenceSessionId>;
    fn force_close_presence_session(
        &mut self,
        session_id: PresenceSessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    fn presence_session_rows(&self) -> &[PresenceSessionRecord];

    fn append_door_row(
        &mut self,
        device_id: Option<DeviceId>,
        duration_s: u32,
        status: DoorActuationStatus,
        requested_at: DateTime<Utc>,
    ) -> Result<DoorActuationId, StorageError>;
    fn door_rows(&self) -> &[DoorActuationRecord];
}

impl IdentityTablesRepo for TurnstileStore {
    fn insert_identity_row(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        TurnstileStore::insert_identity_row(self, record)
    }
    fn identity_row(&self, user_id: UserId) -> Option<&IdentityRecord> {
        TurnstileStore::identity_row(self, user_id)
    }
    fn set_presence(
        &mut self,
        user_id: UserId,
        is_in_gym: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        TurnstileStore::set_presence(self, user_id, is_in_gym, at)
    }
    fn add_credits(&mut self, user_id: UserId, amount: u32) -> Result<u32, StorageError> {
        TurnstileStore::add_credits(self, user_id, amount)
    }
    fn spend_credit(&mut self, user_id: UserId) -> Result<u32, StorageError> {
        TurnstileStore::spend_credit(self, user_id)
    }
    fn insert_token_row(&mut self, record: AccessTokenRecord) -> Result<(), StorageError> {
        TurnstileStore::insert_token_row(self, record)
    }
    fn token_row(&self, code: &str) -> Option<&AccessTokenRecord> {
        TurnstileStore::token_row(self, code)
    }
    fn deactivate_token(&mut self, code: &TokenCode) -> Result<(), StorageError> {
        TurnstileStore::deactivate_token(self, code)
    }
    fn active_token_rows(&self, user_id: UserId) -> Vec<&AccessTokenRecord> {
        TurnstileStore::active_token_rows(self, user_id)
    }
    fn stamp_token_scan(
        &mut self,
        user_id: UserId,
        scanned: &TokenCode,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        TurnstileStore::stamp_token_scan(self, user_id, scanned, at)
    }
}

impl EntitlementTablesRepo for TurnstileStore {
    fn insert_package_row(
        &mut self,
        slug: String,
        name: String,
        price: u32,
        duration_days: u32,
        daily_entry_limit: Option<u32>,
        session_limit: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Result<PackageId, StorageError> {
        TurnstileStore::insert_package_row(
            self,
            slug,
            name,
            price,
            duration_days,
            daily_entry_limit,
            session_limit,
            created_at,
        )
    }
    fn package_row(&self, package_id: PackageId) -> Option<&MembershipPackageRecord> {
        TurnstileStore::package_row(self, package_id)
    }
    fn set_package_active(
        &mut self,
        package_id: PackageId,
        is_active: bool,
    ) -> Result<(), StorageError> {
        TurnstileStore::set_package_active(self, package_id, is_active)
    }
    fn insert_membership_row(
        &mut self,
        input: MembershipInput,
        created_at: DateTime<Utc>,
    ) -> Result<MembershipId, StorageError> {
        TurnstileStore::insert_membership_row(self, input, created_at)
    }
    fn membership_row(&self, membership_id: MembershipId) -> Option<&MembershipRecord> {
        TurnstileStore::membership_row(self, membership_id)
    }
    fn membership_views_for_user(&self, user_id: UserId) -> Vec<MembershipView> {
        TurnstileStore::membership_views_for_user(self, user_id)
    }
    fn set_membership_status(
        &mut self,
        membership_id: MembershipId,
        status: MembershipStatus,
    ) -> Result<(), StorageError> {
        TurnstileStore::set_membership_status(self, membership_id, status)
    }
    fn apply_membership_usage(
        &mut self,
        membership_id: MembershipId,
        daily_usage_count: u32,
        last_usage_at: DateTime<Utc>,
        increment_session: bool,
    ) -> Result<(), StorageError> {
        TurnstileStore::apply_membership_usage(
            self,
            membership_id,
            daily_usage_count,
            last_usage_at,
            increment_session,
        )
    }
}

impl PaymentTablesRepo for TurnstileStore {
    fn insert_order_row(&mut self, record: PaymentOrderRecord) -> Result<(), StorageError> {
        TurnstileStore::insert_order_row(self, record)
    }
    fn order_row(&self, order_id: &OrderId) -> Option<&PaymentOrderRecord> {
        TurnstileStore::order_row(self, order_id)
    }
    fn set_order_paid(
        &mut self,
        order_id: &OrderId,
        paid_at: DateTime<Utc>,
        membership_id: Option<MembershipId>,
    ) -> Result<(), StorageError> {
        TurnstileStore::set_order_paid(self, order_id, paid_at, membership_id)
    }
    fn set_order_failed(
        &mut self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), StorageError> {
        TurnstileStore::set_order_failed(self, order_id, status)
    }
}

impl AuditLedgersRepo for TurnstileStore {
    fn append_audit_row(&mut self, input: AuditLogInput) -> Result<AuditLogId, StorageError> {
        TurnstileStore::append_audit_row(self, input)
    }
    fn audit_rows(&self) -> &[AuditLogRecord] {
        TurnstileStore::audit_rows(self)
    }
    fn last_audit_row_for_user(&self, user_id: UserId) -> Option<&AuditLogRecord> {
        TurnstileStore::last_audit_row_for_user(self, user_id)
    }
    fn start_presence_session(
        &mut self,
        user_id: UserId,
        token: Option<TokenCode>,
        membership_id: Option<MembershipId>,
        started_at: DateTime<Utc>,
    ) -> Result<PresenceSessionId, StorageError> {
        TurnstileStore::start_presence_session(self, user_id, token, membership_id, started_at)
    }
    fn active_presence_session(&self, user_id: UserId) -> Option<&PresenceSessionRecord> {
        TurnstileStore::active_presence_session(self, user_id)
    }
    fn close_presence_session(
        &mut self,
        user_id: UserId,
        ended_at: DateTime<Utc>,
    ) -> Option<PresenceSessionId> {
        TurnstileStore::close_presence_session(self, user_id, ended_at)
    }
    fn force_close_presence_session(
        &mut self,
        session_id: PresenceSessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        TurnstileStore::force_close_presence_session(self, session_id, ended_at)
    }
    fn presence_session_rows(&self) -> &[PresenceSessionRecord] {
        TurnstileStore::presence_session_rows(self)
    }
    fn append_door_row(
        &mut self,
        device_id: Option<DeviceId>,
        duration_s: u32,
        status: DoorActuationStatus,
        requested_at: DateTime<Utc>,
    ) -> Result<DoorActuationId, StorageError> {
        TurnstileStore::append_door_row(self, device_id, duration_s, status, requested_at)
    }
    fn door_rows(&self) -> &[DoorActuationRecord] {
        TurnstileStore::door_rows(self)
    }
}
