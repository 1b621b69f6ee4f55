#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use turnstile_contracts::admission::{AdmissionReason, DeclaredDirection, DeviceId, TokenCode, UserId};
use turnstile_contracts::common::mask_token;
use turnstile_contracts::entitlement::{MembershipId, MembershipStatus, MembershipView, PackageId};
use turnstile_contracts::payment::{OrderId, OrderKind, OrderStatus};
use turnstile_contracts::presence::{InferredDirection, PresenceSessionId, PresenceSessionStatus};
use turnstile_contracts::admission::DoorActuationStatus;
use turnstile_contracts::{ContractViolation, SchemaVersion, Validate};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    NotFound { table: &'static str, key: String },
    DuplicateKey { table: &'static str, key: String },
    ForeignKeyViolation { table: &'static str, key: String },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

// ------------------------
// Entitlement store rows.
// ------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub schema_version: SchemaVersion,
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub credits: u32,
    pub is_trainer: bool,
    pub is_in_gym: bool,
    pub last_entry_at: Option<DateTime<Utc>>,
    pub last_exit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn v1(
        user_id: UserId,
        email: impl Into<String>,
        name: impl Into<String>,
        credits: u32,
        is_trainer: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SchemaVersion(1),
            user_id,
            email: email.into(),
            name: name.into(),
            credits,
            is_trainer,
            is_in_gym: false,
            last_entry_at: None,
            last_exit_at: None,
            created_at,
        }
    }
}

impl Validate for IdentityRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "identity_record.email",
                reason: "must be a non-empty email address",
            });
        }
        if self.name.trim().is_empty() || self.name.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "identity_record.name",
                reason: "must be non-empty and <= 128 chars",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenRecord {
    pub schema_version: SchemaVersion,
    pub token: TokenCode,
    pub user_id: UserId,
    pub is_active: bool,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub scan_count: u64,
    pub created_at: DateTime<Utc>,
}

impl AccessTokenRecord {
    pub fn v1(token: TokenCode, user_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SchemaVersion(1),
            token,
            user_id,
            is_active: true,
            last_scan_at: None,
            scan_count: 0,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipPackageRecord {
    pub schema_version: SchemaVersion,
    pub package_id: PackageId,
    pub slug: String,
    pub name: String,
    pub price: u32,
    pub duration_days: u32,
    pub daily_entry_limit: Option<u32>,
    pub session_limit: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Validate for MembershipPackageRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.slug.trim().is_empty() || self.slug.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "membership_package_record.slug",
                reason: "must be non-empty and <= 64 chars",
            });
        }
        if self.name.trim().is_empty() || self.name.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "membership_package_record.name",
                reason: "must be non-empty and <= 128 chars",
            });
        }
        if self.duration_days == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "membership_package_record.duration_days",
                reason: "must be > 0",
            });
        }
        if self.daily_entry_limit == Some(0) || self.session_limit == Some(0) {
            return Err(ContractViolation::InvalidValue {
                field: "membership_package_record.limits",
                reason: "limits must be > 0 when present",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub schema_version: SchemaVersion,
    pub membership_id: MembershipId,
    pub user_id: UserId,
    pub package_id: Option<PackageId>,
    /// Snapshot of the package name at issue time; survives template edits.
    pub package_name_cache: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: MembershipStatus,
    pub daily_limit: Option<u32>,
    pub daily_usage_count: u32,
    pub last_usage_at: Option<DateTime<Utc>>,
    pub sessions_total: Option<u32>,
    pub sessions_used: u32,
    pub created_at: DateTime<Utc>,
}

impl MembershipRecord {
    pub fn to_view(&self) -> MembershipView {
        MembershipView {
            membership_id: self.membership_id,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            status: self.status,
            daily_limit: self.daily_limit,
            daily_usage_count: self.daily_usage_count,
            last_usage_at: self.last_usage_at,
            sessions_total: self.sessions_total,
            sessions_used: self.sessions_used,
        }
    }
}

impl Validate for MembershipRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.to_view().validate()?;
        if self.package_name_cache.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "membership_record.package_name_cache",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Input for issuing a membership; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipInput {
    pub user_id: UserId,
    pub package_id: Option<PackageId>,
    pub package_name_cache: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub daily_limit: Option<u32>,
    pub sessions_total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrderRecord {
    pub schema_version: SchemaVersion,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub kind: OrderKind,
    pub price: u32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Backlink set when a membership order instantiates its membership.
    pub membership_id: Option<MembershipId>,
}

impl PaymentOrderRecord {
    pub fn v1(
        order_id: OrderId,
        user_id: UserId,
        kind: OrderKind,
        price: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SchemaVersion(1),
            order_id,
            user_id,
            kind,
            price,
            status: OrderStatus::Pending,
            created_at,
            paid_at: None,
            membership_id: None,
        }
    }
}

impl Validate for PaymentOrderRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.order_id.validate()?;
        self.kind.validate()
    }
}

// ------------------------
// Append-only ledgers.
// ------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AuditLogId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogInput {
    pub token_string: String,
    pub user_id: Option<UserId>,
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub inferred_direction: Option<InferredDirection>,
    pub declared_direction: Option<DeclaredDirection>,
    pub direction_mismatch: bool,
    pub device_id: Option<DeviceId>,
    pub scanned_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl Validate for AuditLogInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.token_string.is_empty() || self.token_string.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "audit_log_input.token_string",
                reason: "must be non-empty and <= 128 chars",
            });
        }
        if self.allowed && !self.reason.is_allow() {
            return Err(ContractViolation::InvalidValue {
                field: "audit_log_input.reason",
                reason: "allowed row requires an allow reason",
            });
        }
        if !self.allowed && self.reason.is_allow() {
            return Err(ContractViolation::InvalidValue {
                field: "audit_log_input.reason",
                reason: "denied row requires a deny reason",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRecord {
    pub audit_id: AuditLogId,
    /// Token string is kept verbatim so the row outlives token deletion.
    pub token_string: String,
    pub raw_token_masked: String,
    pub user_id: Option<UserId>,
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub inferred_direction: Option<InferredDirection>,
    pub declared_direction: Option<DeclaredDirection>,
    pub direction_mismatch: bool,
    pub device_id: Option<DeviceId>,
    pub scanned_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSessionRecord {
    pub session_id: PresenceSessionId,
    pub user_id: UserId,
    pub token: Option<TokenCode>,
    pub membership_id: Option<MembershipId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    pub status: PresenceSessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoorActuationId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorActuationRecord {
    pub actuation_id: DoorActuationId,
    pub device_id: Option<DeviceId>,
    pub duration_s: u32,
    pub status: DoorActuationStatus,
    pub requested_at: DateTime<Utc>,
}

// ------------------------
// Store.
// ------------------------

/// Typed in-memory entitlement store. Row keys mirror the relational
/// schema of the production deployment; append-only ledgers stay ordered
/// by insertion.
#[derive(Debug, Default, Clone)]
pub struct TurnstileStore {
    identities: BTreeMap<UserId, IdentityRecord>,
    tokens: BTreeMap<TokenCode, AccessTokenRecord>,
    tokens_by_user: BTreeMap<UserId, BTreeSet<TokenCode>>,

    packages: BTreeMap<PackageId, MembershipPackageRecord>,
    next_package_seq: u64,

    memberships: BTreeMap<MembershipId, MembershipRecord>,
    memberships_by_user: BTreeMap<UserId, BTreeSet<MembershipId>>,
    next_membership_seq: u64,

    orders: BTreeMap<OrderId, PaymentOrderRecord>,

    audit_ledger: Vec<AuditLogRecord>,
    next_audit_seq: u64,

    presence_sessions: Vec<PresenceSessionRecord>,
    next_presence_session_seq: u64,

    door_ledger: Vec<DoorActuationRecord>,
    next_door_seq: u64,
}

impl TurnstileStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    // --- identities ---

    pub fn insert_identity_row(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.identities.contains_key(&record.user_id) {
            return Err(StorageError::DuplicateKey {
                table: "identities",
                key: format!("{}", record.user_id.0),
            });
        }
        self.identities.insert(record.user_id, record);
        Ok(())
    }

    pub fn identity_row(&self, user_id: UserId) -> Option<&IdentityRecord> {
        self.identities.get(&user_id)
    }

    pub fn set_presence(
        &mut self,
        user_id: UserId,
        is_in_gym: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let identity = self.identity_row_mut(user_id)?;
        identity.is_in_gym = is_in_gym;
        if is_in_gym {
            identity.last_entry_at = Some(at);
        } else {
            identity.last_exit_at = Some(at);
        }
        Ok(())
    }

    /// Clear presence entirely (repair path when no audit rows exist).
    pub fn reset_presence(&mut self, user_id: UserId) -> Result<(), StorageError> {
        let identity = self.identity_row_mut(user_id)?;
        identity.is_in_gym = false;
        identity.last_entry_at = None;
        identity.last_exit_at = None;
        Ok(())
    }

    pub fn add_credits(&mut self, user_id: UserId, amount: u32) -> Result<u32, StorageError> {
        let identity = self.identity_row_mut(user_id)?;
        identity.credits = identity.credits.saturating_add(amount);
        Ok(identity.credits)
    }

    /// Spend exactly one credit. The unsigned balance makes a negative
    /// result unrepresentable; the caller must have re-checked the balance
    /// under the store's serialization.
    pub fn spend_credit(&mut self, user_id: UserId) -> Result<u32, StorageError> {
        let identity = self.identity_row_mut(user_id)?;
        identity.credits =
            identity
                .credits
                .checked_sub(1)
                .ok_or(StorageError::ContractViolation(
                    ContractViolation::InvalidValue {
                        field: "identity_record.credits",
                        reason: "balance already zero",
                    },
                ))?;
        Ok(identity.credits)
    }

    pub fn revoke_credits(&mut self, user_id: UserId, amount: u32) -> Result<u32, StorageError> {
        let identity = self.identity_row_mut(user_id)?;
        identity.credits = identity.credits.saturating_sub(amount);
        Ok(identity.credits)
    }

    fn identity_row_mut(&mut self, user_id: UserId) -> Result<&mut IdentityRecord, StorageError> {
        self.identities
            .get_mut(&user_id)
            .ok_or(StorageError::NotFound {
                table: "identities",
                key: format!("{}", user_id.0),
            })
    }

    // --- access tokens ---

    pub fn insert_token_row(&mut self, record: AccessTokenRecord) -> Result<(), StorageError> {
        record.token.validate()?;
        if !self.identities.contains_key(&record.user_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "access_tokens",
                key: format!("user:{}", record.user_id.0),
            });
        }
        if self.tokens.contains_key(&record.token) {
            return Err(StorageError::DuplicateKey {
                table: "access_tokens",
                key: record.token.as_str().to_string(),
            });
        }
        self.tokens_by_user
            .entry(record.user_id)
            .or_default()
            .insert(record.token.clone());
        self.tokens.insert(record.token.clone(), record);
        Ok(())
    }

    pub fn token_row(&self, code: &str) -> Option<&AccessTokenRecord> {
        let code = TokenCode::new(code).ok()?;
        self.tokens.get(&code)
    }

    pub fn token_exists(&self, code: &str) -> bool {
        self.token_row(code).is_some()
    }

    pub fn deactivate_token(&mut self, code: &TokenCode) -> Result<(), StorageError> {
        let token = self.tokens.get_mut(code).ok_or(StorageError::NotFound {
            table: "access_tokens",
            key: code.as_str().to_string(),
        })?;
        token.is_active = false;
        Ok(())
    }

    /// All active tokens of an identity, cooldown source.
    pub fn active_token_rows(&self, user_id: UserId) -> Vec<&AccessTokenRecord> {
        self.tokens_by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|code| self.tokens.get(code))
            .filter(|t| t.is_active)
            .collect()
    }

    /// Stamp `last_scan_at` on every active token of the identity and bump
    /// the scanned token's usage counter. Cooldown is identity-scoped, so
    /// the stamp must not be limited to the token that was presented.
    pub fn stamp_token_scan(
        &mut self,
        user_id: UserId,
        scanned: &TokenCode,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let codes: Vec<TokenCode> = self
            .tokens_by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        if codes.is_empty() {
            return Err(StorageError::NotFound {
                table: "access_tokens",
                key: format!("user:{}", user_id.0),
            });
        }
        for code in codes {
            if let Some(token) = self.tokens.get_mut(&code) {
                if token.is_active {
                    token.last_scan_at = Some(at);
                }
                if &code == scanned {
                    token.scan_count += 1;
                }
            }
        }
        Ok(())
    }

    // --- membership packages ---

    pub fn insert_package_row(
        &mut self,
        slug: impl Into<String>,
        name: impl Into<String>,
        price: u32,
        duration_days: u32,
        daily_entry_limit: Option<u32>,
        session_limit: Option<u32>,
        created_at: DateTime<Utc>,
    ) -> Result<PackageId, StorageError> {
        self.next_package_seq += 1;
        let record = MembershipPackageRecord {
            schema_version: SchemaVersion(1),
            package_id: PackageId(self.next_package_seq),
            slug: slug.into(),
            name: name.into(),
            price,
            duration_days,
            daily_entry_limit,
            session_limit,
            is_active: true,
            created_at,
        };
        record.validate().map_err(|e| {
            self.next_package_seq -= 1;
            StorageError::from(e)
        })?;
        let id = record.package_id;
        self.packages.insert(id, record);
        Ok(id)
    }

    pub fn package_row(&self, package_id: PackageId) -> Option<&MembershipPackageRecord> {
        self.packages.get(&package_id)
    }

    pub fn set_package_active(
        &mut self,
        package_id: PackageId,
        is_active: bool,
    ) -> Result<(), StorageError> {
        let package = self
            .packages
            .get_mut(&package_id)
            .ok_or(StorageError::NotFound {
                table: "membership_packages",
                key: format!("{}", package_id.0),
            })?;
        package.is_active = is_active;
        Ok(())
    }

    /// Administrative template edit. Issued memberships and frozen order
    /// snapshots are unaffected.
    pub fn update_package_terms(
        &mut self,
        package_id: PackageId,
        price: u32,
        duration_days: u32,
        daily_entry_limit: Option<u32>,
        session_limit: Option<u32>,
    ) -> Result<(), StorageError> {
        let package = self
            .packages
            .get_mut(&package_id)
            .ok_or(StorageError::NotFound {
                table: "membership_packages",
                key: format!("{}", package_id.0),
            })?;
        let mut updated = package.clone();
        updated.price = price;
        updated.duration_days = duration_days;
        updated.daily_entry_limit = daily_entry_limit;
        updated.session_limit = session_limit;
        updated.validate()?;
        *package = updated;
        Ok(())
    }

    // --- memberships ---

    pub fn insert_membership_row(
        &mut self,
        input: MembershipInput,
        created_at: DateTime<Utc>,
    ) -> Result<MembershipId, StorageError> {
        if !self.identities.contains_key(&input.user_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "memberships",
                key: format!("user:{}", input.user_id.0),
            });
        }
        let record = MembershipRecord {
            schema_version: SchemaVersion(1),
            membership_id: MembershipId(self.next_membership_seq + 1),
            user_id: input.user_id,
            package_id: input.package_id,
            package_name_cache: input.package_name_cache,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            status: MembershipStatus::Active,
            daily_limit: input.daily_limit,
            daily_usage_count: 0,
            last_usage_at: None,
            sessions_total: input.sessions_total,
            sessions_used: 0,
            created_at,
        };
        record.validate()?;
        self.next_membership_seq += 1;
        let id = record.membership_id;
        self.memberships_by_user
            .entry(record.user_id)
            .or_default()
            .insert(id);
        self.memberships.insert(id, record);
        Ok(id)
    }

    pub fn membership_row(&self, membership_id: MembershipId) -> Option<&MembershipRecord> {
        self.memberships.get(&membership_id)
    }

    pub fn membership_views_for_user(&self, user_id: UserId) -> Vec<MembershipView> {
        self.memberships_by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.memberships.get(id))
            .map(MembershipRecord::to_view)
            .collect()
    }

    pub fn set_membership_status(
        &mut self,
        membership_id: MembershipId,
        status: MembershipStatus,
    ) -> Result<(), StorageError> {
        let membership = self.membership_row_mut(membership_id)?;
        membership.status = status;
        Ok(())
    }

    /// Apply the usage mutation computed by the ledger. `daily_usage_count`
    /// is the post-reset value (1 on the first entry of a new local day).
    pub fn apply_membership_usage(
        &mut self,
        membership_id: MembershipId,
        daily_usage_count: u32,
        last_usage_at: DateTime<Utc>,
        increment_session: bool,
    ) -> Result<(), StorageError> {
        let membership = self.membership_row_mut(membership_id)?;
        if membership.daily_limit.is_some() {
            membership.daily_usage_count = daily_usage_count;
            membership.last_usage_at = Some(last_usage_at);
        }
        if increment_session && membership.sessions_total.is_some() {
            membership.sessions_used += 1;
        }
        Ok(())
    }

    fn membership_row_mut(
        &mut self,
        membership_id: MembershipId,
    ) -> Result<&mut MembershipRecord, StorageError> {
        self.memberships
            .get_mut(&membership_id)
            .ok_or(StorageError::NotFound {
                table: "memberships",
                key: format!("{}", membership_id.0),
            })
    }

    // --- payment orders ---

    pub fn insert_order_row(&mut self, record: PaymentOrderRecord) -> Result<(), StorageError> {
        record.validate()?;
        if !self.identities.contains_key(&record.user_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "payment_orders",
                key: format!("user:{}", record.user_id.0),
            });
        }
        if self.orders.contains_key(&record.order_id) {
            return Err(StorageError::DuplicateKey {
                table: "payment_orders",
                key: record.order_id.as_str().to_string(),
            });
        }
        self.orders.insert(record.order_id.clone(), record);
        Ok(())
    }

    pub fn order_row(&self, order_id: &OrderId) -> Option<&PaymentOrderRecord> {
        self.orders.get(order_id)
    }

    pub fn set_order_paid(
        &mut self,
        order_id: &OrderId,
        paid_at: DateTime<Utc>,
        membership_id: Option<MembershipId>,
    ) -> Result<(), StorageError> {
        let order = self.order_row_mut(order_id)?;
        order.status = OrderStatus::Paid;
        order.paid_at = Some(paid_at);
        order.membership_id = membership_id;
        Ok(())
    }

    pub fn set_order_failed(
        &mut self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<(), StorageError> {
        let order = self.order_row_mut(order_id)?;
        order.status = status;
        Ok(())
    }

    fn order_row_mut(
        &mut self,
        order_id: &OrderId,
    ) -> Result<&mut PaymentOrderRecord, StorageError> {
        self.orders
            .get_mut(order_id)
            .ok_or(StorageError::NotFound {
                table: "payment_orders",
                key: order_id.as_str().to_string(),
            })
    }

    // --- audit ledger ---

    pub fn append_audit_row(&mut self, input: AuditLogInput) -> Result<AuditLogId, StorageError> {
        input.validate()?;
        self.next_audit_seq += 1;
        let id = AuditLogId(self.next_audit_seq);
        self.audit_ledger.push(AuditLogRecord {
            audit_id: id,
            raw_token_masked: mask_token(&input.token_string),
            token_string: input.token_string,
            user_id: input.user_id,
            allowed: input.allowed,
            reason: input.reason,
            inferred_direction: input.inferred_direction,
            declared_direction: input.declared_direction,
            direction_mismatch: input.direction_mismatch,
            device_id: input.device_id,
            scanned_at: input.scanned_at,
            processed_at: input.processed_at,
        });
        Ok(id)
    }

    pub fn audit_rows(&self) -> &[AuditLogRecord] {
        &self.audit_ledger
    }

    pub fn last_audit_row_for_user(&self, user_id: UserId) -> Option<&AuditLogRecord> {
        self.audit_ledger
            .iter()
            .rev()
            .find(|row| row.user_id == Some(user_id))
    }

    // --- presence sessions ---

    pub fn start_presence_session(
        &mut self,
        user_id: UserId,
        token: Option<TokenCode>,
        membership_id: Option<MembershipId>,
        started_at: DateTime<Utc>,
    ) -> Result<PresenceSessionId, StorageError> {
        if !self.identities.contains_key(&user_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "presence_sessions",
                key: format!("user:{}", user_id.0),
            });
        }
        self.next_presence_session_seq += 1;
        let id = PresenceSessionId(self.next_presence_session_seq);
        self.presence_sessions.push(PresenceSessionRecord {
            session_id: id,
            user_id,
            token,
            membership_id,
            started_at,
            ended_at: None,
            duration_seconds: None,
            status: PresenceSessionStatus::Active,
        });
        Ok(id)
    }

    pub fn active_presence_session(&self, user_id: UserId) -> Option<&PresenceSessionRecord> {
        self.presence_sessions
            .iter()
            .rev()
            .find(|s| s.user_id == user_id && s.status == PresenceSessionStatus::Active)
    }

    /// Close the most recent active session of the identity, if any. Exits
    /// without a matching session (state drift) are tolerated.
    pub fn close_presence_session(
        &mut self,
        user_id: UserId,
        ended_at: DateTime<Utc>,
    ) -> Option<PresenceSessionId> {
        let session = self
            .presence_sessions
            .iter_mut()
            .rev()
            .find(|s| s.user_id == user_id && s.status == PresenceSessionStatus::Active)?;
        session.ended_at = Some(ended_at);
        session.status = PresenceSessionStatus::Closed;
        let duration = (ended_at - session.started_at).num_seconds().max(0) as u64;
        session.duration_seconds = Some(duration);
        Some(session.session_id)
    }

    pub fn force_close_presence_session(
        &mut self,
        session_id: PresenceSessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let session = self
            .presence_sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or(StorageError::NotFound {
                table: "presence_sessions",
                key: format!("{}", session_id.0),
            })?;
        if session.status != PresenceSessionStatus::Active {
            return Ok(());
        }
        session.ended_at = Some(ended_at);
        session.status = PresenceSessionStatus::ForceClosed;
        let duration = (ended_at - session.started_at).num_seconds().max(0) as u64;
        session.duration_seconds = Some(duration);
        Ok(())
    }

    pub fn presence_session_rows(&self) -> &[PresenceSessionRecord] {
        &self.presence_sessions
    }

    // --- door actuation ledger ---

    pub fn append_door_row(
        &mut self,
        device_id: Option<DeviceId>,
        duration_s: u32,
        status: DoorActuationStatus,
        requested_at: DateTime<Utc>,
    ) -> Result<DoorActuationId, StorageError> {
        if duration_s == 0 || duration_s > 60 {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidRange {
                    field: "door_actuation_record.duration_s",
                    min: 1.0,
                    max: 60.0,
                    got: duration_s as f64,
                },
            ));
        }
        self.next_door_seq += 1;
        let id = DoorActuationId(self.next_door_seq);
        self.door_ledger.push(DoorActuationRecord {
            actuation_id: id,
            device_id,
            duration_s,
            status,
            requested_at,
        });
        Ok(id)
    }

    pub fn door_rows(&self) -> &[DoorActuationRecord] {
        &self.door_ledger
    }
}
