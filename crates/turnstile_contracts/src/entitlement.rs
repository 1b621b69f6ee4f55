#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use crate::admission::AdmissionReason;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MembershipId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipStatus {
    Active,
    Grace,
    Paused,
    Cancelled,
    Expired,
    Completed,
}

impl MembershipStatus {
    /// Whether this status keeps the membership eligible for entitlement.
    pub fn entitles(&self) -> bool {
        matches!(self, MembershipStatus::Active | MembershipStatus::Grace)
    }
}

/// Read-only membership view handed to the entitlement evaluator. The
/// ledger projects this from the stored membership row so the evaluator
/// stays a pure function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    pub membership_id: MembershipId,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: MembershipStatus,
    pub daily_limit: Option<u32>,
    pub daily_usage_count: u32,
    pub last_usage_at: Option<DateTime<Utc>>,
    pub sessions_total: Option<u32>,
    pub sessions_used: u32,
}

impl Validate for MembershipView {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.valid_to <= self.valid_from {
            return Err(ContractViolation::InvalidValue {
                field: "membership_view.valid_to",
                reason: "must be after valid_from",
            });
        }
        if let Some(limit) = self.daily_limit {
            if limit == 0 {
                return Err(ContractViolation::InvalidValue {
                    field: "membership_view.daily_limit",
                    reason: "must be > 0 when present",
                });
            }
        }
        if let Some(total) = self.sessions_total {
            if total == 0 {
                return Err(ContractViolation::InvalidValue {
                    field: "membership_view.sessions_total",
                    reason: "must be > 0 when present",
                });
            }
        }
        Ok(())
    }
}

/// What the evaluator decided and which path it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementPath {
    Membership(MembershipId),
    Credits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementVerdict {
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub path: Option<EntitlementPath>,
    pub daily_limit_hit: bool,
}

impl EntitlementVerdict {
    pub fn allow(path: EntitlementPath) -> Self {
        Self {
            allowed: true,
            reason: AdmissionReason::Ok,
            path: Some(path),
            daily_limit_hit: false,
        }
    }

    pub fn deny(reason: AdmissionReason) -> Self {
        Self {
            allowed: false,
            reason,
            path: None,
            daily_limit_hit: reason == AdmissionReason::DailyLimit,
        }
    }

    pub fn membership_id(&self) -> Option<MembershipId> {
        match &self.path {
            Some(EntitlementPath::Membership(id)) => Some(*id),
            _ => None,
        }
    }
}
