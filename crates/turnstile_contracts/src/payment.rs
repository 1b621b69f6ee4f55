#![forbid(unsafe_code)]

use crate::common::{validate_id, validate_text};
use crate::entitlement::PackageId;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for OrderId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("order_id", &self.0, 64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Frozen copy of package terms captured when the order is created. Later
/// administrative edits to the package template never reach an order that
/// already carries its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSnapshot {
    pub package_id: PackageId,
    pub name: String,
    pub duration_days: u32,
    pub daily_entry_limit: Option<u32>,
    pub session_limit: Option<u32>,
    pub price: u32,
}

impl Validate for PackageSnapshot {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("package_snapshot.name", &self.name, 128)?;
        if self.duration_days == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "package_snapshot.duration_days",
                reason: "must be > 0",
            });
        }
        if self.daily_entry_limit == Some(0) {
            return Err(ContractViolation::InvalidValue {
                field: "package_snapshot.daily_entry_limit",
                reason: "must be > 0 when present",
            });
        }
        if self.session_limit == Some(0) {
            return Err(ContractViolation::InvalidValue {
                field: "package_snapshot.session_limit",
                reason: "must be > 0 when present",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKind {
    Credits { token_amount: u32 },
    Membership { snapshot: PackageSnapshot },
}

impl Validate for OrderKind {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            OrderKind::Credits { token_amount } => {
                if *token_amount == 0 {
                    return Err(ContractViolation::InvalidValue {
                        field: "order_kind.token_amount",
                        reason: "must be > 0",
                    });
                }
                Ok(())
            }
            OrderKind::Membership { snapshot } => snapshot.validate(),
        }
    }
}

/// Idempotency is a checked return value: the caller learns whether this
/// call applied the transition, found it already applied, or was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    AppliedFirstTime,
    AlreadyApplied,
    Rejected(SettlementRejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementRejection {
    OrderNotFound,
    NotPending { current: OrderStatus },
    IdentityNotFound,
}

/// Gateway-reported payment state after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    Failed(&'static str),
    Unrecognized,
}
