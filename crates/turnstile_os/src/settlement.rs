#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};

use turnstile_contracts::admission::UserId;
use turnstile_contracts::entitlement::PackageId;
use turnstile_contracts::payment::{
    GatewayStatus, OrderId, OrderKind, OrderStatus, PackageSnapshot, SettlementOutcome,
    SettlementRejection,
};
use turnstile_engines::settlement::normalize_gateway_status;
use turnstile_storage::store::{
    MembershipInput, PaymentOrderRecord, StorageError, TurnstileStore,
};

/// Payment settlement over the order table. The gateway replays its
/// callback freely; the pending-status check makes every transition apply
/// at most once, and a paid order is never downgraded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaymentSettlement;

impl PaymentSettlement {
    /// Open a pending credit-topup order.
    pub fn create_credit_order(
        &self,
        store: &mut TurnstileStore,
        order_id: OrderId,
        user_id: UserId,
        token_amount: u32,
        price: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        store.insert_order_row(PaymentOrderRecord::v1(
            order_id,
            user_id,
            OrderKind::Credits { token_amount },
            price,
            now,
        ))
    }

    /// Open a pending membership order, freezing the package terms into the
    /// order so later template edits cannot change what was bought.
    pub fn create_membership_order(
        &self,
        store: &mut TurnstileStore,
        order_id: OrderId,
        user_id: UserId,
        package_id: PackageId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let Some(package) = store.package_row(package_id) else {
            return Err(StorageError::NotFound {
                table: "membership_packages",
                key: format!("{}", package_id.0),
            });
        };
        if !package.is_active {
            return Err(StorageError::ContractViolation(
                turnstile_contracts::ContractViolation::InvalidValue {
                    field: "membership_package_record.is_active",
                    reason: "package is not offered",
                },
            ));
        }
        let snapshot = PackageSnapshot {
            package_id,
            name: package.name.clone(),
            duration_days: package.duration_days,
            daily_entry_limit: package.daily_entry_limit,
            session_limit: package.session_limit,
            price: package.price,
        };
        let price = snapshot.price;
        store.insert_order_row(PaymentOrderRecord::v1(
            order_id,
            user_id,
            OrderKind::Membership { snapshot },
            price,
            now,
        ))
    }

    /// Settle an order as paid and apply its benefit exactly once. Replays
    /// of an already-paid order report `AlreadyApplied` without touching
    /// balances; orders in any other terminal state are rejected.
    pub fn mark_order_paid(
        &self,
        store: &mut TurnstileStore,
        order_id: &OrderId,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome, StorageError> {
        let Some(order) = store.order_row(order_id) else {
            return Ok(SettlementOutcome::Rejected(
                SettlementRejection::OrderNotFound,
            ));
        };
        match order.status {
            OrderStatus::Paid => return Ok(SettlementOutcome::AlreadyApplied),
            OrderStatus::Pending => {}
            current => {
                return Ok(SettlementOutcome::Rejected(SettlementRejection::NotPending {
                    current,
                }));
            }
        }
        let user_id = order.user_id;
        let kind = order.kind.clone();
        if store.identity_row(user_id).is_none() {
            return Ok(SettlementOutcome::Rejected(
                SettlementRejection::IdentityNotFound,
            ));
        }

        let membership_id = match kind {
            OrderKind::Credits { token_amount } => {
                store.add_credits(user_id, token_amount)?;
                None
            }
            OrderKind::Membership { snapshot } => {
                let membership_id = store.insert_membership_row(
                    MembershipInput {
                        user_id,
                        package_id: Some(snapshot.package_id),
                        package_name_cache: snapshot.name,
                        valid_from: now,
                        valid_to: now + Duration::days(i64::from(snapshot.duration_days)),
                        daily_limit: snapshot.daily_entry_limit,
                        sessions_total: snapshot.session_limit,
                    },
                    now,
                )?;
                Some(membership_id)
            }
        };
        store.set_order_paid(order_id, now, membership_id)?;
        Ok(SettlementOutcome::AppliedFirstTime)
    }

    /// Record a failed or cancelled gateway outcome. A paid order is never
    /// overwritten; repeating a failure is a no-op.
    pub fn mark_order_failed(
        &self,
        store: &mut TurnstileStore,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<SettlementOutcome, StorageError> {
        let Some(order) = store.order_row(order_id) else {
            return Ok(SettlementOutcome::Rejected(
                SettlementRejection::OrderNotFound,
            ));
        };
        match order.status {
            OrderStatus::Pending => {
                store.set_order_failed(order_id, status)?;
                Ok(SettlementOutcome::AppliedFirstTime)
            }
            OrderStatus::Paid => Ok(SettlementOutcome::Rejected(
                SettlementRejection::NotPending {
                    current: OrderStatus::Paid,
                },
            )),
            _ => Ok(SettlementOutcome::AlreadyApplied),
        }
    }

    /// Entry point for both gateway callbacks: normalize the raw status
    /// string and route to the matching transition. An unrecognized status
    /// never moves the order.
    pub fn apply_gateway_status(
        &self,
        store: &mut TurnstileStore,
        order_id: &OrderId,
        raw_status: &str,
        now: DateTime<Utc>,
    ) -> Result<GatewayApplication, StorageError> {
        match normalize_gateway_status(raw_status) {
            GatewayStatus::Paid => {
                let outcome = self.mark_order_paid(store, order_id, now)?;
                Ok(GatewayApplication::Paid(outcome))
            }
            GatewayStatus::Failed(label) => {
                let status = if label == "cancelled" {
                    OrderStatus::Cancelled
                } else {
                    OrderStatus::Failed
                };
                let outcome = self.mark_order_failed(store, order_id, status)?;
                Ok(GatewayApplication::Failed(outcome))
            }
            GatewayStatus::Unrecognized => Ok(GatewayApplication::Unrecognized),
        }
    }
}

/// What a gateway callback did to the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayApplication {
    Paid(SettlementOutcome),
    Failed(SettlementOutcome),
    Unrecognized,
}
