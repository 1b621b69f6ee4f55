#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use turnstile_contracts::admission::{
    AdmissionReason, AdmissionResult, AdmittedUser, DeclaredDirection, DeviceId,
    DoorActuationStatus, ScanRequest, TokenCode, UserId,
};
use turnstile_contracts::entitlement::MembershipId;
use turnstile_contracts::presence::InferredDirection;
use turnstile_contracts::Validate;
use turnstile_engines::cooldown::{CooldownGuard, CooldownVerdict};
use turnstile_engines::entitlement::EntitlementEvaluator;
use turnstile_engines::localday::GymCalendar;
use turnstile_engines::presence::infer_transition;
use turnstile_storage::store::{AuditLogInput, StorageError, TurnstileStore};

pub const DEFAULT_DOOR_OPEN_DURATION_S: u32 = 5;

/// The single admission pipeline behind every scan and verify endpoint.
/// Decisions and their mutations happen under one store borrow; everything
/// fallible is validated before the first row is touched, so a scan either
/// lands completely or not at all.
#[derive(Debug, Clone)]
pub struct AdmissionLedger {
    evaluator: EntitlementEvaluator,
    cooldown: CooldownGuard,
    door_open_duration_s: u32,
}

impl AdmissionLedger {
    pub fn new(calendar: GymCalendar) -> Self {
        Self {
            evaluator: EntitlementEvaluator::new(calendar),
            cooldown: CooldownGuard::default(),
            door_open_duration_s: DEFAULT_DOOR_OPEN_DURATION_S,
        }
    }

    pub fn with_door_open_duration_s(mut self, seconds: u32) -> Self {
        self.door_open_duration_s = seconds;
        self
    }

    pub fn evaluator(&self) -> &EntitlementEvaluator {
        &self.evaluator
    }

    /// Process one turnstile scan end to end: token resolution, cooldown,
    /// direction inference, entitlement, then (on allow) the full mutation
    /// set. Every attempt lands an audit row, including denials on tokens
    /// nobody owns.
    pub fn process_scan(
        &self,
        store: &mut TurnstileStore,
        req: &ScanRequest,
        declared: Option<DeclaredDirection>,
        now: DateTime<Utc>,
    ) -> Result<AdmissionResult, StorageError> {
        let scanned_at = req.timestamp;
        let device_id = DeviceId::new(req.device_id.as_str()).ok();

        let token = match TokenCode::new(req.token.as_str()) {
            Ok(token) => token,
            Err(_) => {
                return self.deny(
                    store,
                    DenialContext {
                        token_string: audit_token_string(&req.token),
                        user_id: None,
                        declared,
                        device_id,
                        scanned_at,
                        now,
                    },
                    AdmissionReason::InvalidToken,
                    0,
                    None,
                );
            }
        };

        let Some(token_row) = store.token_row(token.as_str()) else {
            return self.deny(
                store,
                DenialContext {
                    token_string: token.as_str().to_string(),
                    user_id: None,
                    declared,
                    device_id,
                    scanned_at,
                    now,
                },
                AdmissionReason::TokenNotFound,
                0,
                None,
            );
        };
        let user_id = token_row.user_id;
        let token_active = token_row.is_active;

        if !token_active {
            return self.deny(
                store,
                DenialContext {
                    token_string: token.as_str().to_string(),
                    user_id: Some(user_id),
                    declared,
                    device_id,
                    scanned_at,
                    now,
                },
                AdmissionReason::TokenDeactivated,
                0,
                None,
            );
        }

        let Some(identity) = store.identity_row(user_id) else {
            return self.deny(
                store,
                DenialContext {
                    token_string: token.as_str().to_string(),
                    user_id: Some(user_id),
                    declared,
                    device_id,
                    scanned_at,
                    now,
                },
                AdmissionReason::UserNotFound,
                0,
                None,
            );
        };
        let credits = identity.credits;
        let is_trainer = identity.is_trainer;
        let currently_inside = identity.is_in_gym;
        let user = AdmittedUser {
            name: Some(identity.name.clone()),
            email: Some(identity.email.clone()),
        };

        let transition = infer_transition(currently_inside, declared);
        let direction = transition.direction;

        // Cooldown before any entitlement reasoning; applies to trainers too.
        let last_scans: Vec<Option<DateTime<Utc>>> = store
            .active_token_rows(user_id)
            .iter()
            .map(|t| t.last_scan_at)
            .collect();
        if let CooldownVerdict::Active { seconds_left } = self.cooldown.check(last_scans, now) {
            return self.deny(
                store,
                DenialContext {
                    token_string: token.as_str().to_string(),
                    user_id: Some(user_id),
                    declared,
                    device_id,
                    scanned_at,
                    now,
                },
                AdmissionReason::Cooldown,
                credits,
                Some(seconds_left),
            );
        }

        let (reason, membership_id, spend) = if is_trainer {
            (AdmissionReason::TrainerAllowed, None, false)
        } else {
            let memberships = store.membership_views_for_user(user_id);
            let verdict = self.evaluator.evaluate(credits, &memberships, now, direction);
            if !verdict.allowed {
                return self.deny(
                    store,
                    DenialContext {
                        token_string: token.as_str().to_string(),
                        user_id: Some(user_id),
                        declared,
                        device_id,
                        scanned_at,
                        now,
                    },
                    verdict.reason,
                    credits,
                    None,
                );
            }
            let membership_id = verdict.membership_id();
            (AdmissionReason::Ok, membership_id, membership_id.is_none())
        };

        // Validation phase done. Build the audit input before mutating so a
        // contract failure cannot leave a half-applied scan.
        let audit = AuditLogInput {
            token_string: token.as_str().to_string(),
            user_id: Some(user_id),
            allowed: true,
            reason,
            inferred_direction: Some(direction),
            declared_direction: declared,
            direction_mismatch: transition.direction_mismatch,
            device_id: device_id.clone(),
            scanned_at,
            processed_at: now,
        };
        audit.validate()?;

        if let Some(membership_id) = membership_id {
            self.record_membership_usage(store, membership_id, direction, now)?;
        }
        let credits_left = if spend {
            store.spend_credit(user_id)?
        } else {
            credits
        };

        store.stamp_token_scan(user_id, &token, now)?;
        store.set_presence(user_id, direction.is_entry(), now)?;
        if direction.is_entry() {
            store.start_presence_session(user_id, Some(token.clone()), membership_id, now)?;
        } else {
            store.close_presence_session(user_id, now);
        }
        store.append_audit_row(audit)?;
        store.append_door_row(
            device_id,
            self.door_open_duration_s,
            DoorActuationStatus::Opened,
            now,
        )?;

        let result = AdmissionResult::Allowed {
            reason,
            credits_left,
            entry: direction.is_entry(),
            direction_mismatch: transition.direction_mismatch,
            membership_id: membership_id.map(|m| m.0),
            open_door: true,
            door_open_duration_s: Some(self.door_open_duration_s),
            user,
        };
        result.validate()?;
        Ok(result)
    }

    /// Read-only membership check for the kiosk verify endpoints. Reports on
    /// the most recently started membership regardless of status, so an
    /// inactive or expired card shows its own reason; an identity with no
    /// membership at all reads as expired.
    pub fn verify_membership(
        &self,
        store: &TurnstileStore,
        token: &str,
        direction: InferredDirection,
        now: DateTime<Utc>,
    ) -> AdmissionResult {
        let Ok(token) = TokenCode::new(token) else {
            return denied(AdmissionReason::InvalidToken, 0, None);
        };
        let Some(token_row) = store.token_row(token.as_str()) else {
            return denied(AdmissionReason::TokenNotFound, 0, None);
        };
        if !token_row.is_active {
            return denied(AdmissionReason::TokenDeactivated, 0, None);
        }
        let Some(identity) = store.identity_row(token_row.user_id) else {
            return denied(AdmissionReason::UserNotFound, 0, None);
        };

        let memberships = store.membership_views_for_user(token_row.user_id);
        let Some(membership) = self.evaluator.select_latest_membership(&memberships, now) else {
            return denied(AdmissionReason::MembershipExpired, identity.credits, None);
        };
        let verdict = self.evaluator.check_membership(membership, now, direction);
        if !verdict.allowed {
            return denied(verdict.reason, identity.credits, None);
        }
        AdmissionResult::Allowed {
            reason: AdmissionReason::Ok,
            credits_left: identity.credits,
            entry: direction.is_entry(),
            direction_mismatch: false,
            membership_id: Some(membership.membership_id.0),
            open_door: false,
            door_open_duration_s: None,
            user: AdmittedUser {
                name: Some(identity.name.clone()),
                email: Some(identity.email.clone()),
            },
        }
    }

    /// Daily usage counter for the membership path. The counter resets on
    /// the first entry of a new gym-local day; exits leave it untouched.
    fn record_membership_usage(
        &self,
        store: &mut TurnstileStore,
        membership_id: MembershipId,
        direction: InferredDirection,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if !direction.is_entry() {
            return Ok(());
        }
        let Some(membership) = store.membership_row(membership_id) else {
            return Err(StorageError::NotFound {
                table: "memberships",
                key: format!("{}", membership_id.0),
            });
        };
        let calendar: GymCalendar = self.evaluator.calendar();
        let same_day = membership
            .last_usage_at
            .map(|last| calendar.same_local_day(now, last))
            .unwrap_or(false);
        let next_count = if same_day {
            membership.daily_usage_count + 1
        } else {
            1
        };
        store.apply_membership_usage(membership_id, next_count, now, true)
    }

    fn deny(
        &self,
        store: &mut TurnstileStore,
        ctx: DenialContext,
        reason: AdmissionReason,
        credits_left: u32,
        cooldown_seconds_left: Option<i64>,
    ) -> Result<AdmissionResult, StorageError> {
        store.append_audit_row(AuditLogInput {
            token_string: ctx.token_string,
            user_id: ctx.user_id,
            allowed: false,
            reason,
            inferred_direction: None,
            declared_direction: ctx.declared,
            direction_mismatch: false,
            device_id: ctx.device_id,
            scanned_at: ctx.scanned_at,
            processed_at: ctx.now,
        })?;
        Ok(denied(reason, credits_left, cooldown_seconds_left))
    }
}

struct DenialContext {
    token_string: String,
    user_id: Option<UserId>,
    declared: Option<DeclaredDirection>,
    device_id: Option<DeviceId>,
    scanned_at: DateTime<Utc>,
    now: DateTime<Utc>,
}

fn denied(
    reason: AdmissionReason,
    credits_left: u32,
    cooldown_seconds_left: Option<i64>,
) -> AdmissionResult {
    AdmissionResult::Denied {
        reason,
        credits_left,
        cooldown_seconds_left,
    }
}

/// Audit rows require a non-empty token string; scans that arrive blank
/// are recorded under a placeholder. Truncation counts characters so a
/// hostile multi-byte scan can never land on a split byte.
fn audit_token_string(raw: &str) -> String {
    if raw.trim().is_empty() {
        "(blank)".to_string()
    } else {
        let mut end = 0;
        for (idx, ch) in raw.char_indices() {
            if idx + ch.len_utf8() > 128 {
                break;
            }
            end = idx + ch.len_utf8();
        }
        raw[..end].to_string()
    }
}
