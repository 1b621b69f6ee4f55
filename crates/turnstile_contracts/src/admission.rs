#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{validate_id, validate_text};
use crate::{ContractViolation, Validate};

pub const ADMISSION_CONTRACT_VERSION: crate::SchemaVersion = crate::SchemaVersion(1);

/// Cooldown window shared across all of an identity's active tokens.
pub const COOLDOWN_WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenCode(String);

impl TokenCode {
    pub fn new(code: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(code.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for TokenCode {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("token_code", &self.0, 128)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for DeviceId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("device_id", &self.0, 64)
    }
}

/// Physical lane direction as declared by the scanning device. The server
/// never trusts this for the admission decision; it only feeds the
/// direction-mismatch anomaly flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredDirection {
    In,
    Out,
}

impl DeclaredDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredDirection::In => "in",
            DeclaredDirection::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(DeclaredDirection::In),
            "out" => Some(DeclaredDirection::Out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    Ok,
    NoCredits,
    Cooldown,
    InvalidToken,
    TokenNotFound,
    TokenDeactivated,
    UserNotFound,
    MembershipExpired,
    MembershipInactive,
    DailyLimit,
    SessionsLimitReached,
    TrainerAllowed,
}

impl AdmissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionReason::Ok => "ok",
            AdmissionReason::NoCredits => "no_credits",
            AdmissionReason::Cooldown => "cooldown",
            AdmissionReason::InvalidToken => "invalid_token",
            AdmissionReason::TokenNotFound => "token_not_found",
            AdmissionReason::TokenDeactivated => "token_deactivated",
            AdmissionReason::UserNotFound => "user_not_found",
            AdmissionReason::MembershipExpired => "membership_expired",
            AdmissionReason::MembershipInactive => "membership_inactive",
            AdmissionReason::DailyLimit => "daily_limit",
            AdmissionReason::SessionsLimitReached => "sessions_limit_reached",
            AdmissionReason::TrainerAllowed => "trainer_allowed",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, AdmissionReason::Ok | AdmissionReason::TrainerAllowed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Outcome of one admission attempt, before wire serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    Allowed {
        reason: AdmissionReason,
        credits_left: u32,
        entry: bool,
        direction_mismatch: bool,
        membership_id: Option<u64>,
        open_door: bool,
        door_open_duration_s: Option<u32>,
        user: AdmittedUser,
    },
    Denied {
        reason: AdmissionReason,
        credits_left: u32,
        cooldown_seconds_left: Option<i64>,
    },
}

impl AdmissionResult {
    pub fn reason(&self) -> AdmissionReason {
        match self {
            AdmissionResult::Allowed { reason, .. } => *reason,
            AdmissionResult::Denied { reason, .. } => *reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionResult::Allowed { .. })
    }

    pub fn credits_left(&self) -> u32 {
        match self {
            AdmissionResult::Allowed { credits_left, .. } => *credits_left,
            AdmissionResult::Denied { credits_left, .. } => *credits_left,
        }
    }
}

impl Validate for AdmissionResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            AdmissionResult::Allowed {
                reason,
                open_door,
                door_open_duration_s,
                ..
            } => {
                if !reason.is_allow() {
                    return Err(ContractViolation::InvalidValue {
                        field: "admission_result.reason",
                        reason: "allowed variant requires an allow reason",
                    });
                }
                if *open_door && door_open_duration_s.is_none() {
                    return Err(ContractViolation::InvalidValue {
                        field: "admission_result.door_open_duration_s",
                        reason: "must be present when open_door=true",
                    });
                }
                if let Some(duration) = door_open_duration_s {
                    if *duration == 0 || *duration > 60 {
                        return Err(ContractViolation::InvalidRange {
                            field: "admission_result.door_open_duration_s",
                            min: 1.0,
                            max: 60.0,
                            got: *duration as f64,
                        });
                    }
                }
                Ok(())
            }
            AdmissionResult::Denied {
                reason,
                cooldown_seconds_left,
                ..
            } => {
                if reason.is_allow() {
                    return Err(ContractViolation::InvalidValue {
                        field: "admission_result.reason",
                        reason: "denied variant requires a deny reason",
                    });
                }
                if *reason == AdmissionReason::Cooldown && cooldown_seconds_left.is_none() {
                    return Err(ContractViolation::InvalidValue {
                        field: "admission_result.cooldown_seconds_left",
                        reason: "must be present when reason=cooldown",
                    });
                }
                Ok(())
            }
        }
    }
}

/// Device-facing scan request body for `POST /scan/{in|out}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub token: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

impl Validate for ScanRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("scan_request.token", &self.token, 128)?;
        validate_id("scan_request.device_id", &self.device_id, 64)
    }
}

/// Flat wire schema shared by the scan and verify endpoints. Each
/// `AdmissionResult` variant maps onto this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub allowed: bool,
    pub reason: AdmissionReason,
    pub credits_left: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds_left: Option<i64>,
    #[serde(default)]
    pub open_door: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub door_open_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AdmittedUser>,
}

impl From<AdmissionResult> for ScanResponse {
    fn from(result: AdmissionResult) -> Self {
        match result {
            AdmissionResult::Allowed {
                reason,
                credits_left,
                open_door,
                door_open_duration_s,
                user,
                ..
            } => ScanResponse {
                allowed: true,
                reason,
                credits_left,
                cooldown_seconds_left: None,
                open_door,
                door_open_duration: door_open_duration_s,
                user: Some(user),
            },
            AdmissionResult::Denied {
                reason,
                credits_left,
                cooldown_seconds_left,
            } => ScanResponse {
                allowed: false,
                reason,
                credits_left,
                cooldown_seconds_left,
                open_door: false,
                door_open_duration: None,
                user: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorActuationStatus {
    Opened,
    HwError,
    Timeout,
    Skipped,
}
