#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use crate::admission::DeclaredDirection;
use crate::common::validate_id;
use crate::{ContractViolation, Validate};

/// One decoded code produced by a lane reader, tagged with the lane it came
/// from. Queued between the reader tasks and the dispatching consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCode {
    pub direction: DeclaredDirection,
    pub device_id: String,
    pub code: String,
    pub scanned_at: DateTime<Utc>,
}

impl Validate for ScannedCode {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("scanned_code.device_id", &self.device_id, 64)?;
        if self.code.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "scanned_code.code",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// HTTP status classification for the dispatch retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchClass {
    Success,
    Fatal,
    Retryable,
}

impl DispatchClass {
    pub fn of_status(status: u16) -> Self {
        match status {
            200..=299 => DispatchClass::Success,
            401 | 404 | 422 => DispatchClass::Fatal,
            429 => DispatchClass::Retryable,
            500..=599 => DispatchClass::Retryable,
            _ => DispatchClass::Fatal,
        }
    }
}
