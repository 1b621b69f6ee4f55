#![forbid(unsafe_code)]

use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PresenceSessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceSessionStatus {
    Active,
    Closed,
    ForceClosed,
}

impl PresenceSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceSessionStatus::Active => "active",
            PresenceSessionStatus::Closed => "closed",
            PresenceSessionStatus::ForceClosed => "force_closed",
        }
    }
}

/// Direction the state machine inferred for this admission. Always the
/// negation of the stored presence flag; never taken from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferredDirection {
    Entry,
    Exit,
}

impl InferredDirection {
    pub fn from_presence(currently_inside: bool) -> Self {
        if currently_inside {
            InferredDirection::Exit
        } else {
            InferredDirection::Entry
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, InferredDirection::Entry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InferredDirection::Entry => "entry",
            InferredDirection::Exit => "exit",
        }
    }
}

/// Presence transition applied on an allowed admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTransition {
    pub direction: InferredDirection,
    pub direction_mismatch: bool,
}

impl Validate for PresenceTransition {
    fn validate(&self) -> Result<(), ContractViolation> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_direction_negates_presence() {
        assert_eq!(
            InferredDirection::from_presence(false),
            InferredDirection::Entry
        );
        assert_eq!(
            InferredDirection::from_presence(true),
            InferredDirection::Exit
        );
    }
}
