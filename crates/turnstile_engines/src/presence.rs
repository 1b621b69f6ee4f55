#![forbid(unsafe_code)]

use turnstile_contracts::admission::DeclaredDirection;
use turnstile_contracts::presence::{InferredDirection, PresenceTransition};

/// Infer the direction of travel from server-held presence state and flag
/// disagreement with the device's declared lane. The declared direction
/// never overrides the inference.
pub fn infer_transition(
    currently_inside: bool,
    declared: Option<DeclaredDirection>,
) -> PresenceTransition {
    let direction = InferredDirection::from_presence(currently_inside);
    let direction_mismatch = match declared {
        Some(DeclaredDirection::In) => !direction.is_entry(),
        Some(DeclaredDirection::Out) => direction.is_entry(),
        None => false,
    };
    PresenceTransition {
        direction,
        direction_mismatch,
    }
}
