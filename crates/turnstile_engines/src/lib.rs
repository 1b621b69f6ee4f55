#![forbid(unsafe_code)]

pub mod cooldown;
pub mod entitlement;
pub mod localday;
pub mod presence;
pub mod settlement;
pub mod token_codes;
