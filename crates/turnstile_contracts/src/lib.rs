#![forbid(unsafe_code)]

pub mod admission;
pub mod common;
pub mod entitlement;
pub mod payment;
pub mod presence;
pub mod scanner;

pub use common::{ContractViolation, SchemaVersion, Validate};
