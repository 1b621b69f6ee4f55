#![forbid(unsafe_code)]

pub mod admission;
pub mod maintenance;
pub mod settlement;
