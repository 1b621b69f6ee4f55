#![forbid(unsafe_code)]

pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod reader;
pub mod relay;
