//! # gw-common
//!
//! Shared configuration, error types, and time helpers for the gateway.

pub mod config;
pub mod error;
pub mod time;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
