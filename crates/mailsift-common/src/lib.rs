//! Mailsift Common - Shared types and utilities
//!
//! This crate provides the common types, configuration, and error taxonomy
//! shared across all Mailsift components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

/// Application identity used in pub/sub channel names and store key schemes.
pub const APP_NAME: &str = "mailsift";
