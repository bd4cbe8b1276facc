//! Check module contract
//!
//! Modules score in-flight messages during the filtering phase and may
//! retrain themselves from learning events produced anywhere in the fleet.
//! The dispatcher only depends on `check` and `learn`; everything else is
//! lifecycle plumbing.

pub mod registry;

pub use registry::ModuleRegistry;

use async_trait::async_trait;
use mailsift_common::types::{CheckResult, Message};
use mailsift_common::Result;

/// A pluggable check module
#[async_trait]
pub trait CheckModule: Send + Sync {
    /// Module name, used in results and logs
    fn name(&self) -> &'static str;

    /// Whether the module should be active. Disabled modules are never
    /// registered.
    fn enabled(&self) -> bool {
        true
    }

    /// One-time initialization at startup
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Evaluate one in-flight message. Envelope rewrites go through
    /// `envelope`; the returned result feeds the scoring aggregator.
    async fn check(&self, message: &Message, envelope: &dyn EnvelopeActions) -> CheckResult;

    /// Receive a fully materialized learning event. The default does
    /// nothing; modules without trainable state leave it as is.
    async fn learn(&self, _message: &Message, _is_spam: bool) -> Result<()> {
        Ok(())
    }
}

/// Envelope mutations a check module can request from the filtering layer.
///
/// The filtering protocol session itself lives outside this crate; this is
/// the only surface modules see of it.
#[async_trait]
pub trait EnvelopeActions: Send + Sync {
    /// Replace the envelope sender
    async fn replace_sender(&self, address: &str) -> Result<()>;

    /// Remove an envelope recipient
    async fn remove_recipient(&self, address: &str) -> Result<()>;

    /// Add an envelope recipient
    async fn add_recipient(&self, address: &str) -> Result<()>;
}
