//! Mailsift Core - learning pipeline and SRS envelope rewriting
//!
//! This crate provides the orchestration core of the Mailsift daemon:
//! the cross-instance learning dispatcher that propagates spam/ham verdicts
//! across the fleet, the check module registry it fans out to, and the
//! SRS rewriter check module.

pub mod context;
pub mod learning;
pub mod modules;
pub mod srs;
pub mod transport;

pub use context::CoreContext;
pub use learning::{LearningDispatcher, LearningReporter};
pub use modules::{CheckModule, EnvelopeActions, ModuleRegistry};
pub use srs::SrsModule;
pub use transport::{
    MappingStore, MemoryMappingStore, MessageCache, PubSub, RedisBus, RedisMappingStore,
    RedisMessageCache,
};
