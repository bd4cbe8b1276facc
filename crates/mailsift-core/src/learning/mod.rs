//! Cross-instance learning pipeline
//!
//! A spam/ham verdict produced on one instance travels two hops: first as a
//! compact verdict on an instance-scoped report channel, then — after the
//! full message is recovered from the cache — as a materialized learning
//! event on a global channel that every instance fans out to its modules.

pub mod dispatcher;
pub mod rpc;

pub use dispatcher::{LearningDispatcher, LearningReporter, QUEUE_CAPACITY};
pub use rpc::{LearningEvent, RpcEnvelope, Verdict};
