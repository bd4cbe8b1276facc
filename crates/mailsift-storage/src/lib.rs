//! Mailsift Storage - Redis client abstraction
//!
//! This crate provides the Redis client shared by the pub/sub transport,
//! the message cache, and the SRS mapping store. Pure infrastructure,
//! no mail semantics.

pub mod redis;

pub use crate::redis::RedisClient;

// Re-export commonly used types
pub use ::redis::RedisError;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, RedisError>;
