//! Core context
//!
//! Everything the dispatcher and the check modules need is constructed once
//! at startup and carried here explicitly; there is no ambient global state.

use crate::modules::ModuleRegistry;
use crate::transport::{MappingStore, MessageCache, PubSub};
use mailsift_common::Config;
use std::sync::Arc;

/// Shared context passed into the learning dispatcher and module constructors
pub struct CoreContext {
    /// Loaded daemon configuration
    pub config: Arc<Config>,

    /// Active check modules
    pub registry: Arc<ModuleRegistry>,

    /// Pub/sub transport for verdict and learning-event payloads
    pub bus: Arc<dyn PubSub>,

    /// Content-addressable store of serialized message snapshots
    pub cache: Arc<dyn MessageCache>,

    /// Keyed store for SRS reverse mappings
    pub mappings: Arc<dyn MappingStore>,
}
