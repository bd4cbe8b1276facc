//! Module registry
//!
//! Holds the set of active check modules. Learning fan-out iterates a
//! snapshot of the registered set, so registration after startup never
//! races an in-flight fan-out.

use super::CheckModule;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Registry of active check modules
pub struct ModuleRegistry {
    modules: RwLock<Vec<Arc<dyn CheckModule>>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
        }
    }

    /// Register a module. Modules reporting themselves disabled are skipped.
    pub async fn register(&self, module: Arc<dyn CheckModule>) {
        if !module.enabled() {
            info!(module = module.name(), "module disabled, not registering");
            return;
        }

        info!(module = module.name(), "module registered");
        self.modules.write().await.push(module);
    }

    /// Snapshot of the currently registered modules
    pub async fn snapshot(&self) -> Vec<Arc<dyn CheckModule>> {
        self.modules.read().await.clone()
    }

    /// Number of registered modules
    pub async fn len(&self) -> usize {
        self.modules.read().await.len()
    }

    /// Whether no modules are registered
    pub async fn is_empty(&self) -> bool {
        self.modules.read().await.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::EnvelopeActions;
    use async_trait::async_trait;
    use mailsift_common::types::{CheckResult, Message, SuggestedAction};
    use std::collections::HashMap;

    struct StubModule {
        name: &'static str,
        enabled: bool,
    }

    #[async_trait]
    impl CheckModule for StubModule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn check(&self, _message: &Message, _envelope: &dyn EnvelopeActions) -> CheckResult {
            CheckResult {
                module: self.name.to_string(),
                suggested_action: SuggestedAction::Permit,
                score: 0.0,
                determinants: HashMap::new(),
            }
        }
    }

    #[tokio::test]
    async fn test_register_skips_disabled() {
        let registry = ModuleRegistry::new();

        registry
            .register(Arc::new(StubModule {
                name: "on",
                enabled: true,
            }))
            .await;
        registry
            .register(Arc::new(StubModule {
                name: "off",
                enabled: false,
            }))
            .await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name(), "on");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
        assert!(registry.snapshot().await.is_empty());
    }
}
