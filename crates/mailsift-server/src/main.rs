//! Mailsift - mail-filtering daemon entry point

use anyhow::Result;
use mailsift_common::config::Config;
use mailsift_core::learning::dispatcher::{learn_channel, report_channel};
use mailsift_core::{
    CoreContext, LearningDispatcher, ModuleRegistry, RedisBus, RedisMappingStore,
    RedisMessageCache, SrsModule,
};
use mailsift_storage::RedisClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Mailsift daemon...");

    // Load and validate configuration
    let config = Config::load()?;
    config.validate()?;
    info!(instance = %config.daemon.instance, "Configuration loaded");

    // Connect to Redis (bus, message cache, SRS mapping store)
    let client = RedisClient::connect(&config.redis.url).await?;
    info!("Redis connection established");

    let bus = Arc::new(RedisBus::new(client.clone()));
    let registry = Arc::new(ModuleRegistry::new());
    let ctx = Arc::new(CoreContext {
        config: Arc::new(config),
        registry: registry.clone(),
        bus: bus.clone(),
        cache: Arc::new(RedisMessageCache::new(client.clone())),
        mappings: Arc::new(RedisMappingStore::new(client)),
    });

    // Register check modules
    registry.register(Arc::new(SrsModule::new(&ctx))).await;

    for module in registry.snapshot().await {
        module.init().await?;
        info!(module = module.name(), "Module initialized");
    }

    // Wire the learning pipeline: the subscription pump feeds the two
    // bounded dispatcher queues.
    let dispatcher = LearningDispatcher::new(ctx.clone());

    let mut routes = HashMap::new();
    routes.insert(
        report_channel(&ctx.config.daemon.instance),
        dispatcher.report_queue(),
    );
    routes.insert(learn_channel(), dispatcher.learn_queue());

    let pump_handle = tokio::spawn(async move { bus.pump(routes).await });
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    info!("Mailsift daemon started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stopping the pump drops the queue senders, which closes both
    // dispatcher loops; in-flight learning tasks get a bounded window.
    pump_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(10), dispatcher_handle).await;

    info!("Mailsift daemon shutdown complete");

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mailsift=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
