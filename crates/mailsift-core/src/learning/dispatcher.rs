//! Learning dispatcher
//!
//! Owns the two bounded work queues of the learning pipeline. The report
//! queue escalates compact verdicts into full learning events by pulling the
//! message snapshot out of the cache; the learn queue fans materialized
//! events out to every registered module. Every failure is terminal for its
//! single item: logged and dropped, no retry, no dead-letter.

use crate::context::CoreContext;
use crate::learning::rpc::{self, LearningEvent, Verdict};
use mailsift_common::types::Message;
use mailsift_common::APP_NAME;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Capacity of each work queue. Producers block on a full queue, which is
/// the pipeline's only flow control against the broker.
pub const QUEUE_CAPACITY: usize = 64;

/// How long a closed queue's in-flight tasks get to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Instance-scoped channel carrying compact verdict reports
pub fn report_channel(instance: &str) -> String {
    format!("{}!{}!learn!reportMessageId", APP_NAME, instance)
}

/// Global channel fanning learning events out to every instance
pub fn learn_channel() -> String {
    format!("{}!learn!learn", APP_NAME)
}

#[derive(Clone, Copy)]
enum Queue {
    Report,
    Learn,
}

impl Queue {
    fn name(self) -> &'static str {
        match self {
            Queue::Report => "reportMessageId",
            Queue::Learn => "learn",
        }
    }
}

/// Consumes the two learning queues and dispatches one task per item
pub struct LearningDispatcher {
    ctx: Arc<CoreContext>,
    report_tx: mpsc::Sender<Vec<u8>>,
    learn_tx: mpsc::Sender<Vec<u8>>,
    report_rx: mpsc::Receiver<Vec<u8>>,
    learn_rx: mpsc::Receiver<Vec<u8>>,
}

impl LearningDispatcher {
    /// Create a dispatcher with freshly allocated queues
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        let (report_tx, report_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (learn_tx, learn_rx) = mpsc::channel(QUEUE_CAPACITY);

        Self {
            ctx,
            report_tx,
            learn_tx,
            report_rx,
            learn_rx,
        }
    }

    /// Producer handle for raw verdict report payloads
    pub fn report_queue(&self) -> mpsc::Sender<Vec<u8>> {
        self.report_tx.clone()
    }

    /// Producer handle for raw learning event payloads
    pub fn learn_queue(&self) -> mpsc::Sender<Vec<u8>> {
        self.learn_tx.clone()
    }

    /// Reporting handle for check modules
    pub fn reporter(&self) -> LearningReporter {
        LearningReporter {
            ctx: self.ctx.clone(),
        }
    }

    /// Drain both queues until every producer handle is dropped
    pub async fn run(self) {
        let Self {
            ctx,
            report_tx,
            learn_tx,
            report_rx,
            learn_rx,
        } = self;

        // Queue lifetime is controlled by the external producer handles.
        drop(report_tx);
        drop(learn_tx);

        tokio::join!(
            Self::consume(ctx.clone(), report_rx, Queue::Report),
            Self::consume(ctx, learn_rx, Queue::Learn),
        );
    }

    /// One consumption loop: spawn a task per dequeued item, reap finished
    /// tasks as they come, and drain with a bounded grace once the queue
    /// closes. Items never block each other; only queue capacity does.
    async fn consume(ctx: Arc<CoreContext>, mut rx: mpsc::Receiver<Vec<u8>>, queue: Queue) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(payload) => {
                        let ctx = ctx.clone();
                        match queue {
                            Queue::Report => tasks.spawn(handle_report(ctx, payload)),
                            Queue::Learn => tasks.spawn(handle_learn(ctx, payload)),
                        };
                    }
                    None => break,
                },
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!(queue = queue.name(), "learning task panicked");
                        }
                    }
                }
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                queue = queue.name(),
                outstanding = tasks.len(),
                "shutdown grace expired with learning tasks still running"
            );
        }
    }
}

/// Escalate one compact verdict into a full learning event and republish it
async fn handle_report(ctx: Arc<CoreContext>, payload: Vec<u8>) {
    let verdict = match rpc::decode_verdict(&payload) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "dropping verdict report");
            return;
        }
    };

    let cached = match ctx.cache.fetch(&verdict.message_id).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            error!(
                message_id = %verdict.message_id,
                "could not retrieve message from cache, dropping verdict report"
            );
            return;
        }
        Err(e) => {
            error!(
                message_id = %verdict.message_id,
                error = %e,
                "cache lookup failed, dropping verdict report"
            );
            return;
        }
    };

    let message: Message = match serde_json::from_slice(&cached) {
        Ok(m) => m,
        Err(e) => {
            error!(
                message_id = %verdict.message_id,
                error = %e,
                "could not decode cached message, dropping verdict report"
            );
            return;
        }
    };

    let event = LearningEvent {
        is_spam: verdict.is_spam,
        message,
        host: verdict.host,
        reporter: verdict.reporter,
        reason: verdict.reason,
    };

    add_to_corpus(&ctx, &event).await;

    let payload = match rpc::encode_learning_event(&event) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not encode learning event");
            return;
        }
    };

    if let Err(e) = ctx.bus.publish(&learn_channel(), &payload).await {
        error!(error = %e, "could not publish learning event");
    }
}

/// Extension point invoked exactly once per successfully escalated report,
/// before the learning event is republished.
async fn add_to_corpus(_ctx: &CoreContext, _event: &LearningEvent) {
    // TODO: persist spam/ham samples so classifiers can retrain offline
}

/// Fan one learning event out to every registered module
async fn handle_learn(ctx: Arc<CoreContext>, payload: Vec<u8>) {
    let event = match rpc::decode_learning_event(&payload) {
        Ok(ev) => ev,
        Err(e) => {
            error!(error = %e, "dropping learning event");
            return;
        }
    };

    let is_spam = event.is_spam;
    let message = Arc::new(event.message);

    for module in ctx.registry.snapshot().await {
        let message = message.clone();
        // Each handler runs isolated: an error or panic in one module must
        // not reach its siblings or the dispatcher.
        tokio::spawn(async move {
            if let Err(e) = module.learn(&message, is_spam).await {
                warn!(module = module.name(), error = %e, "learning handler failed");
            }
        });
    }
}

/// Handle through which a check module reports a spam/ham verdict
#[derive(Clone)]
pub struct LearningReporter {
    ctx: Arc<CoreContext>,
}

impl LearningReporter {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    /// Publish a compact verdict on the instance-scoped report channel.
    /// A no-op when learning is disabled; publish failures are logged only.
    pub async fn report_message_id(
        &self,
        is_spam: bool,
        message_id: &str,
        host: &str,
        reporter: &str,
        reason: &str,
    ) {
        if !self.ctx.config.learning.enabled {
            return;
        }

        let verdict = Verdict {
            is_spam,
            message_id: message_id.to_string(),
            host: host.to_string(),
            reporter: reporter.to_string(),
            reason: reason.to_string(),
        };

        let payload = match rpc::encode_verdict(&verdict) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "could not encode verdict report");
                return;
            }
        };

        let channel = report_channel(&self.ctx.config.daemon.instance);
        if let Err(e) = self.ctx.bus.publish(&channel, &payload).await {
            error!(
                message_id = %verdict.message_id,
                error = %e,
                "could not publish verdict report"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{CheckModule, EnvelopeActions, ModuleRegistry};
    use crate::transport::{MappingStore, MemoryMappingStore, MessageCache, PubSub};
    use async_trait::async_trait;
    use mailsift_common::types::{CheckResult, EmailAddress, Header, SuggestedAction};
    use mailsift_common::{Config, Error, Result};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl RecordingBus {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PubSub for RecordingBus {
        async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Transport("broker unavailable".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    struct MapCache {
        entries: HashMap<String, Vec<u8>>,
        lookups: AtomicUsize,
    }

    impl MapCache {
        fn new(entries: HashMap<String, Vec<u8>>) -> Self {
            Self {
                entries,
                lookups: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self::new(HashMap::new())
        }
    }

    #[async_trait]
    impl MessageCache for MapCache {
        async fn fetch(&self, message_id: &str) -> Result<Option<Vec<u8>>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.get(message_id).cloned())
        }
    }

    struct CountingModule {
        name: &'static str,
        learned: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl CheckModule for CountingModule {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn check(&self, _message: &Message, _envelope: &dyn EnvelopeActions) -> CheckResult {
            CheckResult {
                module: self.name.to_string(),
                suggested_action: SuggestedAction::Permit,
                score: 0.0,
                determinants: HashMap::new(),
            }
        }

        async fn learn(&self, _message: &Message, _is_spam: bool) -> Result<()> {
            self.learned.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Module("training backend down".to_string()));
            }
            Ok(())
        }
    }

    fn test_config(learning_enabled: bool) -> Config {
        let mut config = Config::default();
        config.daemon.instance = "mx1".to_string();
        config.daemon.hostname = "mx1.example.com".to_string();
        config.learning.enabled = learning_enabled;
        config
    }

    fn test_ctx(
        bus: Arc<RecordingBus>,
        cache: Arc<MapCache>,
        registry: Arc<ModuleRegistry>,
        learning_enabled: bool,
    ) -> Arc<CoreContext> {
        Arc::new(CoreContext {
            config: Arc::new(test_config(learning_enabled)),
            registry,
            bus,
            cache,
            mappings: Arc::new(MemoryMappingStore::new()) as Arc<dyn MappingStore>,
        })
    }

    fn sample_message() -> Message {
        Message {
            queue_id: "Q1".to_string(),
            from: EmailAddress::new("sender", "orig.example"),
            rcpt: vec![EmailAddress::new("rcpt", "dest.example")],
            headers: vec![Header::new("Subject", "hi")],
            body: b"raw body".to_vec(),
        }
    }

    fn sample_verdict() -> Verdict {
        Verdict {
            is_spam: true,
            message_id: "Q1".to_string(),
            host: "mx1.example.com".to_string(),
            reporter: "quotas".to_string(),
            reason: "over quota".to_string(),
        }
    }

    async fn settle(done: impl Fn() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fan-out did not settle");
    }

    #[tokio::test]
    async fn test_malformed_report_touches_nothing() {
        let bus = Arc::new(RecordingBus::new());
        let cache = Arc::new(MapCache::empty());
        let ctx = test_ctx(
            bus.clone(),
            cache.clone(),
            Arc::new(ModuleRegistry::new()),
            true,
        );

        handle_report(ctx, b"not an envelope".to_vec()).await;

        assert_eq!(cache.lookups.load(Ordering::SeqCst), 0);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_cache_miss_drops_report() {
        let bus = Arc::new(RecordingBus::new());
        let cache = Arc::new(MapCache::empty());
        let ctx = test_ctx(
            bus.clone(),
            cache.clone(),
            Arc::new(ModuleRegistry::new()),
            true,
        );

        let payload = rpc::encode_verdict(&sample_verdict()).unwrap();
        handle_report(ctx, payload).await;

        assert_eq!(cache.lookups.load(Ordering::SeqCst), 1);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_cached_snapshot_drops_report() {
        let bus = Arc::new(RecordingBus::new());
        let mut entries = HashMap::new();
        entries.insert("Q1".to_string(), b"garbage".to_vec());
        let cache = Arc::new(MapCache::new(entries));
        let ctx = test_ctx(
            bus.clone(),
            cache,
            Arc::new(ModuleRegistry::new()),
            true,
        );

        let payload = rpc::encode_verdict(&sample_verdict()).unwrap();
        handle_report(ctx, payload).await;

        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_valid_report_publishes_learning_event() {
        let bus = Arc::new(RecordingBus::new());
        let message = sample_message();
        let mut entries = HashMap::new();
        entries.insert("Q1".to_string(), serde_json::to_vec(&message).unwrap());
        let cache = Arc::new(MapCache::new(entries));
        let ctx = test_ctx(
            bus.clone(),
            cache,
            Arc::new(ModuleRegistry::new()),
            true,
        );

        let verdict = sample_verdict();
        handle_report(ctx, rpc::encode_verdict(&verdict).unwrap()).await;

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "mailsift!learn!learn");

        let event = rpc::decode_learning_event(&published[0].1).unwrap();
        assert_eq!(event.is_spam, verdict.is_spam);
        assert_eq!(event.message, message);
        assert_eq!(event.host, verdict.host);
        assert_eq!(event.reporter, verdict.reporter);
        assert_eq!(event.reason, verdict.reason);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let bus = Arc::new(RecordingBus::failing());
        let mut entries = HashMap::new();
        entries.insert(
            "Q1".to_string(),
            serde_json::to_vec(&sample_message()).unwrap(),
        );
        let cache = Arc::new(MapCache::new(entries));
        let ctx = test_ctx(bus, cache, Arc::new(ModuleRegistry::new()), true);

        // Must not panic or propagate.
        handle_report(ctx, rpc::encode_verdict(&sample_verdict()).unwrap()).await;
    }

    #[tokio::test]
    async fn test_learn_fans_out_once_per_module() {
        for module_count in [0usize, 1, 5] {
            let registry = Arc::new(ModuleRegistry::new());
            let mut counters = Vec::new();
            for i in 0..module_count {
                let learned = Arc::new(AtomicUsize::new(0));
                counters.push(learned.clone());
                registry
                    .register(Arc::new(CountingModule {
                        name: Box::leak(format!("mod{}", i).into_boxed_str()),
                        learned,
                        fail: false,
                    }))
                    .await;
            }

            let ctx = test_ctx(
                Arc::new(RecordingBus::new()),
                Arc::new(MapCache::empty()),
                registry,
                true,
            );

            let event = LearningEvent {
                is_spam: true,
                message: sample_message(),
                host: "mx1.example.com".to_string(),
                reporter: "quotas".to_string(),
                reason: "over quota".to_string(),
            };
            handle_learn(ctx, rpc::encode_learning_event(&event).unwrap()).await;

            let counters2 = counters.clone();
            settle(move || {
                counters2
                    .iter()
                    .all(|c| c.load(Ordering::SeqCst) == 1)
            })
            .await;

            for counter in &counters {
                assert_eq!(counter.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_failing_module_does_not_block_siblings() {
        let registry = Arc::new(ModuleRegistry::new());
        let failing = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicUsize::new(0));

        registry
            .register(Arc::new(CountingModule {
                name: "failing",
                learned: failing.clone(),
                fail: true,
            }))
            .await;
        registry
            .register(Arc::new(CountingModule {
                name: "healthy",
                learned: healthy.clone(),
                fail: false,
            }))
            .await;

        let ctx = test_ctx(
            Arc::new(RecordingBus::new()),
            Arc::new(MapCache::empty()),
            registry,
            true,
        );

        let event = LearningEvent {
            is_spam: false,
            message: sample_message(),
            host: "mx1.example.com".to_string(),
            reporter: "operator".to_string(),
            reason: "manual".to_string(),
        };
        handle_learn(ctx, rpc::encode_learning_event(&event).unwrap()).await;

        let (f, h) = (failing.clone(), healthy.clone());
        settle(move || f.load(Ordering::SeqCst) == 1 && h.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_malformed_learn_payload_skips_fanout() {
        let registry = Arc::new(ModuleRegistry::new());
        let learned = Arc::new(AtomicUsize::new(0));
        registry
            .register(Arc::new(CountingModule {
                name: "only",
                learned: learned.clone(),
                fail: false,
            }))
            .await;

        let ctx = test_ctx(
            Arc::new(RecordingBus::new()),
            Arc::new(MapCache::empty()),
            registry,
            true,
        );

        handle_learn(ctx, b"{}".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(learned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reporter_publishes_to_instance_channel() {
        let bus = Arc::new(RecordingBus::new());
        let ctx = test_ctx(
            bus.clone(),
            Arc::new(MapCache::empty()),
            Arc::new(ModuleRegistry::new()),
            true,
        );

        let reporter = LearningReporter::new(ctx);
        reporter
            .report_message_id(true, "Q1", "mx1.example.com", "quotas", "over quota")
            .await;

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "mailsift!mx1!learn!reportMessageId");

        let verdict = rpc::decode_verdict(&published[0].1).unwrap();
        assert_eq!(verdict, sample_verdict());
    }

    #[tokio::test]
    async fn test_reporter_is_noop_when_learning_disabled() {
        let bus = Arc::new(RecordingBus::new());
        let ctx = test_ctx(
            bus.clone(),
            Arc::new(MapCache::empty()),
            Arc::new(ModuleRegistry::new()),
            false,
        );

        LearningReporter::new(ctx)
            .report_message_id(true, "Q1", "mx1.example.com", "quotas", "over quota")
            .await;

        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_queues_and_stops_when_producers_drop() {
        let bus = Arc::new(RecordingBus::new());
        let message = sample_message();
        let mut entries = HashMap::new();
        entries.insert("Q1".to_string(), serde_json::to_vec(&message).unwrap());
        let cache = Arc::new(MapCache::new(entries));
        let ctx = test_ctx(bus.clone(), cache, Arc::new(ModuleRegistry::new()), true);

        let dispatcher = LearningDispatcher::new(ctx);
        let report_tx = dispatcher.report_queue();
        let handle = tokio::spawn(dispatcher.run());

        report_tx
            .send(rpc::encode_verdict(&sample_verdict()).unwrap())
            .await
            .unwrap();

        let bus2 = bus.clone();
        settle(move || !bus2.published().is_empty()).await;

        drop(report_tx);
        handle.await.unwrap();

        assert_eq!(bus.published().len(), 1);
    }
}
