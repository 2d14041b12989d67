//! Batched injection, lazy bundle loading and timing metrics
//!
//! With batching enabled, [`PerformanceManager::process_icon`] sends the
//! request to a background worker. The worker collects requests until the
//! queue has been quiet for the batch delay, loads any bundles the batch
//! needs, then injects the batch in slices, yielding between slices.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use parking_lot::Mutex;
use serde::Serialize;
use sva_traits::NodeId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bundle::BundleManager;
use crate::cache::RenderCache;
use crate::config::PerformanceConfig;
use crate::error::{IconError, IconResult};
use crate::identifier::{IconId, ModifierTag};
use crate::injector::{InjectionRecord, Injector};
use crate::scanner::ScanMatch;

/// Average per-icon time above which smaller batches are suggested
const SLOW_ICON_THRESHOLD: Duration = Duration::from_millis(1);
/// One frame at 60 Hz
const FRAME_BUDGET: Duration = Duration::from_millis(16);
/// Hit rate below which a larger cache is suggested
const LOW_HIT_RATE: f64 = 0.5;
/// Cache lookups needed before the hit rate is trusted
const MIN_CACHE_SAMPLES: u64 = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_processed: u64,
    pub total_batches: u64,
    pub average_icon_time: Duration,
    pub peak_batch_time: Duration,
    pub cache_hit_rate: f64,
    pub estimated_memory_bytes: usize,
}

/// Suggested configuration changes with the reasons behind them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationSuggestion {
    pub batch_size_delta: i64,
    pub cache_size_delta: i64,
    pub reasons: Vec<String>,
}

impl OptimizationSuggestion {
    pub fn is_empty(&self) -> bool {
        self.batch_size_delta == 0 && self.cache_size_delta == 0
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    total_processed: u64,
    total_batches: u64,
    total_time: Duration,
    peak_batch_time: Duration,
}

struct QueuedInjection {
    node: NodeId,
    identifier: IconId,
    modifiers: Vec<ModifierTag>,
    respond_to: oneshot::Sender<IconResult<InjectionRecord>>,
}

enum Operation {
    Inject(QueuedInjection),
    Flush(oneshot::Sender<()>),
}

/// Handle to an injection that may not have run yet
#[derive(Debug)]
pub enum PendingInjection {
    Ready(IconResult<InjectionRecord>),
    Queued(oneshot::Receiver<IconResult<InjectionRecord>>),
}

impl PendingInjection {
    pub async fn wait(self) -> IconResult<InjectionRecord> {
        match self {
            PendingInjection::Ready(result) => result,
            PendingInjection::Queued(receiver) => receiver.await.unwrap_or_else(|_| {
                Err(IconError::Unsupported(
                    "performance manager shut down before the injection ran".to_string(),
                ))
            }),
        }
    }
}

struct PerformanceInner {
    injector: Arc<Injector>,
    cache: Arc<RenderCache>,
    bundles: Option<BundleManager>,
    config: PerformanceConfig,
    metrics: Mutex<MetricsState>,
}

pub struct PerformanceManager {
    inner: Arc<PerformanceInner>,
    sender: Mutex<Option<mpsc::UnboundedSender<Operation>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PerformanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceManager")
            .field("config", &self.inner.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl PerformanceManager {
    pub fn new(
        injector: Arc<Injector>,
        bundles: Option<BundleManager>,
        config: PerformanceConfig,
    ) -> Self {
        let cache = Arc::clone(injector.resolver().render_cache());
        Self {
            inner: Arc::new(PerformanceInner {
                injector,
                cache,
                bundles,
                config,
                metrics: Mutex::new(MetricsState::default()),
            }),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// The render cache shared with the injector
    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.inner.cache
    }

    /// Inject `identifier` into `node`, batched when batching is enabled.
    ///
    /// Unbatched requests run immediately unless the icon may first need its
    /// bundle loaded. Outside a tokio runtime the injection always runs
    /// immediately.
    pub fn process_icon(
        &self,
        node: NodeId,
        identifier: IconId,
        modifiers: Vec<ModifierTag>,
    ) -> PendingInjection {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return PendingInjection::Ready(self.inner.inject_now(node, &identifier, &modifiers));
        };
        if !self.inner.config.batching && !self.inner.may_need_bundle(&identifier) {
            return PendingInjection::Ready(self.inner.inject_now(node, &identifier, &modifiers));
        }

        let (respond_to, receiver) = oneshot::channel();
        let request = QueuedInjection {
            node,
            identifier,
            modifiers,
            respond_to,
        };

        if !self.inner.config.batching {
            let inner = Arc::clone(&self.inner);
            runtime.spawn(async move { inner.flush(vec![request]).await });
            return PendingInjection::Queued(receiver);
        }

        let mut slot = self.sender.lock();
        let sender = slot.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = runtime.spawn(Arc::clone(&self.inner).run(rx));
            *self.worker.lock() = Some(worker);
            tx
        });
        if let Err(mpsc::error::SendError(Operation::Inject(request))) =
            sender.send(Operation::Inject(request))
        {
            let _ = request.respond_to.send(Err(IconError::Unsupported(
                "performance worker is not running".to_string(),
            )));
        }
        PendingInjection::Queued(receiver)
    }

    /// Flush the queue now instead of waiting for the batch delay
    pub async fn flush(&self) {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(Operation::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush whatever is queued and stop the worker
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Account for a batch injected outside the queue (initial scan, rescans)
    pub fn record_batch(&self, icons: usize, elapsed: Duration) {
        self.inner.record_batch(icons, elapsed);
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let state = self.inner.metrics.lock();
        let cache = self.inner.cache.stats();
        PerformanceMetrics {
            total_processed: state.total_processed,
            total_batches: state.total_batches,
            average_icon_time: average(state.total_time, state.total_processed),
            peak_batch_time: state.peak_batch_time,
            cache_hit_rate: cache.hit_rate,
            estimated_memory_bytes: cache.estimated_memory_bytes,
        }
    }

    /// Suggest batch-size and cache-size changes from the metrics gathered so far
    pub fn optimize_configuration(&self) -> OptimizationSuggestion {
        let metrics = self.metrics();
        let cache = self.inner.cache.stats();
        let batch_size = self.inner.config.batch_size as i64;
        let mut suggestion = OptimizationSuggestion::default();

        if metrics.total_processed > 0 {
            if metrics.peak_batch_time > FRAME_BUDGET && batch_size > 1 {
                suggestion.batch_size_delta = -(batch_size / 2);
                suggestion.reasons.push(format!(
                    "peak batch took {:?}, longer than one frame ({FRAME_BUDGET:?})",
                    metrics.peak_batch_time
                ));
            } else if metrics.average_icon_time > SLOW_ICON_THRESHOLD && batch_size > 1 {
                suggestion.batch_size_delta = -(batch_size / 4).max(1);
                suggestion.reasons.push(format!(
                    "average icon took {:?}, above {SLOW_ICON_THRESHOLD:?}",
                    metrics.average_icon_time
                ));
            }
        }

        if cache.hits + cache.misses >= MIN_CACHE_SAMPLES && cache.hit_rate < LOW_HIT_RATE {
            suggestion.cache_size_delta = (cache.capacity as i64 / 2).max(1);
            suggestion.reasons.push(format!(
                "cache hit rate {:.0}% is below {:.0}%",
                cache.hit_rate * 100.0,
                LOW_HIT_RATE * 100.0
            ));
        }
        suggestion
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total.as_secs_f64() / count as f64)
}

impl PerformanceInner {
    /// Lazy loading is on and the icon is not registered yet
    fn may_need_bundle(&self, identifier: &IconId) -> bool {
        self.config.lazy_loading
            && self.bundles.is_some()
            && !self.injector.resolver().registry().contains(identifier)
    }

    fn inject_now(
        &self,
        node: NodeId,
        identifier: &IconId,
        modifiers: &[ModifierTag],
    ) -> IconResult<InjectionRecord> {
        let start = Instant::now();
        let result = self.injector.inject(node, identifier, modifiers);
        self.record_batch(1, start.elapsed());
        result
    }

    async fn run(self: Arc<Self>, mut operations: mpsc::UnboundedReceiver<Operation>) {
        let delay = self.config.batch_delay();
        while let Some(operation) = operations.recv().await {
            let mut queue = Vec::new();
            let mut acks = Vec::new();
            match operation {
                Operation::Inject(request) => queue.push(request),
                Operation::Flush(ack) => {
                    let _ = ack.send(());
                    continue;
                }
            }

            let deadline = tokio::time::sleep(delay);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    operation = operations.recv() => match operation {
                        Some(Operation::Inject(request)) => {
                            queue.push(request);
                            deadline.as_mut().reset(tokio::time::Instant::now() + delay);
                        }
                        Some(Operation::Flush(ack)) => {
                            acks.push(ack);
                            break;
                        }
                        None => break,
                    },
                    () = &mut deadline => break,
                }
            }

            self.flush(queue).await;
            for ack in acks {
                let _ = ack.send(());
            }
        }
    }

    async fn flush(&self, queue: Vec<QueuedInjection>) {
        if queue.is_empty() {
            return;
        }

        if self.config.lazy_loading {
            if let Some(bundles) = &self.bundles {
                let mut seen = AHashSet::new();
                let wanted: Vec<IconId> = queue
                    .iter()
                    .filter(|request| seen.insert(request.identifier.clone()))
                    .map(|request| request.identifier.clone())
                    .collect();
                for (bundle, result) in bundles.load_for_icons(&wanted).await {
                    match result {
                        Ok(()) => tracing::debug!(bundle = %bundle, "Lazily loaded bundle"),
                        Err(error) => {
                            tracing::debug!(bundle = %bundle, error = %error, "Lazy bundle load failed")
                        }
                    }
                }
            }
        }

        let slice_size = self.config.batch_size.max(1);
        let mut queue = queue.into_iter().peekable();
        let mut first = true;
        while queue.peek().is_some() {
            if !first {
                tokio::task::yield_now().await;
            }
            first = false;

            let slice: Vec<QueuedInjection> = queue.by_ref().take(slice_size).collect();
            let matches: Vec<ScanMatch> = slice
                .iter()
                .map(|request| ScanMatch {
                    node: request.node,
                    identifier: request.identifier.clone(),
                    modifiers: request.modifiers.clone(),
                })
                .collect();

            let start = Instant::now();
            self.injector.prewarm(&matches);
            let count = slice.len();
            for request in slice {
                let result = self
                    .injector
                    .inject(request.node, &request.identifier, &request.modifiers);
                let _ = request.respond_to.send(result);
            }
            self.record_batch(count, start.elapsed());
        }
    }

    fn record_batch(&self, icons: usize, elapsed: Duration) {
        if icons == 0 {
            return;
        }
        let mut metrics = self.metrics.lock();
        metrics.total_processed += icons as u64;
        metrics.total_batches += 1;
        metrics.total_time += elapsed;
        metrics.peak_batch_time = metrics.peak_batch_time.max(elapsed);
    }
}
