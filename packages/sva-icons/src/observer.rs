//! Reactive injection for nodes added or reclassified after the initial scan
//!
//! The observer owns one host subscription and a background task. Surviving
//! notifications are collected into a batch; each one pushes the debounce
//! deadline back, and when the deadline passes the whole batch is processed
//! at once. Only the nodes named by the batch are scanned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use parking_lot::Mutex;
use serde::Serialize;
use sva_traits::{
    HostError, HostTree, MutationKind, MutationRecord, NodeId, ObserveOptions, Subscription,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, INJECTED_MARKER, INJECTING_MARKER, PROCESSED_MARKER};
use crate::error::{IconError, IconResult};
use crate::injector::Injector;
use crate::report::{ErrorReporter, FailureEvent, FailureSource};
use crate::scanner::Scanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObserverState {
    Idle,
    Observing,
    /// A batch is pending and the debounce timer is running
    Debouncing,
    Processing,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObserverStats {
    pub notifications: u64,
    /// Notifications dropped because they concerned processed, injected or in-flight nodes
    pub discarded: u64,
    pub batches: u64,
    pub nodes_injected: u64,
    /// Matches whose injection failed (already reported through the error reporter)
    pub nodes_failed: u64,
    pub last_pass: Duration,
    /// Nodes inspected by the last pass: the added subtrees and attribute targets only
    pub last_pass_candidates: usize,
}

/// Transient queue of the notifications of one debounce window
#[derive(Debug, Default)]
struct MutationBatch {
    records: Vec<MutationRecord>,
}

impl MutationBatch {
    fn push(&mut self, record: MutationRecord) {
        self.records.push(record);
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn take(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }
}

enum Control {
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

struct ObserverInner {
    host: Arc<dyn HostTree>,
    scanner: Arc<Scanner>,
    injector: Arc<Injector>,
    reporter: Arc<ErrorReporter>,
    delay: Duration,
    batch_size: usize,
    attribute_filter: Vec<String>,
    state: Mutex<ObserverState>,
    stats: Mutex<ObserverStats>,
}

pub struct MutationObserver {
    inner: Arc<ObserverInner>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver")
            .field("state", &self.state())
            .field("delay", &self.inner.delay)
            .finish()
    }
}

impl MutationObserver {
    pub fn new(
        host: Arc<dyn HostTree>,
        scanner: Arc<Scanner>,
        injector: Arc<Injector>,
        reporter: Arc<ErrorReporter>,
        config: &EngineConfig,
    ) -> Self {
        let mut attribute_filter = vec!["class".to_string()];
        if let Some(attr) = config.data_attribute() {
            attribute_filter.push(attr.to_string());
        }
        Self {
            inner: Arc::new(ObserverInner {
                host,
                scanner,
                injector,
                reporter,
                delay: config.debounce_delay(),
                batch_size: config.batch_size.max(1),
                attribute_filter,
                state: Mutex::new(ObserverState::Idle),
                stats: Mutex::new(ObserverStats::default()),
            }),
            control: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ObserverState {
        *self.inner.state.lock()
    }

    pub fn stats(&self) -> ObserverStats {
        self.inner.stats.lock().clone()
    }

    /// Subscribe to child additions and class / data-attribute changes under
    /// `scope` and start the background task. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, scope: NodeId) -> IconResult<()> {
        match self.state() {
            ObserverState::Stopped => {
                return Err(IconError::Unsupported(
                    "a stopped observer cannot be restarted".to_string(),
                ));
            }
            ObserverState::Idle => {}
            _ => return Ok(()),
        }
        if !self.inner.host.is_attached(scope) {
            return Err(IconError::NoScope);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| IconError::Unsupported(format!("no async runtime: {e}")))?;

        let subscription = self
            .inner
            .host
            .observe(
                scope,
                ObserveOptions::CHILD_LIST | ObserveOptions::ATTRIBUTES | ObserveOptions::SUBTREE,
                Some(self.inner.attribute_filter.clone()),
            )
            .map_err(|e| match e {
                HostError::Unsupported(reason) => IconError::Unsupported(reason),
                HostError::NodeNotFound(_) | HostError::Detached(_) => IconError::NoScope,
                other => IconError::Host(other),
            })?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *self.inner.state.lock() = ObserverState::Observing;
        let task = runtime.spawn(Arc::clone(&self.inner).run(subscription, control_rx));
        *self.control.lock() = Some(control_tx);
        *self.task.lock() = Some(task);

        tracing::debug!(scope, delay_ms = self.inner.delay.as_millis() as u64, "Mutation observer started");
        Ok(())
    }

    /// Process the pending batch now, without waiting for the debounce timer
    pub async fn flush(&self) {
        let sender = self.control.lock().clone();
        let Some(sender) = sender else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send(Control::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Cancel the timer, process the pending batch, then unsubscribe.
    /// Notifications after this point are ignored.
    pub async fn stop(&self) -> ObserverStats {
        let sender = self.control.lock().take();
        if let Some(sender) = sender {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(Control::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        *self.inner.state.lock() = ObserverState::Stopped;
        tracing::debug!("Mutation observer stopped");
        self.stats()
    }
}

impl ObserverInner {
    async fn run(
        self: Arc<Self>,
        mut subscription: Subscription,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        let mut batch = MutationBatch::default();
        let timer = tokio::time::sleep(self.delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                command = control.recv() => match command {
                    Some(Control::Flush(ack)) => {
                        for record in subscription.drain() {
                            self.accept(record, &mut batch);
                        }
                        if !batch.is_empty() {
                            self.process(batch.take()).await;
                        }
                        let _ = ack.send(());
                    }
                    Some(Control::Stop(ack)) => {
                        for record in subscription.drain() {
                            self.accept(record, &mut batch);
                        }
                        if !batch.is_empty() {
                            self.process(batch.take()).await;
                        }
                        subscription.unsubscribe();
                        let _ = ack.send(());
                        return;
                    }
                    None => break,
                },
                record = subscription.recv() => match record {
                    Some(record) => {
                        if self.accept(record, &mut batch) {
                            timer.as_mut().reset(tokio::time::Instant::now() + self.delay);
                        }
                    }
                    None => break,
                },
                () = &mut timer, if !batch.is_empty() => {
                    self.process(batch.take()).await;
                }
            }
        }

        if !batch.is_empty() {
            self.process(batch.take()).await;
        }
    }

    /// Processed hosts, injected content and hosts mid-swap never re-enter the pipeline
    fn is_settled(&self, node: NodeId) -> bool {
        self.host.has_attr(node, PROCESSED_MARKER)
            || self.host.has_attr(node, INJECTED_MARKER)
            || self.host.has_attr(node, INJECTING_MARKER)
    }

    /// Count the record and queue it unless it concerns settled nodes
    fn accept(&self, record: MutationRecord, batch: &mut MutationBatch) -> bool {
        let keep = self.keep(&record);
        {
            let mut stats = self.stats.lock();
            stats.notifications += 1;
            if !keep {
                stats.discarded += 1;
            }
        }
        if keep {
            batch.push(record);
            *self.state.lock() = ObserverState::Debouncing;
        }
        keep
    }

    fn keep(&self, record: &MutationRecord) -> bool {
        if self.is_settled(record.target) {
            return false;
        }
        match &record.kind {
            MutationKind::ChildList { added, .. } => {
                added.iter().any(|node| !self.is_settled(*node))
            }
            MutationKind::Attributes { .. } => true,
        }
    }

    async fn process(&self, records: Vec<MutationRecord>) {
        let start = Instant::now();
        *self.state.lock() = ObserverState::Processing;

        let mut seen = AHashSet::new();
        let mut candidates = Vec::new();
        for record in &records {
            match &record.kind {
                MutationKind::ChildList { added, .. } => {
                    for node in added {
                        let Ok(found) = self
                            .host
                            .query(*node, &mut |view| self.scanner.is_candidate(view))
                        else {
                            continue;
                        };
                        candidates.extend(found.into_iter().filter(|n| seen.insert(*n)));
                    }
                }
                MutationKind::Attributes { .. } => {
                    if seen.insert(record.target) {
                        candidates.push(record.target);
                    }
                }
            }
        }

        let report = self.scanner.scan_nodes(&candidates).await;
        for issue in &report.errors {
            self.reporter.report(
                FailureEvent::new(FailureSource::Observer, issue.error.clone()).with_node(issue.node),
            );
        }

        let mut injected = 0u64;
        let mut failed = 0u64;
        for (index, chunk) in report.matches.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }
            self.injector.prewarm(chunk);
            for found in chunk {
                match self
                    .injector
                    .inject(found.node, &found.identifier, &found.modifiers)
                {
                    Ok(record) if record.success => injected += 1,
                    Ok(record) if record.is_already_processed() => {}
                    Ok(_) | Err(_) => failed += 1,
                }
            }
        }

        let elapsed = start.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.batches += 1;
            stats.nodes_injected += injected;
            stats.nodes_failed += failed;
            stats.last_pass = elapsed;
            stats.last_pass_candidates = candidates.len();
        }
        {
            let mut state = self.state.lock();
            if *state == ObserverState::Processing {
                *state = ObserverState::Observing;
            }
        }
        tracing::debug!(
            records = records.len(),
            candidates = candidates.len(),
            injected,
            failed,
            elapsed_us = elapsed.as_micros() as u64,
            "Processed mutation batch"
        );
    }
}
