//! Failure reporting
//!
//! Every node- or bundle-level failure passes through an [`ErrorReporter`]. It
//! always counts the failure, logs it when logging is enabled and forwards it to
//! the application's callback when one is installed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use sva_traits::NodeId;

use crate::error::IconError;

/// Which engine operation a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureSource {
    Scan,
    Injection,
    Observer,
    BundleLoad,
    Initialize,
}

impl FailureSource {
    fn as_str(self) -> &'static str {
        match self {
            FailureSource::Scan => "scan",
            FailureSource::Injection => "injection",
            FailureSource::Observer => "observer",
            FailureSource::BundleLoad => "bundle_load",
            FailureSource::Initialize => "initialize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    pub source: FailureSource,
    pub node: Option<NodeId>,
    pub identifier: Option<String>,
    pub error: IconError,
}

impl FailureEvent {
    pub fn new(source: FailureSource, error: IconError) -> Self {
        Self {
            source,
            node: None,
            identifier: None,
            error,
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

/// Application hook receiving every failure
pub type ErrorCallback = Arc<dyn Fn(&FailureEvent) + Send + Sync>;

pub struct ErrorReporter {
    logging: bool,
    callback: RwLock<Option<ErrorCallback>>,
    by_kind: Mutex<BTreeMap<&'static str, u64>>,
    total: AtomicU64,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("logging", &self.logging)
            .field("callback", &self.callback.read().is_some())
            .field("total", &self.total())
            .finish()
    }
}

impl ErrorReporter {
    pub fn new(logging: bool) -> Self {
        Self {
            logging,
            callback: RwLock::new(None),
            by_kind: Mutex::new(BTreeMap::new()),
            total: AtomicU64::new(0),
        }
    }

    pub fn set_callback(&self, callback: ErrorCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    pub fn report(&self, event: FailureEvent) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.by_kind.lock().entry(event.error.kind()).or_default() += 1;

        if self.logging {
            tracing::warn!(
                source = event.source.as_str(),
                node = ?event.node,
                identifier = event.identifier.as_deref().unwrap_or(""),
                kind = event.error.kind(),
                severity = %event.error.severity(),
                error = %event.error,
                "Icon engine failure"
            );
        }

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Failure counts keyed by [`IconError::kind`]
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.by_kind
            .lock()
            .iter()
            .map(|(kind, count)| (kind.to_string(), *count))
            .collect()
    }
}
