//! Class-based icon injection
//!
//! Nodes in a host tree ask for an icon by class (`sva-icon-chevron-left`) or
//! by data attribute (`data-icon="chevron-left"`). The engine finds them,
//! resolves each identifier against a registry of icon definitions, renders the
//! content (with size / color / position modifiers taken from classes such as
//! `sva-icon--l`) and swaps it into the node, preserving the node's id, aria and
//! data attributes. A mutation observer picks up nodes added later, and bundles
//! let definitions be loaded on demand.
//!
//! The host tree is reached only through [`sva_traits::HostTree`]; `sva-dom`
//! provides an in-memory implementation.
//!
//! ```ignore
//! let engine = IconEngine::new(Arc::new(document.clone()), EngineConfig::default())?;
//! engine.register_icons([IconDefinition::from_markup("plus", PLUS_SVG)?]);
//! let report = engine.initialize().await;
//! ```

pub mod bundle;
pub mod cache;
pub mod config;
mod content;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod injector;
pub mod observer;
pub mod performance;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod scanner;

pub use bundle::{
    BundleClass, BundleInfo, BundleLoader, BundleManager, BundleSpec, BundleStats, BundleUsage,
    LoadState, Recommendation, TreeShakingReport,
};
pub use cache::{CacheKey, CacheStats, RenderCache};
pub use config::{
    BundleConfig, DEFAULT_DATA_ATTRIBUTE, DEFAULT_PREFIX, EngineConfig, INJECTED_MARKER,
    INJECTING_MARKER, PROCESSED_MARKER, PerformanceConfig,
};
pub use content::parse_content;
pub use engine::{EngineStats, IconEngine, InitReport, RescanReport};
pub use error::{IconError, IconErrorCategory, IconErrorSeverity, IconResult};
pub use identifier::{IconColor, IconId, IconPosition, IconSize, ModifierTag, RenderOptions};
pub use injector::{InjectionRecord, Injector, InjectorStats};
pub use observer::{MutationObserver, ObserverState, ObserverStats};
pub use performance::{
    OptimizationSuggestion, PendingInjection, PerformanceManager, PerformanceMetrics,
};
pub use registry::{IconDefinition, IconMetadata, IconRegistry, RegistryStats};
pub use report::{ErrorCallback, ErrorReporter, FailureEvent, FailureSource};
pub use resolver::{NameResolver, ResolvedIcon, ResolverStats};
pub use scanner::{Inspection, ScanIssue, ScanMatch, ScanReport, Scanner};
