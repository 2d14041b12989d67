use std::time::Duration;

use sva_traits::{HostError, NodeId};
use thiserror::Error;

/// Errors raised by the icon engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IconError {
    /// The scan scope is missing or detached from the host root
    #[error("Scan scope {0} is not attached to the document")]
    ScopeUnavailable(NodeId),

    /// No definition is registered under the identifier (or its fallback)
    #[error("Icon not found: {0}")]
    IdentifierNotFound(String),

    /// The renderer produced markup that cannot become a single element
    #[error("Invalid content for icon {identifier}: {reason}")]
    InvalidContent { identifier: String, reason: String },

    /// The node already carries injected content
    #[error("Node {0} has already been processed")]
    AlreadyProcessed(NodeId),

    /// The node was removed before the injection could complete
    #[error("Node {0} is detached from the document")]
    NodeDetached(NodeId),

    /// Every load attempt for a bundle failed
    #[error("Bundle {bundle} failed to load after {attempts} attempt(s): {reason}")]
    BundleLoadFailed {
        bundle: String,
        attempts: u32,
        reason: String,
    },

    /// A single bundle load attempt ran past its deadline
    #[error("Bundle {bundle} load timed out after {timeout:?}")]
    BundleLoadTimeout { bundle: String, timeout: Duration },

    /// The host cannot provide a capability the engine needs
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Observation was started without an attached scope
    #[error("No observation scope available")]
    NoScope,

    /// A token that is not a canonical icon identifier
    #[error("Invalid icon identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Unknown bundle: {0}")]
    UnknownBundle(String),

    /// Bundle dependencies loop back on themselves
    #[error("Bundle dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Result type alias for engine operations
pub type IconResult<T> = Result<T, IconError>;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IconErrorSeverity {
    /// Expected condition, nothing to fix
    Info,
    /// A single node or icon was affected
    Warning,
    /// An operation failed but the engine keeps running
    Error,
    /// The engine cannot do its job in this environment
    Critical,
}

impl std::fmt::Display for IconErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IconErrorSeverity::Info => write!(f, "INFO"),
            IconErrorSeverity::Warning => write!(f, "WARN"),
            IconErrorSeverity::Error => write!(f, "ERROR"),
            IconErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which subsystem an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IconErrorCategory {
    Scan,
    Resolution,
    Injection,
    Bundle,
    Host,
    Config,
}

impl IconError {
    /// Get the severity level of this error
    pub fn severity(&self) -> IconErrorSeverity {
        match self {
            IconError::AlreadyProcessed(_) => IconErrorSeverity::Info,
            IconError::IdentifierNotFound(_) => IconErrorSeverity::Warning,
            IconError::InvalidIdentifier(_) => IconErrorSeverity::Warning,
            IconError::NodeDetached(_) => IconErrorSeverity::Warning,
            IconError::BundleLoadTimeout { .. } => IconErrorSeverity::Warning,
            IconError::InvalidContent { .. } => IconErrorSeverity::Error,
            IconError::BundleLoadFailed { .. } => IconErrorSeverity::Error,
            IconError::UnknownBundle(_) => IconErrorSeverity::Error,
            IconError::DependencyCycle(_) => IconErrorSeverity::Error,
            IconError::Host(_) => IconErrorSeverity::Error,
            IconError::ScopeUnavailable(_) => IconErrorSeverity::Critical,
            IconError::NoScope => IconErrorSeverity::Critical,
            IconError::Unsupported(_) => IconErrorSeverity::Critical,
            IconError::Config(_) => IconErrorSeverity::Critical,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            IconError::AlreadyProcessed(_) => true,
            IconError::IdentifierNotFound(_) => true,
            IconError::NodeDetached(_) => true,
            IconError::BundleLoadFailed { .. } => true,
            IconError::BundleLoadTimeout { .. } => true,
            IconError::Host(_) => true,
            IconError::InvalidIdentifier(_) => false,
            IconError::InvalidContent { .. } => false,
            IconError::UnknownBundle(_) => false,
            IconError::DependencyCycle(_) => false,
            IconError::ScopeUnavailable(_) => false,
            IconError::NoScope => false,
            IconError::Unsupported(_) => false,
            IconError::Config(_) => false,
        }
    }

    pub fn category(&self) -> IconErrorCategory {
        match self {
            IconError::ScopeUnavailable(_) | IconError::NoScope => IconErrorCategory::Scan,
            IconError::IdentifierNotFound(_) | IconError::InvalidIdentifier(_) => {
                IconErrorCategory::Resolution
            }
            IconError::InvalidContent { .. }
            | IconError::AlreadyProcessed(_)
            | IconError::NodeDetached(_) => IconErrorCategory::Injection,
            IconError::BundleLoadFailed { .. }
            | IconError::BundleLoadTimeout { .. }
            | IconError::UnknownBundle(_)
            | IconError::DependencyCycle(_) => IconErrorCategory::Bundle,
            IconError::Unsupported(_) | IconError::Host(_) => IconErrorCategory::Host,
            IconError::Config(_) => IconErrorCategory::Config,
        }
    }

    /// Short, stable name of the failure kind, used in reports and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            IconError::ScopeUnavailable(_) => "scope_unavailable",
            IconError::IdentifierNotFound(_) => "identifier_not_found",
            IconError::InvalidContent { .. } => "invalid_content",
            IconError::AlreadyProcessed(_) => "already_processed",
            IconError::NodeDetached(_) => "node_detached",
            IconError::BundleLoadFailed { .. } => "bundle_load_failed",
            IconError::BundleLoadTimeout { .. } => "bundle_load_timeout",
            IconError::Unsupported(_) => "unsupported",
            IconError::NoScope => "no_scope",
            IconError::InvalidIdentifier(_) => "invalid_identifier",
            IconError::UnknownBundle(_) => "unknown_bundle",
            IconError::DependencyCycle(_) => "dependency_cycle",
            IconError::Config(_) => "config",
            IconError::Host(_) => "host",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_errors_convert() {
        let err: IconError = HostError::NodeNotFound(4).into();
        assert_eq!(err.category(), IconErrorCategory::Host);
        assert!(err.is_recoverable());
    }

    #[test]
    fn severity_orders_environment_failures_highest() {
        assert_eq!(IconError::Unsupported("x".into()).severity(), IconErrorSeverity::Critical);
        assert_eq!(IconError::AlreadyProcessed(1).severity(), IconErrorSeverity::Info);
        assert!(IconError::IdentifierNotFound("x".into()).severity() < IconErrorSeverity::Error);
    }

    #[test]
    fn cycle_message_lists_path() {
        let err = IconError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Bundle dependency cycle: a -> b -> a");
    }
}
