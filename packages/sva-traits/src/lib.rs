//! Shared traits and types for the sva icon injection engine
//!
//! The engine never owns the element tree it decorates. Everything it needs from
//! the host is expressed by the [`HostTree`] trait defined here, so that a DOM
//! binding, a server-side document model or the in-memory `sva-dom` crate can all
//! drive the same scan / inject / observe pipeline.

pub mod error;
pub mod host;
pub mod mutation;
pub mod node;

pub use error::HostError;
pub use host::HostTree;
pub use mutation::{MutationKind, MutationRecord, ObserveOptions, Subscription};
pub use node::{Attribute, ContentNode, NodeId, NodeView};
