//! An in-memory element tree for the sva icon engine
//!
//! [`Document`] is a small headless DOM: a slab of element and text nodes with
//! attributes, a class list helper, markup serialization and change
//! notifications. It implements [`sva_traits::HostTree`], so it can be handed to
//! the engine directly, and it is what the engine's own test-suite runs against.
//!
//! `Document` is a cheap handle: clones share the same tree, which is how tests
//! keep "framework" access to the tree while the engine holds its own handle.

/// The tree and its mutation API.
mod document;

/// The nodes themselves, and their data.
pub mod node;

mod config;
mod observers;
mod serialize;

pub use config::DocumentConfig;
pub use document::Document;
pub use node::{ElementData, Node, NodeData};

pub use sva_traits::{Attribute, HostError, HostTree, MutationKind, MutationRecord, NodeId};
