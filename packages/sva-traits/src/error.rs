use thiserror::Error;

use crate::NodeId;

/// Errors raised by a [`HostTree`](crate::HostTree) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The node id does not refer to a live node
    #[error("Node {0} does not exist")]
    NodeNotFound(NodeId),

    /// The node exists but is not connected to the document root
    #[error("Node {0} is detached from the document")]
    Detached(NodeId),

    /// The operation needs an element but the node is text
    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    /// The host cannot provide the requested capability
    #[error("Unsupported host operation: {0}")]
    Unsupported(String),

    /// The operation would corrupt the tree (e.g. appending a node to itself)
    #[error("Invalid tree operation: {0}")]
    InvalidOperation(String),
}
