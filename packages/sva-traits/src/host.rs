use crate::{Attribute, ContentNode, HostError, NodeId, NodeView, ObserveOptions, Subscription};

/// The element tree the engine scans and decorates.
///
/// All methods take `&self`: implementations are expected to use interior
/// mutability so the engine can share one host between the scanner, the
/// injector and the mutation observer. Writes must emit change notifications to
/// live subscriptions *after* the write is visible to readers.
pub trait HostTree: Send + Sync {
    /// The document root. Used when no explicit scope is configured.
    fn root(&self) -> NodeId;

    /// Whether the node exists and is connected to [`HostTree::root`]
    fn is_attached(&self, node: NodeId) -> bool;

    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn attr(&self, node: NodeId, name: &str) -> Option<String>;

    fn attrs(&self, node: NodeId) -> Vec<Attribute>;

    fn set_attr(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError>;

    fn remove_attr(&self, node: NodeId, name: &str) -> Result<(), HostError>;

    /// Every element in the subtree rooted at `scope` (inclusive) for which
    /// `predicate` returns true, in document order.
    fn query(
        &self,
        scope: NodeId,
        predicate: &mut dyn FnMut(&NodeView<'_>) -> bool,
    ) -> Result<Vec<NodeId>, HostError>;

    /// Replace all children of `node` with a single element built from `content`.
    /// Returns the id of the inserted element.
    fn replace_children(&self, node: NodeId, content: ContentNode) -> Result<NodeId, HostError>;

    /// Subscribe to changes under `scope`. Hosts that cannot deliver
    /// notifications keep the default, which reports [`HostError::Unsupported`].
    fn observe(
        &self,
        scope: NodeId,
        options: ObserveOptions,
        attribute_filter: Option<Vec<String>>,
    ) -> Result<Subscription, HostError> {
        let _ = (scope, options, attribute_filter);
        Err(HostError::Unsupported(
            "change notifications are not available".to_string(),
        ))
    }

    fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    fn class_list(&self, node: NodeId) -> Vec<String> {
        self.attr(node, "class")
            .map(|value| value.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    fn has_class(&self, node: NodeId, token: &str) -> bool {
        self.class_list(node).iter().any(|class| class == token)
    }

    fn add_class(&self, node: NodeId, token: &str) -> Result<(), HostError> {
        let mut classes = self.class_list(node);
        if classes.iter().any(|class| class == token) {
            return Ok(());
        }
        classes.push(token.to_owned());
        self.set_attr(node, "class", &classes.join(" "))
    }

    fn remove_class(&self, node: NodeId, token: &str) -> Result<(), HostError> {
        let mut classes = self.class_list(node);
        let before = classes.len();
        classes.retain(|class| class != token);
        if classes.len() == before {
            return Ok(());
        }
        self.set_attr(node, "class", &classes.join(" "))
    }
}
