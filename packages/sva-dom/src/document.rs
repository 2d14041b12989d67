use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use slab::Slab;
use sva_traits::{
    Attribute, ContentNode, HostError, HostTree, MutationRecord, NodeId, NodeView,
    ObserveOptions, Subscription,
};

use crate::observers::ObserverRegistry;
use crate::{DocumentConfig, ElementData, Node, NodeData};

/// Slab-backed node storage
pub(crate) struct Tree {
    pub(crate) nodes: Slab<Node>,
    pub(crate) root: NodeId,
}

impl Tree {
    fn get(&self, id: NodeId) -> Result<&Node, HostError> {
        self.nodes.get(id).ok_or(HostError::NodeNotFound(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, HostError> {
        self.nodes.get_mut(id).ok_or(HostError::NodeNotFound(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, HostError> {
        self.get_mut(id)?
            .element_data_mut()
            .ok_or(HostError::NotAnElement(id))
    }

    fn create_node(&mut self, data: NodeData) -> NodeId {
        let entry = self.nodes.vacant_entry();
        let id = entry.key();
        entry.insert(Node::new(id, data));
        id
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub(crate) fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|node| node.parent);
        }
        false
    }

    fn is_attached(&self, node: NodeId) -> bool {
        self.nodes.contains(node) && self.is_inclusive_ancestor(self.root, node)
    }

    fn detach(&mut self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get_mut(node)?.parent.take()?;
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|child| *child != node);
        }
        Some(parent)
    }

    fn drop_subtree(&mut self, node: NodeId) {
        if let Some(removed) = self.nodes.try_remove(node) {
            for child in removed.children {
                self.drop_subtree(child);
            }
        }
    }

    /// Subtree of `scope` in document order (elements and text)
    pub(crate) fn preorder(&self, scope: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }
}

struct DocumentInner {
    id: usize,
    config: DocumentConfig,
    tree: RwLock<Tree>,
    observers: Mutex<ObserverRegistry>,
}

/// A shared, thread-safe element tree.
///
/// Cloning a `Document` yields another handle to the same tree.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.inner.id)
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a new document holding only a root element
    pub fn new() -> Self {
        Self::with_config(DocumentConfig::default())
    }

    pub fn with_config(config: DocumentConfig) -> Self {
        static ID_GENERATOR: AtomicUsize = AtomicUsize::new(1);

        let id = ID_GENERATOR.fetch_add(1, Ordering::SeqCst);
        let mut nodes = Slab::new();
        let root = nodes.insert(Node::new(
            0,
            NodeData::Element(ElementData::new(config.root_tag.clone(), Vec::new())),
        ));
        nodes[root].id = root;

        Self {
            inner: Arc::new(DocumentInner {
                id,
                config,
                tree: RwLock::new(Tree { nodes, root }),
                observers: Mutex::new(ObserverRegistry::default()),
            }),
        }
    }

    /// Get the [`Document`]'s id
    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.inner.config
    }

    pub fn node_count(&self) -> usize {
        self.inner.tree.read().nodes.len()
    }

    /// Number of live change subscriptions
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Run `f` against a node, if it exists
    pub fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let tree = self.inner.tree.read();
        tree.nodes.get(id).map(f)
    }

    /// Create a detached element. Attach it with [`Document::append_child`].
    pub fn create_element(&self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let attrs = attrs
            .iter()
            .map(|(name, value)| Attribute::new(*name, *value))
            .collect();
        self.inner
            .tree
            .write()
            .create_node(NodeData::Element(ElementData::new(tag, attrs)))
    }

    pub fn create_text_node(&self, text: &str) -> NodeId {
        self.inner
            .tree
            .write()
            .create_node(NodeData::Text(text.to_string()))
    }

    /// Append `child` as the last child of `parent`, moving it if it is already
    /// attached elsewhere.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.append_children(parent, &[child])
    }

    /// Append several children, emitting a single child-list record for `parent`
    /// (the way a framework commit inserts a whole fragment at once).
    pub fn append_children(&self, parent: NodeId, children: &[NodeId]) -> Result<(), HostError> {
        let mut records = Vec::new();
        {
            let mut tree = self.inner.tree.write();
            tree.get(parent)?
                .element_data()
                .ok_or(HostError::NotAnElement(parent))?;
            for &child in children {
                tree.get(child)?;
                if tree.is_inclusive_ancestor(child, parent) {
                    return Err(HostError::InvalidOperation(format!(
                        "node {child} cannot be appended inside itself"
                    )));
                }
            }
            for &child in children {
                if let Some(old_parent) = tree.detach(child) {
                    records.push(MutationRecord::child_list(old_parent, Vec::new(), vec![child]));
                }
                tree.get_mut(child)?.parent = Some(parent);
                let parent_node = tree.get_mut(parent)?;
                parent_node.children.push(child);
                if let Some(element) = parent_node.element_data_mut() {
                    element.raw_inner = None;
                }
            }
        }
        if !children.is_empty() {
            records.push(MutationRecord::child_list(parent, children.to_vec(), Vec::new()));
        }
        self.notify(records);
        Ok(())
    }

    /// Create an element and append it in one step
    pub fn append_element(
        &self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId, HostError> {
        let id = self.create_element(tag, attrs);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Detach a node and drop its whole subtree
    pub fn remove_node(&self, node: NodeId) -> Result<(), HostError> {
        let record = {
            let mut tree = self.inner.tree.write();
            if node == tree.root {
                return Err(HostError::InvalidOperation(
                    "the root element cannot be removed".to_string(),
                ));
            }
            tree.get(node)?;
            let parent = tree.detach(node);
            tree.drop_subtree(node);
            parent.map(|parent| MutationRecord::child_list(parent, Vec::new(), vec![node]))
        };
        self.notify(record.into_iter().collect());
        Ok(())
    }

    /// Serialize a node and its subtree
    pub fn outer_html(&self, node: NodeId) -> Option<String> {
        let tree = self.inner.tree.read();
        tree.nodes.get(node)?;
        let mut out = String::new();
        tree.write_node(node, &mut out);
        Some(out)
    }

    /// Serialize the children of a node
    pub fn inner_html(&self, node: NodeId) -> Option<String> {
        let tree = self.inner.tree.read();
        let mut out = String::new();
        tree.write_children(tree.nodes.get(node)?, &mut out);
        Some(out)
    }

    pub fn text_content(&self, node: NodeId) -> Option<String> {
        let tree = self.inner.tree.read();
        tree.nodes.get(node)?;
        let mut out = String::new();
        for id in tree.preorder(node) {
            if let Some(NodeData::Text(text)) = tree.nodes.get(id).map(|node| &node.data) {
                out.push_str(text);
            }
        }
        Some(out)
    }

    fn notify(&self, records: Vec<MutationRecord>) {
        if records.is_empty() || self.inner.observers.lock().is_empty() {
            return;
        }
        let tree = self.inner.tree.read();
        let mut observers = self.inner.observers.lock();
        for record in &records {
            #[cfg(feature = "tracing")]
            tracing::trace!(doc = self.inner.id, node = record.target, "Dispatching mutation record");
            observers.dispatch(record, |scope, target| tree.is_inclusive_ancestor(scope, target));
        }
    }
}

impl HostTree for Document {
    fn root(&self) -> NodeId {
        self.inner.tree.read().root
    }

    fn is_attached(&self, node: NodeId) -> bool {
        self.inner.tree.read().is_attached(node)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.with_node(node, |node| node.element_data().map(|el| el.name.clone()))
            .flatten()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.with_node(node, |node| node.parent).flatten()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.with_node(node, |node| node.children.clone())
            .unwrap_or_default()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.with_node(node, |node| node.attr(name).map(str::to_owned))
            .flatten()
    }

    fn attrs(&self, node: NodeId) -> Vec<Attribute> {
        self.with_node(node, |node| {
            node.element_data()
                .map(|el| el.attrs.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    fn set_attr(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError> {
        let old_value = self.inner.tree.write().element_mut(node)?.set_attr(name, value);
        self.notify(vec![MutationRecord::attribute(node, name, old_value)]);
        Ok(())
    }

    fn remove_attr(&self, node: NodeId, name: &str) -> Result<(), HostError> {
        let old_value = self.inner.tree.write().element_mut(node)?.remove_attr(name);
        if old_value.is_some() {
            self.notify(vec![MutationRecord::attribute(node, name, old_value)]);
        }
        Ok(())
    }

    fn query(
        &self,
        scope: NodeId,
        predicate: &mut dyn FnMut(&NodeView<'_>) -> bool,
    ) -> Result<Vec<NodeId>, HostError> {
        let tree = self.inner.tree.read();
        tree.get(scope)?;
        Ok(tree
            .preorder(scope)
            .into_iter()
            .filter(|id| {
                tree.nodes
                    .get(*id)
                    .and_then(Node::view)
                    .is_some_and(|view| predicate(&view))
            })
            .collect())
    }

    fn replace_children(&self, node: NodeId, content: ContentNode) -> Result<NodeId, HostError> {
        let (inserted, removed) = {
            let mut tree = self.inner.tree.write();
            tree.element_mut(node)?.raw_inner = None;
            let removed = std::mem::take(&mut tree.get_mut(node)?.children);
            for child in &removed {
                tree.drop_subtree(*child);
            }
            let mut element = ElementData::new(content.tag, content.attrs);
            element.raw_inner = Some(content.inner_markup);
            let inserted = tree.create_node(NodeData::Element(element));
            tree.get_mut(inserted)?.parent = Some(node);
            tree.get_mut(node)?.children.push(inserted);
            (inserted, removed)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(node, inserted, removed = removed.len(), "Replaced node children");

        self.notify(vec![MutationRecord::child_list(node, vec![inserted], removed)]);
        Ok(inserted)
    }

    fn observe(
        &self,
        scope: NodeId,
        options: ObserveOptions,
        attribute_filter: Option<Vec<String>>,
    ) -> Result<Subscription, HostError> {
        if !self.inner.config.observable {
            return Err(HostError::Unsupported(
                "this document was created without change notifications".to_string(),
            ));
        }
        if !self.inner.tree.read().nodes.contains(scope) {
            return Err(HostError::NodeNotFound(scope));
        }

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let id = self
            .inner
            .observers
            .lock()
            .add(scope, options, attribute_filter, sender);
        let weak: Weak<DocumentInner> = Arc::downgrade(&self.inner);

        Ok(Subscription::new(receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.lock().remove(id);
            }
        }))
    }
}
