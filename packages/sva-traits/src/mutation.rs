//! Change notifications emitted by a host tree

use bitflags::bitflags;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::NodeId;

bitflags! {
    /// Which kinds of change a subscriber wants to hear about
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObserveOptions: u8 {
        /// Children added to or removed from a node
        const CHILD_LIST = 0b0001;
        /// Attribute writes (see [`Subscription`] attribute filters)
        const ATTRIBUTES = 0b0010;
        /// Deliver changes for the whole subtree under the observed scope
        const SUBTREE    = 0b0100;
    }
}

impl Default for ObserveOptions {
    fn default() -> Self {
        ObserveOptions::CHILD_LIST | ObserveOptions::ATTRIBUTES | ObserveOptions::SUBTREE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        name: String,
        old_value: Option<String>,
    },
}

/// One change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn child_list(target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) -> Self {
        Self {
            target,
            kind: MutationKind::ChildList { added, removed },
        }
    }

    pub fn attribute(target: NodeId, name: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            target,
            kind: MutationKind::Attributes {
                name: name.into(),
                old_value,
            },
        }
    }

    pub fn added_nodes(&self) -> &[NodeId] {
        match &self.kind {
            MutationKind::ChildList { added, .. } => added,
            MutationKind::Attributes { .. } => &[],
        }
    }

    pub fn attribute_name(&self) -> Option<&str> {
        match &self.kind {
            MutationKind::Attributes { name, .. } => Some(name),
            MutationKind::ChildList { .. } => None,
        }
    }
}

/// Live subscription to a host's change notifications.
///
/// Records arrive on an unbounded channel. Dropping the handle (or calling
/// [`Subscription::unsubscribe`]) detaches it from the host; records already
/// queued are discarded with it.
pub struct Subscription {
    receiver: UnboundedReceiver<MutationRecord>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        receiver: UnboundedReceiver<MutationRecord>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next record. `None` once the host side is gone.
    pub async fn recv(&mut self) -> Option<MutationRecord> {
        self.receiver.recv().await
    }

    /// Take a record if one is queued, without waiting
    pub fn try_recv(&mut self) -> Option<MutationRecord> {
        self.receiver.try_recv().ok()
    }

    /// Drain every record that is currently queued
    pub fn drain(&mut self) -> Vec<MutationRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.receiver.try_recv() {
            records.push(record);
        }
        records
    }

    pub fn unsubscribe(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.receiver.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}
