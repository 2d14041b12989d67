use sva_traits::{MutationKind, MutationRecord, NodeId, ObserveOptions};
use tokio::sync::mpsc::UnboundedSender;

struct ObserverEntry {
    id: u64,
    scope: NodeId,
    options: ObserveOptions,
    attribute_filter: Option<Vec<String>>,
    sender: UnboundedSender<MutationRecord>,
}

impl ObserverEntry {
    fn wants(&self, record: &MutationRecord) -> bool {
        match &record.kind {
            MutationKind::ChildList { .. } => self.options.contains(ObserveOptions::CHILD_LIST),
            MutationKind::Attributes { name, .. } => {
                self.options.contains(ObserveOptions::ATTRIBUTES)
                    && self
                        .attribute_filter
                        .as_ref()
                        .is_none_or(|filter| filter.iter().any(|attr| attr == name))
            }
        }
    }
}

/// Live subscriptions of one document
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    entries: Vec<ObserverEntry>,
}

impl ObserverRegistry {
    pub(crate) fn add(
        &mut self,
        scope: NodeId,
        options: ObserveOptions,
        attribute_filter: Option<Vec<String>>,
        sender: UnboundedSender<MutationRecord>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(ObserverEntry {
            id,
            scope,
            options,
            attribute_filter,
            sender,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.retain(|entry| entry.id != id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver `record` to every subscriber whose scope covers its target.
    ///
    /// `is_inclusive_ancestor(scope, target)` is answered by the caller, which
    /// holds the tree.
    pub(crate) fn dispatch(
        &mut self,
        record: &MutationRecord,
        is_inclusive_ancestor: impl Fn(NodeId, NodeId) -> bool,
    ) {
        self.entries.retain(|entry| !entry.sender.is_closed());
        for entry in &self.entries {
            if !entry.wants(record) {
                continue;
            }
            let in_scope = entry.scope == record.target
                || (entry.options.contains(ObserveOptions::SUBTREE)
                    && is_inclusive_ancestor(entry.scope, record.target));
            if in_scope {
                let _ = entry.sender.send(record.clone());
            }
        }
    }
}
