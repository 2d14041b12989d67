//! Finding icon placeholders in a host subtree

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sva_traits::{HostTree, NodeId, NodeView};

use crate::config::{EngineConfig, INJECTED_MARKER, PROCESSED_MARKER};
use crate::error::{IconError, IconResult};
use crate::identifier::{IconId, ModifierTag, PrefixedToken, classify_token, normalize_modifiers};

/// A node ready for injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanMatch {
    pub node: NodeId,
    pub identifier: IconId,
    /// Canonical modifier set
    pub modifiers: Vec<ModifierTag>,
}

/// A node that carries a prefixed token but no usable identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    pub node: NodeId,
    pub error: IconError,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub matches: Vec<ScanMatch>,
    /// Candidates that passed the class / data-attribute pre-filter
    pub total_nodes: usize,
    /// Unprocessed candidates with at least one prefixed token
    pub matched_nodes: usize,
    pub valid_nodes: usize,
    pub scan_time: Duration,
    pub errors: Vec<ScanIssue>,
}

/// What the scanner concluded about a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// Already processed, injected content, or holding injected content
    Skipped,
    /// Neither a prefixed class nor the data attribute
    NoToken,
    Invalid(ScanIssue),
    Match(ScanMatch),
}

/// Read-only walker that extracts identifiers and modifiers from nodes
pub struct Scanner {
    host: Arc<dyn HostTree>,
    prefix: String,
    data_attribute: Option<String>,
    batch_size: usize,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("prefix", &self.prefix)
            .field("data_attribute", &self.data_attribute)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Scanner {
    pub fn new(host: Arc<dyn HostTree>, config: &EngineConfig) -> Self {
        Self {
            host,
            prefix: config.prefix.clone(),
            data_attribute: config.data_attribute().map(str::to_owned),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Cheap attribute-only test used before any per-node work
    pub fn is_candidate(&self, view: &NodeView<'_>) -> bool {
        view.classes().any(|class| class.starts_with(self.prefix.as_str()))
            || self
                .data_attribute
                .as_deref()
                .is_some_and(|attr| view.has_attr(attr))
    }

    /// Scan the subtree rooted at `scope` (inclusive), in tree order.
    ///
    /// Yields to the scheduler after every batch of candidates.
    pub async fn scan(&self, scope: NodeId) -> IconResult<ScanReport> {
        if !self.host.is_attached(scope) {
            return Err(IconError::ScopeUnavailable(scope));
        }
        let start = Instant::now();
        let candidates = self
            .host
            .query(scope, &mut |view| self.is_candidate(view))?;

        let mut report = self.inspect_all(&candidates).await;
        report.scan_time = start.elapsed();
        tracing::debug!(
            scope,
            total = report.total_nodes,
            matched = report.matched_nodes,
            valid = report.valid_nodes,
            elapsed_us = report.scan_time.as_micros() as u64,
            "Scan complete"
        );
        Ok(report)
    }

    /// Run the per-node logic over an explicit candidate list, dropping
    /// detached nodes and nodes that fail the pre-filter.
    pub async fn scan_nodes(&self, candidates: &[NodeId]) -> ScanReport {
        let start = Instant::now();
        let candidates: Vec<NodeId> = candidates
            .iter()
            .copied()
            .filter(|node| self.host.is_attached(*node))
            .filter(|node| {
                let attrs = self.host.attrs(*node);
                self.is_candidate(&NodeView {
                    id: *node,
                    tag: "",
                    attrs: &attrs,
                })
            })
            .collect();

        let mut report = self.inspect_all(&candidates).await;
        report.scan_time = start.elapsed();
        report
    }

    async fn inspect_all(&self, candidates: &[NodeId]) -> ScanReport {
        let mut report = ScanReport {
            total_nodes: candidates.len(),
            ..Default::default()
        };
        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }
            for node in batch {
                match self.inspect(*node) {
                    Inspection::Skipped | Inspection::NoToken => {}
                    Inspection::Invalid(issue) => {
                        report.matched_nodes += 1;
                        report.errors.push(issue);
                    }
                    Inspection::Match(found) => {
                        report.matched_nodes += 1;
                        report.valid_nodes += 1;
                        report.matches.push(found);
                    }
                }
            }
        }
        report
    }

    /// Classify a single node. Never mutates the host.
    pub fn inspect(&self, node: NodeId) -> Inspection {
        let attrs = self.host.attrs(node);
        let view = NodeView {
            id: node,
            tag: "",
            attrs: &attrs,
        };
        if view.has_attr(PROCESSED_MARKER)
            || view.has_attr(INJECTED_MARKER)
            || self.holds_injected_content(node)
        {
            return Inspection::Skipped;
        }

        let mut identifier = None;
        let mut first_invalid = None;
        let mut modifiers = Vec::new();
        let mut prefixed = false;

        for class in view.classes() {
            match classify_token(&self.prefix, class) {
                Some(PrefixedToken::Identifier(rest)) => {
                    prefixed = true;
                    if identifier.is_some() {
                        continue;
                    }
                    match IconId::parse(rest) {
                        Ok(id) => identifier = Some(id),
                        Err(err) => {
                            first_invalid.get_or_insert(err);
                        }
                    }
                }
                Some(PrefixedToken::Modifier(rest)) => {
                    prefixed = true;
                    match ModifierTag::parse(rest) {
                        Some(tag) => modifiers.push(tag),
                        None => tracing::debug!(node, class, "Ignoring unknown modifier"),
                    }
                }
                None => {}
            }
        }

        if identifier.is_none() {
            if let Some(value) = self
                .data_attribute
                .as_deref()
                .and_then(|attr| view.attr(attr))
            {
                prefixed = true;
                match IconId::parse(value.trim()) {
                    Ok(id) => identifier = Some(id),
                    Err(err) => {
                        first_invalid.get_or_insert(err);
                    }
                }
            }
        }

        match identifier {
            Some(identifier) => Inspection::Match(ScanMatch {
                node,
                identifier,
                modifiers: normalize_modifiers(&modifiers),
            }),
            None if prefixed => Inspection::Invalid(ScanIssue {
                node,
                error: first_invalid
                    .unwrap_or_else(|| IconError::InvalidIdentifier(String::new())),
            }),
            None => Inspection::NoToken,
        }
    }

    fn holds_injected_content(&self, node: NodeId) -> bool {
        self.host
            .children(node)
            .into_iter()
            .any(|child| self.host.has_attr(child, INJECTED_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{IconColor, IconSize};
    use sva_traits::{Attribute, ContentNode, HostError};

    /// Flat host: every node is a child of node 0
    struct FlatHost {
        nodes: Vec<Vec<Attribute>>,
    }

    impl FlatHost {
        fn new(classes: &[&str]) -> Arc<Self> {
            let mut nodes = vec![Vec::new()];
            nodes.extend(
                classes
                    .iter()
                    .map(|class| vec![Attribute::new("class", *class)]),
            );
            Arc::new(Self { nodes })
        }
    }

    impl HostTree for FlatHost {
        fn root(&self) -> NodeId {
            0
        }
        fn is_attached(&self, node: NodeId) -> bool {
            node < self.nodes.len()
        }
        fn tag_name(&self, _: NodeId) -> Option<String> {
            Some("i".into())
        }
        fn parent(&self, node: NodeId) -> Option<NodeId> {
            (node > 0).then_some(0)
        }
        fn children(&self, node: NodeId) -> Vec<NodeId> {
            if node == 0 {
                (1..self.nodes.len()).collect()
            } else {
                Vec::new()
            }
        }
        fn attr(&self, node: NodeId, name: &str) -> Option<String> {
            self.nodes
                .get(node)?
                .iter()
                .find(|a| a.name.as_str() == name)
                .map(|a| a.value.clone())
        }
        fn attrs(&self, node: NodeId) -> Vec<Attribute> {
            self.nodes.get(node).cloned().unwrap_or_default()
        }
        fn set_attr(&self, _: NodeId, _: &str, _: &str) -> Result<(), HostError> {
            Err(HostError::Unsupported("read-only".into()))
        }
        fn remove_attr(&self, _: NodeId, _: &str) -> Result<(), HostError> {
            Err(HostError::Unsupported("read-only".into()))
        }
        fn query(
            &self,
            _scope: NodeId,
            predicate: &mut dyn FnMut(&NodeView<'_>) -> bool,
        ) -> Result<Vec<NodeId>, HostError> {
            Ok((0..self.nodes.len())
                .filter(|id| {
                    predicate(&NodeView {
                        id: *id,
                        tag: "i",
                        attrs: &self.nodes[*id],
                    })
                })
                .collect())
        }
        fn replace_children(&self, _: NodeId, _: ContentNode) -> Result<NodeId, HostError> {
            Err(HostError::Unsupported("read-only".into()))
        }
    }

    fn scanner(host: Arc<FlatHost>) -> Scanner {
        Scanner::new(host, &EngineConfig::default())
    }

    #[test]
    fn extracts_identifier_and_modifiers() {
        let scanner = scanner(FlatHost::new(&[
            "btn sva-icon--l sva-icon-plus sva-icon--primary sva-icon--huge",
        ]));
        match scanner.inspect(1) {
            Inspection::Match(found) => {
                assert_eq!(found.identifier.as_str(), "plus");
                assert_eq!(
                    found.modifiers,
                    vec![
                        ModifierTag::Size(IconSize::L),
                        ModifierTag::Color(IconColor::Primary)
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn first_valid_identifier_wins() {
        let scanner = scanner(FlatHost::new(&["sva-icon-Bad sva-icon-star sva-icon-heart"]));
        let Inspection::Match(found) = scanner.inspect(1) else {
            panic!("expected a match");
        };
        assert_eq!(found.identifier.as_str(), "star");
    }

    #[test]
    fn modifier_only_nodes_are_invalid() {
        let scanner = scanner(FlatHost::new(&["sva-icon--xl"]));
        assert!(matches!(scanner.inspect(1), Inspection::Invalid(_)));
    }

    #[tokio::test]
    async fn scan_counts_and_orders() {
        let scanner = scanner(FlatHost::new(&[
            "sva-icon-plus",
            "plain",
            "sva-icon-Nope",
            "sva-icon-minus sva-icon--s",
        ]));
        let report = scanner.scan(0).await.unwrap();
        assert_eq!(report.total_nodes, 3);
        assert_eq!(report.matched_nodes, 3);
        assert_eq!(report.valid_nodes, 2);
        assert_eq!(
            report.matches.iter().map(|m| m.node).collect::<Vec<_>>(),
            vec![1, 4]
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.errors[0].error,
            IconError::InvalidIdentifier("Nope".into())
        );
    }

    #[tokio::test]
    async fn missing_scope_is_unavailable() {
        let scanner = scanner(FlatHost::new(&[]));
        assert_eq!(
            scanner.scan(42).await.unwrap_err(),
            IconError::ScopeUnavailable(42)
        );
    }

    #[tokio::test]
    async fn batching_visits_every_candidate() {
        let classes: Vec<String> = (0..250).map(|i| format!("sva-icon-i{i}")).collect();
        let refs: Vec<&str> = classes.iter().map(String::as_str).collect();
        let report = scanner(FlatHost::new(&refs)).scan(0).await.unwrap();
        assert_eq!(report.valid_nodes, 250);
        assert_eq!(report.matches.last().unwrap().identifier.as_str(), "i249");
    }
}
