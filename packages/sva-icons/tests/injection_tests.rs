//! Scan and injection tests against an in-memory document
//!
//! Validates:
//! - Initial scan injects class and data-attribute placeholders
//! - Unknown identifiers are reported without touching the node
//! - Modifier classes, preserved attributes and accessibility defaults
//! - Conflicting modifiers render and cache by their winning tag
//! - Every accepted registration spelling resolves by its identifier
//! - Idempotence across rescans and direct injection
//! - Fallback, invalid content and strict mode
//! - A failed swap restores the node; batch injection prewarms the cache

use std::sync::{Arc, Mutex};

use sva_dom::{Document, HostTree};
use sva_icons::{
    EngineConfig, FailureEvent, FailureSource, INJECTED_MARKER, INJECTING_MARKER, IconDefinition,
    IconEngine, IconError, IconId, ModifierTag, PROCESSED_MARKER, RenderOptions, ScanMatch,
};
use sva_traits::{Attribute, ContentNode, HostError, NodeId, NodeView};

const PLUS: &str = r#"<svg viewBox="0 0 24 24"><path d="M12 5v14M5 12h14"/></svg>"#;
const HOME: &str = r#"<svg viewBox="0 0 24 24"><path d="M3 12l9-9 9 9"/><path d="M5 10v10h14V10"/></svg>"#;
const QUESTION: &str = r#"<svg viewBox="0 0 24 24"><circle cx="12" cy="12" r="10"/></svg>"#;

fn quiet_config() -> EngineConfig {
    EngineConfig {
        auto_initialize: false,
        observe: false,
        ..Default::default()
    }
}

fn engine_for(doc: &Document, config: EngineConfig) -> IconEngine {
    let engine = IconEngine::new(Arc::new(doc.clone()), config).unwrap();
    engine.register_icons([
        IconDefinition::from_markup("plus", PLUS).unwrap(),
        IconDefinition::from_markup("Home", HOME).unwrap(),
        IconDefinition::from_markup("question", QUESTION).unwrap(),
    ]);
    engine
}

/// A document whose children can never be replaced
struct FrozenChildren(Document);

impl HostTree for FrozenChildren {
    fn root(&self) -> NodeId {
        self.0.root()
    }
    fn is_attached(&self, node: NodeId) -> bool {
        self.0.is_attached(node)
    }
    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.0.tag_name(node)
    }
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.0.parent(node)
    }
    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.0.children(node)
    }
    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.0.attr(node, name)
    }
    fn attrs(&self, node: NodeId) -> Vec<Attribute> {
        self.0.attrs(node)
    }
    fn set_attr(&self, node: NodeId, name: &str, value: &str) -> Result<(), HostError> {
        self.0.set_attr(node, name, value)
    }
    fn remove_attr(&self, node: NodeId, name: &str) -> Result<(), HostError> {
        self.0.remove_attr(node, name)
    }
    fn query(
        &self,
        scope: NodeId,
        predicate: &mut dyn FnMut(&NodeView<'_>) -> bool,
    ) -> Result<Vec<NodeId>, HostError> {
        self.0.query(scope, predicate)
    }
    fn replace_children(&self, _: NodeId, _: ContentNode) -> Result<NodeId, HostError> {
        Err(HostError::Unsupported("children are frozen".to_string()))
    }
}

fn only_child(doc: &Document, node: usize) -> usize {
    let children = doc.children(node);
    assert_eq!(children.len(), 1, "expected exactly one child under {node}");
    children[0]
}

#[cfg(test)]
mod injection_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_injects_found_icons_and_reports_missing_ones() {
        let doc = Document::new();
        let root = doc.root();
        let plus = doc.append_element(root, "i", &[("class", "sva-icon-plus")]).unwrap();
        let home = doc.append_element(root, "span", &[("data-icon", "home")]).unwrap();
        let missing = doc
            .append_element(root, "i", &[("class", "sva-icon-missing")])
            .unwrap();
        doc.append_element(root, "p", &[("class", "plain")]).unwrap();

        let engine = engine_for(&doc, quiet_config());
        let report = engine.initialize().await;

        assert!(report.success);
        assert_eq!(report.icons_found, 3);
        assert_eq!(report.icons_injected, 2);
        assert_eq!(
            report.errors,
            vec![IconError::IdentifierNotFound("missing".to_string())]
        );

        assert!(doc.has_attr(plus, PROCESSED_MARKER));
        assert!(doc.has_attr(home, PROCESSED_MARKER));
        let content = only_child(&doc, plus);
        assert_eq!(doc.tag_name(content).as_deref(), Some("svg"));
        assert_eq!(doc.attr(content, INJECTED_MARKER).as_deref(), Some("plus"));
        assert_eq!(
            doc.attr(only_child(&doc, home), INJECTED_MARKER).as_deref(),
            Some("home")
        );

        assert!(!doc.has_attr(missing, PROCESSED_MARKER));
        assert!(doc.children(missing).is_empty());
    }

    #[tokio::test]
    async fn test_modifiers_and_preserved_attributes_land_on_content() {
        let doc = Document::new();
        let node = doc
            .append_element(
                doc.root(),
                "i",
                &[
                    ("id", "add-button-icon"),
                    ("class", "toolbar sva-icon-plus sva-icon--l sva-icon--primary"),
                    ("aria-label", "Add item"),
                    ("data-testid", "add"),
                ],
            )
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        let report = engine.initialize().await;
        assert_eq!(report.icons_injected, 1);

        let content = only_child(&doc, node);
        assert_eq!(doc.attr(content, "id").as_deref(), Some("add-button-icon"));
        assert_eq!(doc.attr(node, "id"), None);

        for class in ["sva-icon", "sva-icon-plus", "sva-icon--l", "sva-icon--primary"] {
            assert!(doc.has_class(content, class), "missing class {class}");
        }
        assert!(!doc.has_class(content, "toolbar"));
        assert!(doc.has_class(node, "toolbar"));

        assert_eq!(doc.attr(content, "aria-label").as_deref(), Some("Add item"));
        assert_eq!(doc.attr(content, "role").as_deref(), Some("img"));
        assert_eq!(doc.attr(content, "aria-hidden"), None);
        assert_eq!(doc.attr(content, "focusable").as_deref(), Some("false"));
        assert_eq!(doc.attr(content, "data-testid").as_deref(), Some("add"));
        assert_eq!(doc.attr(content, "width").as_deref(), Some("32"));
        assert_eq!(doc.attr(content, "height").as_deref(), Some("32"));
        assert!(!doc.has_attr(content, PROCESSED_MARKER));
    }

    #[tokio::test]
    async fn test_unlabelled_icons_are_hidden_from_assistive_tech() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        engine.initialize().await;

        let content = only_child(&doc, node);
        assert_eq!(doc.attr(content, "aria-hidden").as_deref(), Some("true"));
        assert_eq!(doc.attr(content, "role"), None);
        assert_eq!(doc.attr(content, "width"), None, "no size modifier, no size");
    }

    #[tokio::test]
    async fn test_renderer_receives_modifier_options() {
        let doc = Document::new();
        let node = doc
            .append_element(
                doc.root(),
                "i",
                &[("class", "sva-icon-dot sva-icon--xl sva-icon--danger sva-icon--rotate-90")],
            )
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        engine.register_icons([IconDefinition::new("dot", |options: &RenderOptions| {
            format!(
                r#"<svg data-size="{}" fill="{}" data-rotate="{}"><circle r="4"/></svg>"#,
                options.size,
                options.color,
                options.rotate.unwrap_or(0)
            )
        })
        .unwrap()]);
        engine.initialize().await;

        let content = only_child(&doc, node);
        assert_eq!(doc.attr(content, "data-size").as_deref(), Some("48"));
        assert_eq!(
            doc.attr(content, "fill").as_deref(),
            Some("var(--sva-color-danger)")
        );
        assert_eq!(doc.attr(content, "data-rotate").as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn test_conflicting_sizes_render_by_class_order() {
        let doc = Document::new();
        let root = doc.root();
        let small_then_large = doc
            .append_element(root, "i", &[("class", "sva-icon-dot sva-icon--s sva-icon--xl")])
            .unwrap();
        let large_then_small = doc
            .append_element(root, "i", &[("class", "sva-icon-dot sva-icon--xl sva-icon--s")])
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        engine.register_icons([IconDefinition::new("dot", |options: &RenderOptions| {
            format!(r#"<svg data-size="{}"><circle r="4"/></svg>"#, options.size)
        })
        .unwrap()]);
        assert_eq!(engine.initialize().await.icons_injected, 2);

        let large = only_child(&doc, small_then_large);
        assert_eq!(doc.attr(large, "data-size").as_deref(), Some("48"));
        assert_eq!(doc.attr(large, "width").as_deref(), Some("48"));

        let small = only_child(&doc, large_then_small);
        assert_eq!(doc.attr(small, "data-size").as_deref(), Some("16"));
        assert_eq!(doc.attr(small, "width").as_deref(), Some("16"));
        assert_eq!(engine.resolver().render_cache().len(), 2);
    }

    #[tokio::test]
    async fn test_any_accepted_registration_name_resolves_by_id() {
        let doc = Document::new();
        let root = doc.root();
        let nodes: Vec<usize> = ["chevron-left", "arrow-right", "chevron-down"]
            .iter()
            .map(|id| {
                let class = format!("sva-icon-{id}");
                doc.append_element(root, "i", &[("class", class.as_str())])
                    .unwrap()
            })
            .collect();

        let engine = engine_for(&doc, quiet_config());
        for name in ["chevronLeft", "arrow_right", "Chevron Down"] {
            let definition = IconDefinition::from_markup(name, PLUS).unwrap();
            let id = definition.id().clone();
            engine.register_icons([definition]);

            let resolved = engine
                .resolver()
                .resolve(&format!("sva-icon-{id}"))
                .unwrap();
            assert!(resolved.is_found(), "{name} registered as {id} must resolve");
            assert_eq!(resolved.definition.unwrap().name(), name);
            assert!(engine.resolver().registry().contains(&id));
        }

        let report = engine.initialize().await;
        assert_eq!(report.icons_injected, 3);
        assert!(nodes.iter().all(|node| doc.has_attr(*node, PROCESSED_MARKER)));
    }

    #[tokio::test]
    async fn test_injection_is_idempotent() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        assert_eq!(engine.initialize().await.icons_injected, 1);
        let first = only_child(&doc, node);

        let rescan = engine.rescan(None).await;
        assert_eq!(rescan.found, 0);
        assert_eq!(rescan.injected, 0);
        assert!(rescan.errors.is_empty());

        let record = engine
            .injector()
            .inject(node, &IconId::parse("plus").unwrap(), &[])
            .unwrap();
        assert!(!record.success);
        assert!(record.is_already_processed());
        assert_eq!(only_child(&doc, node), first, "content must not be replaced");
        assert_eq!(engine.injector().stats().already_processed, 1);
        assert_eq!(engine.injector().stats().injected, 1);
    }

    #[tokio::test]
    async fn test_nodes_holding_injected_content_are_marked_not_reinjected() {
        let doc = Document::new();
        let host = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();
        doc.append_element(host, "svg", &[(INJECTED_MARKER, "plus")])
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        let report = engine.initialize().await;
        assert_eq!(report.icons_found, 0);

        let record = engine
            .injector()
            .inject(host, &IconId::parse("plus").unwrap(), &[])
            .unwrap();
        assert!(record.is_already_processed());
        assert!(doc.has_attr(host, PROCESSED_MARKER));
    }

    #[tokio::test]
    async fn test_fallback_replaces_unknown_icons() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-does-not-exist")])
            .unwrap();

        let config = EngineConfig {
            fallback_icon: Some("question".to_string()),
            ..quiet_config()
        };
        let engine = engine_for(&doc, config);
        let report = engine.initialize().await;

        assert_eq!(report.icons_injected, 1);
        assert!(report.errors.is_empty());
        let content = only_child(&doc, node);
        assert_eq!(doc.attr(content, INJECTED_MARKER).as_deref(), Some("question"));
        assert_eq!(engine.injector().stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_invalid_content_is_rejected() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-broken")])
            .unwrap();

        let engine = engine_for(&doc, quiet_config());
        engine.register_icons([IconDefinition::from_markup("broken", "not markup at all").unwrap()]);
        let report = engine.initialize().await;

        assert_eq!(report.icons_injected, 0);
        assert!(matches!(
            report.errors.as_slice(),
            [IconError::InvalidContent { identifier, .. }] if identifier == "broken"
        ));
        assert!(doc.children(node).is_empty());
        assert!(!doc.has_attr(node, PROCESSED_MARKER));
    }

    #[tokio::test]
    async fn test_invalid_content_uses_fallback_when_configured() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-broken")])
            .unwrap();

        let config = EngineConfig {
            fallback_icon: Some("question".to_string()),
            ..quiet_config()
        };
        let engine = engine_for(&doc, config);
        engine.register_icons([IconDefinition::from_markup("broken", "<svg><g></svg>").unwrap()]);
        let report = engine.initialize().await;

        assert_eq!(report.icons_injected, 1);
        let content = only_child(&doc, node);
        assert_eq!(doc.attr(content, INJECTED_MARKER).as_deref(), Some("question"));
    }

    #[tokio::test]
    async fn test_strict_mode_returns_errors() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-missing")])
            .unwrap();

        let config = EngineConfig {
            strict_mode: true,
            ..quiet_config()
        };
        let engine = engine_for(&doc, config);

        let result = engine
            .injector()
            .inject(node, &IconId::parse("missing").unwrap(), &[]);
        assert_eq!(
            result,
            Err(IconError::IdentifierNotFound("missing".to_string()))
        );

        let report = engine.initialize().await;
        assert!(report.success, "node failures never fail initialization");
        assert_eq!(
            report.errors,
            vec![IconError::IdentifierNotFound("missing".to_string())]
        );
    }

    #[tokio::test]
    async fn test_detached_nodes_fail_with_node_detached() {
        let doc = Document::new();
        let orphan = doc.create_element("i", &[("class", "sva-icon-plus")]);

        let engine = engine_for(&doc, quiet_config());
        let record = engine
            .injector()
            .inject(orphan, &IconId::parse("plus").unwrap(), &[])
            .unwrap();

        assert!(!record.success);
        assert_eq!(record.error, Some(IconError::NodeDetached(orphan)));
        assert_eq!(record.failure_kind(), Some("node_detached"));
    }

    #[tokio::test]
    async fn test_error_handler_sees_every_failure() {
        let doc = Document::new();
        let root = doc.root();
        let missing = doc
            .append_element(root, "i", &[("class", "sva-icon-missing")])
            .unwrap();
        let bad = doc
            .append_element(root, "i", &[("class", "sva-icon-Not_Valid")])
            .unwrap();

        let events: Arc<Mutex<Vec<FailureEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let engine = engine_for(&doc, quiet_config())
            .with_error_handler(move |event| sink.lock().unwrap().push(event.clone()));
        let report = engine.initialize().await;
        assert_eq!(report.errors.len(), 2);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let scan = events
            .iter()
            .find(|event| event.source == FailureSource::Scan)
            .unwrap();
        assert_eq!(scan.node, Some(bad));
        assert!(matches!(scan.error, IconError::InvalidIdentifier(_)));

        let injection = events
            .iter()
            .find(|event| event.source == FailureSource::Injection)
            .unwrap();
        assert_eq!(injection.node, Some(missing));
        assert_eq!(injection.identifier.as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn test_custom_prefix_and_disabled_data_attribute() {
        let doc = Document::new();
        let root = doc.root();
        let custom = doc.append_element(root, "i", &[("class", "ico-plus ico--s")]).unwrap();
        let default_prefix = doc
            .append_element(root, "i", &[("class", "sva-icon-plus")])
            .unwrap();
        let by_attr = doc.append_element(root, "i", &[("data-icon", "plus")]).unwrap();

        let config = EngineConfig {
            prefix: "ico-".to_string(),
            data_attribute: String::new(),
            ..quiet_config()
        };
        let engine = engine_for(&doc, config);
        let report = engine.initialize().await;

        assert_eq!(report.icons_injected, 1);
        let content = only_child(&doc, custom);
        assert!(doc.has_class(content, "ico"));
        assert!(doc.has_class(content, "ico--s"));
        assert_eq!(doc.attr(content, "width").as_deref(), Some("16"));
        assert!(doc.children(default_prefix).is_empty());
        assert!(doc.children(by_attr).is_empty());
    }

    #[tokio::test]
    async fn test_scoped_initialize_leaves_outside_nodes_alone() {
        let doc = Document::new();
        let root = doc.root();
        let toolbar = doc.append_element(root, "nav", &[]).unwrap();
        let inside = doc
            .append_element(toolbar, "i", &[("class", "sva-icon-plus")])
            .unwrap();
        let outside = doc.append_element(root, "i", &[("class", "sva-icon-plus")]).unwrap();

        let config = EngineConfig {
            root_scope: Some(toolbar),
            ..quiet_config()
        };
        let engine = engine_for(&doc, config);
        engine.initialize().await;

        assert!(doc.has_attr(inside, PROCESSED_MARKER));
        assert!(!doc.has_attr(outside, PROCESSED_MARKER));

        let rescan = engine.rescan(Some(root)).await;
        assert_eq!(rescan.injected, 1);
        assert!(doc.has_attr(outside, PROCESSED_MARKER));
    }

    #[tokio::test]
    async fn test_failed_swap_leaves_node_untouched() {
        let doc = Document::new();
        let node = doc
            .append_element(
                doc.root(),
                "i",
                &[("id", "save-icon"), ("class", "sva-icon-plus")],
            )
            .unwrap();

        let engine = IconEngine::new(Arc::new(FrozenChildren(doc.clone())), quiet_config()).unwrap();
        engine.register_icons([IconDefinition::from_markup("plus", PLUS).unwrap()]);
        let report = engine.initialize().await;

        assert_eq!(report.icons_injected, 0);
        assert!(matches!(
            report.errors.as_slice(),
            [IconError::Host(HostError::Unsupported(_))]
        ));
        assert_eq!(doc.attr(node, "id").as_deref(), Some("save-icon"));
        assert!(!doc.has_attr(node, PROCESSED_MARKER));
        assert!(!doc.has_attr(node, INJECTING_MARKER));
        assert!(doc.children(node).is_empty());
    }

    #[tokio::test]
    async fn test_batch_injection_prewarms_and_stops_at_strict_failure() {
        let doc = Document::new();
        let root = doc.root();
        let first = doc.append_element(root, "i", &[]).unwrap();
        let second = doc.append_element(root, "i", &[]).unwrap();
        let ghost = doc.append_element(root, "i", &[]).unwrap();
        let after = doc.append_element(root, "i", &[]).unwrap();
        let large = vec![ModifierTag::parse("l").unwrap()];
        let found = |node, id: &str| ScanMatch {
            node,
            identifier: IconId::parse(id).unwrap(),
            modifiers: large.clone(),
        };

        let lenient = engine_for(&doc, quiet_config());
        let records = lenient
            .injector()
            .inject_batch(&[found(first, "plus"), found(second, "plus")])
            .unwrap();
        assert!(records.iter().all(|record| record.success));
        let cache = lenient.resolver().render_cache().stats();
        assert_eq!(cache.entries, 1, "one render for the shared key");
        assert_eq!(cache.misses, 0, "prewarming filled the cache before the swaps");

        let strict = engine_for(
            &doc,
            EngineConfig {
                strict_mode: true,
                ..quiet_config()
            },
        );
        let result = strict
            .injector()
            .inject_batch(&[found(ghost, "ghost"), found(after, "plus")]);
        assert_eq!(result, Err(IconError::IdentifierNotFound("ghost".to_string())));
        assert!(!doc.has_attr(after, PROCESSED_MARKER));
    }
}
