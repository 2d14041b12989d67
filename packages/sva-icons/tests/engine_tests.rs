//! Engine lifecycle tests
//!
//! Validates:
//! - Configuration validation and partial JSON configuration
//! - Launch with and without auto-initialization
//! - Unavailable scopes fail initialization
//! - Statistics snapshots and teardown

use std::sync::Arc;

use sva_dom::{Document, HostTree};
use sva_icons::{
    EngineConfig, IconDefinition, IconEngine, IconError, IconErrorCategory, IconErrorSeverity,
    PROCESSED_MARKER,
};

const PLUS: &str = r#"<svg viewBox="0 0 24 24"><path d="M12 5v14M5 12h14"/></svg>"#;
const MINUS: &str = r#"<svg viewBox="0 0 24 24"><path d="M5 12h14"/></svg>"#;

fn definitions() -> Vec<IconDefinition> {
    vec![
        IconDefinition::from_markup("plus", PLUS).unwrap(),
        IconDefinition::from_markup("minus", MINUS).unwrap(),
    ]
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        auto_initialize: false,
        observe: false,
        ..Default::default()
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let doc = Document::new();
        let bad_prefix = EngineConfig {
            prefix: "Icon".to_string(),
            ..Default::default()
        };
        let error = IconEngine::new(Arc::new(doc.clone()), bad_prefix).unwrap_err();
        assert!(matches!(error, IconError::Config(_)));
        assert_eq!(error.category(), IconErrorCategory::Config);

        let bad_fallback = EngineConfig {
            fallback_icon: Some("Not An Id".to_string()),
            ..Default::default()
        };
        assert!(IconEngine::new(Arc::new(doc), bad_fallback).is_err());
    }

    #[test]
    fn test_partial_json_configuration() {
        let config =
            EngineConfig::from_json(r#"{"prefix": "ico-", "debounce_ms": 10, "bundles": {"max_retries": 5}}"#)
                .unwrap();
        assert_eq!(config.prefix, "ico-");
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.bundles.max_retries, 5);
        assert_eq!(config.bundles.retry_delay_ms, 100);
        assert_eq!(config.batch_size, 100);
        assert!(config.observe);

        assert!(matches!(
            EngineConfig::from_json(r#"{"batch_size": 0}"#),
            Err(IconError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(IconError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_initializes_when_configured() {
        let doc = Document::new();
        let node = doc
            .append_element(doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();

        let config = EngineConfig {
            auto_initialize: true,
            observe: false,
            ..Default::default()
        };
        let (engine, report) = IconEngine::launch(Arc::new(doc.clone()), config, definitions())
            .await
            .unwrap();
        let report = report.unwrap();
        assert!(report.success);
        assert_eq!(report.icons_injected, 1);
        assert!(doc.has_attr(node, PROCESSED_MARKER));
        assert!(engine.stats().initialized);

        let (lazy, report) = IconEngine::launch(Arc::new(Document::new()), quiet_config(), definitions())
            .await
            .unwrap();
        assert!(report.is_none());
        assert!(!lazy.stats().initialized);
        assert_eq!(lazy.stats().icons_registered, 2);
    }

    #[tokio::test]
    async fn test_detached_scope_fails_initialization() {
        let doc = Document::new();
        let detached = doc.create_element("section", &[]);
        let config = EngineConfig {
            root_scope: Some(detached),
            ..quiet_config()
        };
        let engine = IconEngine::new(Arc::new(doc), config).unwrap();

        let report = engine.initialize().await;
        assert!(!report.success);
        assert_eq!(report.errors, vec![IconError::ScopeUnavailable(detached)]);
        assert_eq!(report.errors[0].severity(), IconErrorSeverity::Critical);

        let rescan = engine.rescan(None).await;
        assert_eq!(rescan.found, 0);
        assert_eq!(rescan.errors, vec![IconError::ScopeUnavailable(detached)]);
    }

    #[tokio::test]
    async fn test_stats_and_destroy() {
        let doc = Document::new();
        let root = doc.root();
        for class in ["sva-icon-plus", "sva-icon-plus sva-icon--l", "sva-icon-minus", "sva-icon-nope"] {
            doc.append_element(root, "i", &[("class", class)]).unwrap();
        }

        let engine = IconEngine::new(Arc::new(doc.clone()), quiet_config()).unwrap();
        engine.register_icons(definitions());
        let report = engine.initialize().await;
        assert_eq!(report.icons_found, 4);
        assert_eq!(report.icons_injected, 3);

        let stats = engine.destroy().await;
        assert_eq!(stats.icons_found, 4);
        assert_eq!(stats.icons_injected, 3);
        assert_eq!(stats.injector.injected, 3);
        assert_eq!(stats.injector.failed, 1);
        assert_eq!(stats.icons_registered, 2);
        assert_eq!(stats.failures.get("identifier_not_found"), Some(&1));
        assert_eq!(stats.cache.entries, 3, "plus, plus+l and minus render separately");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["injector"]["injected"], 3);
        assert_eq!(json["observer_state"], "Idle");

        assert!(engine.resolver().registry().is_empty());
        assert!(engine.resolver().render_cache().is_empty());
        assert_eq!(
            doc.children(root)
                .iter()
                .filter(|node| doc.has_attr(**node, PROCESSED_MARKER))
                .count(),
            3,
            "injected content outlives the engine"
        );
    }

    #[tokio::test]
    async fn test_engines_are_independent() {
        let first_doc = Document::new();
        let second_doc = Document::new();
        let first_node = first_doc
            .append_element(first_doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();
        let second_node = second_doc
            .append_element(second_doc.root(), "i", &[("class", "sva-icon-plus")])
            .unwrap();

        let first = IconEngine::new(Arc::new(first_doc.clone()), quiet_config()).unwrap();
        first.register_icons(definitions());
        let second = IconEngine::new(Arc::new(second_doc.clone()), quiet_config()).unwrap();

        assert_eq!(first.initialize().await.icons_injected, 1);
        let report = second.initialize().await;
        assert_eq!(report.icons_injected, 0, "registrations are per engine");
        assert!(first_doc.has_attr(first_node, PROCESSED_MARKER));
        assert!(!second_doc.has_attr(second_node, PROCESSED_MARKER));
    }
}
