//! Integration tests for the tool registry and built-in tools

use std::sync::Arc;

use serde_json::json;

use agent_orchestrator::config::{KnowledgeConfig, ToolsConfig};
use agent_orchestrator::error::ToolError;
use agent_orchestrator::knowledge::{HashingEmbedder, KnowledgeStore, Metadata};
use agent_orchestrator::tools::{KnowledgeSearchBackend, ToolRegistry};

fn registry() -> ToolRegistry {
    ToolRegistry::with_builtins(&ToolsConfig::default(), None).expect("Failed to build registry")
}

#[test]
fn test_builtins_are_registered() {
    let registry = registry();
    assert_eq!(
        registry.names(),
        vec!["calculator", "execute_code", "search", "web_fetch"]
    );
    assert_eq!(registry.schemas().len(), 4);
}

#[tokio::test]
async fn test_calculator_through_registry() {
    let output = registry()
        .execute("calculator", json!({"expression": "25 * 4 + 100"}))
        .await
        .unwrap();

    assert!(output.success);
    assert_eq!(output.result, json!(200));
}

#[tokio::test]
async fn test_calculator_error_is_reported_not_raised() {
    let output = registry()
        .execute("calculator", json!({"expression": "1 / 0"}))
        .await
        .unwrap();

    assert!(!output.success);
    assert!(output.error.is_some());
}

#[tokio::test]
async fn test_deeply_nested_expression_fails_softly() {
    let registry = registry();

    let expression = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
    let output = registry
        .execute("calculator", json!({ "expression": expression }))
        .await
        .unwrap();
    assert!(!output.success);
    assert!(output.error.unwrap().contains("Syntax error"));

    let expression = format!("{}16{}", "sqrt(".repeat(100), ")".repeat(100));
    let output = registry
        .execute("calculator", json!({ "expression": expression }))
        .await
        .unwrap();
    assert!(!output.success);
    assert!(output.error.unwrap().contains("nested too deeply"));

    let output = registry
        .execute("calculator", json!({"expression": "2 + 2"}))
        .await
        .unwrap();
    assert_eq!(output.result, json!(4));
}

#[tokio::test]
async fn test_code_execution_through_registry() {
    let output = registry()
        .execute(
            "execute_code",
            json!({"code": "total = 0\nfor i in range(5):\n    total += i\nprint(total)"}),
        )
        .await
        .unwrap();

    assert!(output.success, "unexpected failure: {:?}", output.error);
    assert_eq!(output.result, json!("10\n"));
}

#[tokio::test]
async fn test_unknown_tool_is_not_found() {
    let err = registry().execute("teleport", json!({})).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound { .. }));
}

#[tokio::test]
async fn test_missing_required_argument_is_rejected() {
    let err = registry()
        .execute("calculator", json!({"expr": "1 + 1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments { .. }));
}

#[tokio::test]
async fn test_unconfigured_tools_fail_softly() {
    let registry = registry();

    let search = registry.execute("search", json!({"query": "rust"})).await.unwrap();
    assert!(!search.success);

    let fetch = registry
        .execute("web_fetch", json!({"url": "https://example.com"}))
        .await
        .unwrap();
    assert!(!fetch.success);
}

#[tokio::test]
async fn test_search_over_knowledge_store() {
    let store = Arc::new(KnowledgeStore::new(
        Arc::new(HashingEmbedder::new(64)),
        KnowledgeConfig::default(),
    ));
    store
        .add_document("Tokio is an async runtime for Rust", &Metadata::new(), Some("tokio.md"))
        .await
        .unwrap();
    store
        .add_document("Bread needs flour and water", &Metadata::new(), Some("bread.md"))
        .await
        .unwrap();

    let registry = ToolRegistry::with_builtins(
        &ToolsConfig::default(),
        Some(Arc::new(KnowledgeSearchBackend::new(store))),
    )
    .unwrap();

    let output = registry
        .execute("search", json!({"query": "async runtime for Rust", "max_results": 1}))
        .await
        .unwrap();

    assert!(output.success);
    let results = output.result["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["title"], "tokio.md");
    assert_eq!(output.metadata["backend"], "knowledge");
}
