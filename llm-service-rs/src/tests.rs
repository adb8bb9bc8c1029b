// llm-service-rs/src/tests.rs
// Knowledge base tool and scripted model behaviour

use std::time::Duration;

use serde_json::json;

use crate::knowledge_base::{ARTICLE_TOOL, SEARCH_TOOL, SIMILAR_CASES_TOOL};
use crate::{InvokeOptions, KnowledgeBaseTool, LanguageModel, ScoredArticle, ScriptedModel, ToolService};

#[test]
fn search_scores_title_content_and_keywords() {
    let kb = KnowledgeBaseTool::new();

    // "login" hits kb_001 title (+3), content (+2) and a keyword (+1)
    let hits = kb.search("login", None, 5);
    assert_eq!(hits[0].article.id, "kb_001");
    assert_eq!(hits[0].relevance_score, 6);

    // "password" appears in kb_001 and kb_004 content and keywords
    let hits = kb.search("password", None, 5);
    let ids: Vec<&str> = hits.iter().map(|h| h.article.id.as_str()).collect();
    assert_eq!(ids, vec!["kb_001", "kb_004"]);

    let hits = kb.search("password", Some("account"), 5);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].article.id, "kb_004");

    assert!(kb.search("   ", None, 5).is_empty());
    assert_eq!(kb.search("account", None, 1).len(), 1);
}

#[test]
fn articles_can_be_added_and_listed() {
    let kb = KnowledgeBaseTool::new();
    let id = kb.add_article("Refund Timelines", "Refunds take 5-7 days.", "billing", vec!["refund".into()]);
    assert_eq!(id, "kb_005");
    assert_eq!(kb.article("kb_005").unwrap().title, "Refund Timelines");
    assert_eq!(kb.categories(), vec!["account", "billing", "technical"]);
}

#[tokio::test]
async fn tool_calls_dispatch_by_name() {
    let kb = KnowledgeBaseTool::new();

    let value = kb
        .call_tool(SEARCH_TOOL, json!({"query": "billing", "limit": 2}))
        .await
        .unwrap();
    let hits: Vec<ScoredArticle> = serde_json::from_value(value).unwrap();
    assert_eq!(hits[0].article.id, "kb_002");

    let value = kb.call_tool(ARTICLE_TOOL, json!({"id": "kb_003"})).await.unwrap();
    assert_eq!(value["title"], "API Integration Guide");
    assert!(kb.call_tool(ARTICLE_TOOL, json!({"id": "kb_999"})).await.unwrap().is_null());

    let cases = kb
        .call_tool(SIMILAR_CASES_TOOL, json!({"query": "I was charged twice on my billing statement"}))
        .await
        .unwrap();
    assert_eq!(cases, json!(["Case #5678: Related billing problem"]));

    let err = kb.call_tool("knowledge_base.delete", json!({})).await.unwrap_err();
    assert!(!err.transient);
    let err = kb.call_tool(SEARCH_TOOL, json!({"limit": 1})).await.unwrap_err();
    assert!(err.message.contains("query"));
}

#[tokio::test]
async fn scripted_model_matches_markers_in_order() {
    let model = ScriptedModel::new()
        .respond("Analyze this customer query", "Category: billing")
        .respond("customer", "generic customer reply")
        .otherwise("fallback");

    let options = InvokeOptions::default();
    assert_eq!(
        model.invoke("Analyze this customer query: refund", &options).await.unwrap(),
        "Category: billing"
    );
    assert_eq!(model.invoke("hello customer", &options).await.unwrap(), "generic customer reply");
    assert_eq!(model.invoke("unrelated", &options).await.unwrap(), "fallback");
    assert_eq!(model.calls(), 3);
    assert_eq!(model.prompts()[2], "unrelated");
}

#[tokio::test]
async fn scripted_model_injects_failures_then_recovers() {
    let model = ScriptedModel::new()
        .otherwise("ok")
        .failing(2, true)
        .with_delay(Duration::from_millis(1));

    let options = InvokeOptions::default();
    let first = model.invoke("a", &options).await.unwrap_err();
    assert!(first.transient);
    tokio_test::assert_err!(model.invoke("b", &options).await);
    assert_eq!(model.invoke("c", &options).await.unwrap(), "ok");
    assert_eq!(model.calls(), 3);
}
