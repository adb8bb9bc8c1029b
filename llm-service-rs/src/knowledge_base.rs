// llm-service-rs/src/knowledge_base.rs
// In-process support knowledge base exposed as a tool service.
//
// Tools:
//   knowledge_base.search         {query, category?, limit?} -> [ScoredArticle]
//   knowledge_base.article        {id}                        -> Article | null
//   knowledge_base.similar_cases  {query}                     -> [String]

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::ExternalServiceError;

use crate::ToolService;

const SERVICE: &str = "knowledge_base";
pub const SEARCH_TOOL: &str = "knowledge_base.search";
pub const ARTICLE_TOOL: &str = "knowledge_base.article";
pub const SIMILAR_CASES_TOOL: &str = "knowledge_base.similar_cases";
const DEFAULT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredArticle {
    #[serde(flatten)]
    pub article: Article,
    pub relevance_score: u32,
}

struct PastCase {
    label: &'static str,
    keywords: &'static [&'static str],
}

const PAST_CASES: &[PastCase] = &[
    PastCase {
        label: "Case #1234: Similar login issue",
        keywords: &["login", "password", "locked", "sign in"],
    },
    PastCase {
        label: "Case #5678: Related billing problem",
        keywords: &["billing", "charge", "refund", "invoice", "payment"],
    },
    PastCase {
        label: "Case #2468: API integration failing after key rotation",
        keywords: &["api", "integration", "endpoint", "webhook"],
    },
    PastCase {
        label: "Case #1357: Suspicious account activity",
        keywords: &["security", "2fa", "hacked", "suspicious"],
    },
];

pub fn default_articles() -> Vec<Article> {
    fn article(id: &str, title: &str, category: &str, content: &str, keywords: &[&str]) -> Article {
        Article {
            id: id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            content: content.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    vec![
        article(
            "kb_001",
            "Common Login Issues",
            "technical",
            "Common login issues include incorrect password, account lockout, browser cache problems, \
             and network connectivity issues. Solutions include password reset, clearing cache, trying \
             different browser, and checking network connection.",
            &["login", "password", "account", "authentication"],
        ),
        article(
            "kb_002",
            "Billing Dispute Resolution",
            "billing",
            "Billing disputes can be resolved by reviewing transaction history, checking subscription \
             details, contacting billing department, and providing proof of payment if needed.",
            &["billing", "charge", "payment", "dispute"],
        ),
        article(
            "kb_003",
            "API Integration Guide",
            "technical",
            "API integration requires authentication setup, endpoint understanding, request/response \
             format knowledge, error handling, and testing in sandbox environment before production.",
            &["api", "integration", "development", "technical"],
        ),
        article(
            "kb_004",
            "Account Security Best Practices",
            "account",
            "Account security best practices include using strong passwords, enabling two-factor \
             authentication, regularly updating security settings, and monitoring account activity.",
            &["security", "account", "password", "2fa"],
        ),
    ]
}

pub struct KnowledgeBaseTool {
    articles: RwLock<Vec<Article>>,
}

impl Default for KnowledgeBaseTool {
    fn default() -> Self {
        Self::with_articles(default_articles())
    }
}

impl KnowledgeBaseTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: Vec<Article>) -> Self {
        Self {
            articles: RwLock::new(articles),
        }
    }

    /// Title match +3, content match +2, +1 per keyword overlapping the
    /// query. Ties keep insertion order.
    pub fn search(&self, query: &str, category: Option<&str>, limit: usize) -> Vec<ScoredArticle> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }

        let articles = self.articles.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut scored: Vec<ScoredArticle> = articles
            .iter()
            .filter(|a| category.map_or(true, |c| a.category.eq_ignore_ascii_case(c)))
            .filter_map(|article| {
                let mut score = 0;
                if article.title.to_lowercase().contains(&query) {
                    score += 3;
                }
                if article.content.to_lowercase().contains(&query) {
                    score += 2;
                }
                for keyword in &article.keywords {
                    let keyword = keyword.to_lowercase();
                    if query.contains(&keyword) || keyword.contains(&query) {
                        score += 1;
                    }
                }
                (score > 0).then(|| ScoredArticle {
                    article: article.clone(),
                    relevance_score: score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        scored.truncate(limit);
        scored
    }

    pub fn article(&self, id: &str) -> Option<Article> {
        let articles = self.articles.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        articles.iter().find(|a| a.id == id).cloned()
    }

    /// Adds an article and returns its generated id
    pub fn add_article(&self, title: &str, content: &str, category: &str, keywords: Vec<String>) -> String {
        let mut articles = self.articles.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = format!("kb_{:03}", articles.len() + 1);
        articles.push(Article {
            id: id.clone(),
            title: title.to_string(),
            category: category.to_string(),
            content: content.to_string(),
            keywords,
        });
        id
    }

    pub fn categories(&self) -> Vec<String> {
        let articles = self.articles.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut categories: Vec<String> = articles.iter().map(|a| a.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn similar_cases(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        PAST_CASES
            .iter()
            .filter(|case| case.keywords.iter().any(|k| query.contains(k)))
            .map(|case| case.label.to_string())
            .collect()
    }
}

fn required_str<'a>(args: &'a Value, field: &str, tool: &str) -> Result<&'a str, ExternalServiceError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ExternalServiceError::permanent(SERVICE, format!("{} requires a '{}' string", tool, field)))
}

#[async_trait]
impl ToolService for KnowledgeBaseTool {
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ExternalServiceError> {
        tracing::debug!(tool = name, "knowledge base call");
        match name {
            SEARCH_TOOL => {
                let query = required_str(&args, "query", name)?;
                let category = args.get("category").and_then(Value::as_str);
                let limit = args
                    .get("limit")
                    .and_then(Value::as_u64)
                    .map_or(DEFAULT_LIMIT, |l| l as usize);
                serde_json::to_value(self.search(query, category, limit))
                    .map_err(|e| ExternalServiceError::permanent(SERVICE, e.to_string()))
            }
            ARTICLE_TOOL => {
                let id = required_str(&args, "id", name)?;
                Ok(self.article(id).map_or(Value::Null, |a| json!(a)))
            }
            SIMILAR_CASES_TOOL => {
                let query = required_str(&args, "query", name)?;
                Ok(json!(self.similar_cases(query)))
            }
            other => Err(ExternalServiceError::permanent(
                SERVICE,
                format!("unknown tool '{}'", other),
            )),
        }
    }
}
