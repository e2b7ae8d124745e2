//! Search Collaborator
//!
//! Boundary to an external search service used when nothing in the
//! knowledge base matches. The predictor owns the timeout and turns every
//! failure into a generic acknowledgment of the query.

use crate::error::{ResponderError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Source of short natural-language summaries for a query
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Summarize `query`; errors are recovered by the caller
    async fn search(&self, query: &str) -> anyhow::Result<String>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Run one search call bounded by `timeout`
pub async fn search_with_timeout(
    provider: &dyn SearchProvider,
    query: &str,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, provider.search(query)).await {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(e)) => Err(ResponderError::Search(e)),
        Err(_) => Err(ResponderError::SearchTimeout(timeout)),
    }
}

/// Reply used when the search call fails or times out
pub fn unavailable_summary(query: &str) -> String {
    format!("關於「{query}」，我目前無法獲取最新信息。您可以嘗試更具體的查詢，我會盡力幫助您！")
}

/// Reply used when the search succeeds but finds nothing
pub fn generic_summary(query: &str) -> String {
    format!(
        "我瞭解到您想查詢「{query}」。作為一個AI助手，我可以為您提供建議和信息。如果您需要更詳細的資料，建議您查閱專業資料或網站。"
    )
}

#[cfg(feature = "web-search")]
pub use web::WebSearch;

#[cfg(feature = "web-search")]
mod web {
    use super::{generic_summary, SearchProvider};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    const DDG_ENDPOINT: &str = "https://api.duckduckgo.com/";
    const WIKI_ENDPOINT: &str = "https://zh.wikipedia.org/api/rest_v1/page/summary/";
    const USER_AGENT: &str = "kb-responder/0.1";

    /// DuckDuckGo instant answers with a Wikipedia summary fallback
    pub struct WebSearch {
        client: reqwest::Client,
        wiki_timeout: Duration,
    }

    #[derive(Debug, Deserialize)]
    struct InstantAnswer {
        #[serde(rename = "AbstractText", default)]
        abstract_text: String,
        #[serde(rename = "RelatedTopics", default)]
        related_topics: Vec<RelatedTopic>,
    }

    #[derive(Debug, Deserialize)]
    struct RelatedTopic {
        #[serde(rename = "Text", default)]
        text: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct WikiSummary {
        #[serde(default)]
        extract: Option<String>,
    }

    impl WebSearch {
        pub fn new() -> anyhow::Result<Self> {
            let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
            Ok(Self {
                client,
                wiki_timeout: Duration::from_secs(3),
            })
        }

        async fn instant_answer(&self, query: &str) -> anyhow::Result<Option<String>> {
            let url = format!(
                "{}?q={}&format=json&no_html=1&skip_disambig=1",
                DDG_ENDPOINT,
                urlencoding::encode(query)
            );
            let answer: InstantAnswer = self
                .client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if !answer.abstract_text.trim().is_empty() {
                return Ok(Some(format!("🔍 關於「{}」：{}", query, answer.abstract_text)));
            }

            let topics: Vec<String> = answer
                .related_topics
                .iter()
                .take(2)
                .filter_map(|t| t.text.as_deref())
                .map(|t| t.chars().take(100).collect())
                .collect();
            if topics.is_empty() {
                Ok(None)
            } else {
                Ok(Some(format!("🔍 關於「{}」的相關信息：{}", query, topics.join("；"))))
            }
        }

        async fn wikipedia(&self, query: &str) -> anyhow::Result<Option<String>> {
            let url = format!("{}{}", WIKI_ENDPOINT, urlencoding::encode(query));
            let resp = self.client.get(url).timeout(self.wiki_timeout).send().await?;
            if !resp.status().is_success() {
                return Ok(None);
            }

            let summary: WikiSummary = resp.json().await?;
            Ok(summary.extract.map(|text| {
                let head: String = text.chars().take(200).collect();
                format!("📚 維基百科：{head}...")
            }))
        }
    }

    #[async_trait]
    impl SearchProvider for WebSearch {
        async fn search(&self, query: &str) -> anyhow::Result<String> {
            if let Some(summary) = self.instant_answer(query).await? {
                return Ok(summary);
            }

            match self.wikipedia(query).await {
                Ok(Some(summary)) => return Ok(summary),
                Ok(None) => {}
                Err(e) => log::debug!("Wikipedia lookup failed: {}", e),
            }

            Ok(generic_summary(query))
        }

        fn name(&self) -> &str {
            "web"
        }
    }
}
