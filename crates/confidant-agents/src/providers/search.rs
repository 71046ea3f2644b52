use std::time::Duration;

use async_trait::async_trait;
use confidant_common::{Error, Result};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: Option<String>,
}

/// Web search backend used by the research handler.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// DuckDuckGo instant-answer API. Needs no credential.
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
    max_results: usize,
    timeout: Duration,
}

impl DuckDuckGoSearch {
    pub fn new(base_url: impl Into<String>, max_results: usize, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_results,
            timeout,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn provider_id(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        // The API serves JSON with a javascript content type, so parse from text.
        let raw = response
            .text()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("failed to read search body: {e}")))?;
        let body: Value = serde_json::from_str(&raw)?;
        Ok(parse_instant_answer(&body, self.max_results))
    }
}

fn parse_instant_answer(body: &Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    let abstract_text = body["AbstractText"].as_str().unwrap_or_default();
    if !abstract_text.is_empty() {
        hits.push(SearchHit {
            title: body["Heading"].as_str().unwrap_or("Summary").to_string(),
            snippet: abstract_text.to_string(),
            url: body["AbstractURL"]
                .as_str()
                .filter(|u| !u.is_empty())
                .map(str::to_string),
        });
    }

    let answer = body["Answer"].as_str().unwrap_or_default();
    if !answer.is_empty() {
        hits.push(SearchHit {
            title: "Answer".to_string(),
            snippet: answer.to_string(),
            url: None,
        });
    }

    if let Some(topics) = body["RelatedTopics"].as_array() {
        collect_topics(topics, &mut hits);
    }

    hits.truncate(max_results);
    hits
}

fn collect_topics(topics: &[Value], hits: &mut Vec<SearchHit>) {
    for topic in topics {
        // Grouped topics nest their entries under "Topics".
        if let Some(nested) = topic["Topics"].as_array() {
            collect_topics(nested, hits);
            continue;
        }
        let Some(text) = topic["Text"].as_str().filter(|t| !t.is_empty()) else {
            continue;
        };
        let (title, snippet) = match text.split_once(" - ") {
            Some((title, rest)) => (title.to_string(), rest.to_string()),
            None => (text.to_string(), text.to_string()),
        };
        hits.push(SearchHit {
            title,
            snippet,
            url: topic["FirstURL"].as_str().map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn abstract_comes_first_then_related_topics() {
        let body = json!({
            "Heading": "Pune",
            "AbstractText": "Pune is a city in Maharashtra.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Pune",
            "Answer": "",
            "RelatedTopics": [
                { "Text": "Pune district - A district in India", "FirstURL": "https://duckduckgo.com/Pune_district" },
                { "Name": "Places", "Topics": [
                    { "Text": "Shaniwar Wada - A fortification", "FirstURL": "https://duckduckgo.com/Shaniwar_Wada" }
                ]}
            ]
        });

        let hits = parse_instant_answer(&body, 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Pune");
        assert_eq!(hits[1].title, "Pune district");
        assert_eq!(hits[1].snippet, "A district in India");
        assert_eq!(hits[2].title, "Shaniwar Wada");
    }

    #[test]
    fn empty_body_yields_no_hits() {
        assert!(parse_instant_answer(&json!({}), 3).is_empty());
    }
}
