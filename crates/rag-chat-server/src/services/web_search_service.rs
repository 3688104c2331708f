use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WebSearchConfig;
use crate::models::chat::{ChatMessage, Citation};
use crate::services::conversation::providers::{WebSearchEvent, WebSearchProvider, WebSearchStream};
use crate::services::sse;
use crate::utils::error::ModelError;

const WEB_SEARCH_INSTRUCTION: &str = "Answer the clinician's question using current, reputable web sources. \
Be concise and factual.";

#[derive(Debug, Serialize)]
struct SearchCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    web_search_options: Value,
}

#[derive(Debug, Deserialize)]
struct SearchChunk {
    #[serde(default)]
    choices: Vec<SearchChoice>,
}

#[derive(Debug, Deserialize)]
struct SearchChoice {
    #[serde(default)]
    delta: SearchDelta,
}

#[derive(Debug, Default, Deserialize)]
struct SearchDelta {
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "type")]
    kind: String,
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    url: String,
    #[serde(default)]
    title: String,
}

/// Search-enabled chat model that answers from live web results and
/// reports the pages it cited.
pub struct WebSearchService {
    client: Client,
    config: WebSearchConfig,
}

impl WebSearchService {
    pub fn new(config: WebSearchConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl WebSearchProvider for WebSearchService {
    async fn search_and_answer(&self, query: &str) -> Result<WebSearchStream, ModelError> {
        debug!("Web search for '{}'", query);

        let request = SearchCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::system(WEB_SEARCH_INSTRUCTION),
                ChatMessage::user(query),
            ],
            stream: true,
            web_search_options: Value::Object(Default::default()),
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut builder = self.client.post(url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("Failed to call web search API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        let mut payloads = Box::pin(sse::data_payloads(response.bytes_stream()));

        let events = async_stream::stream! {
            let mut citations: Vec<Citation> = Vec::new();

            while let Some(payload) = payloads.next().await {
                let json = match payload {
                    Ok(json) => json,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let chunk: SearchChunk = match serde_json::from_str(&json) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Skipping malformed web search chunk: {}", e);
                        continue;
                    }
                };

                for choice in chunk.choices {
                    collect_citations(&mut citations, choice.delta.annotations);
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        yield Ok(WebSearchEvent::Token(content));
                    }
                }
            }

            if !citations.is_empty() {
                yield Ok(WebSearchEvent::Citations(citations));
            }
            yield Ok(WebSearchEvent::Done);
        };

        Ok(Box::pin(events))
    }
}

/// Keeps the first occurrence of each cited URL.
fn collect_citations(into: &mut Vec<Citation>, annotations: Vec<Annotation>) {
    for annotation in annotations {
        if annotation.kind != "url_citation" {
            continue;
        }
        if let Some(cited) = annotation.url_citation {
            if into.iter().any(|c| c.url == cited.url) {
                continue;
            }
            into.push(Citation {
                title: cited.title,
                url: cited.url,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(base_url: String) -> WebSearchService {
        service_with_timeout(base_url, 5)
    }

    fn service_with_timeout(base_url: String, timeout_seconds: u64) -> WebSearchService {
        WebSearchService::new(WebSearchConfig {
            base_url,
            api_key: String::new(),
            model: "search-test".to_string(),
            timeout_seconds,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_streams_tokens_then_deduplicated_citations() {
        let citation = r#"{"type":"url_citation","url_citation":{"url":"https://eshre.eu","title":"ESHRE","start_index":0,"end_index":5}}"#;
        let body = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"Rates \"}}}}]}}\n\n\
             data: {{\"choices\":[{{\"delta\":{{\"content\":\"vary.\",\"annotations\":[{c},{c}]}}}}]}}\n\n\
             data: [DONE]\n\n",
            c = citation
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "model": "search-test",
                "stream": true,
                "web_search_options": {}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = service(server.uri())
            .search_and_answer("ICSI success rates")
            .await
            .unwrap();
        let events: Vec<WebSearchEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![
                WebSearchEvent::Token("Rates ".to_string()),
                WebSearchEvent::Token("vary.".to_string()),
                WebSearchEvent::Citations(vec![Citation {
                    title: "ESHRE".to_string(),
                    url: "https://eshre.eu".to_string(),
                }]),
                WebSearchEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let result = service(server.uri()).search_and_answer("q").await;
        assert!(matches!(result, Err(ModelError::Status { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: [DONE]\n\n")
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let result = service_with_timeout(server.uri(), 1)
            .search_and_answer("q")
            .await;
        assert!(matches!(result, Err(ModelError::Request(_))));
    }
}
