use crate::embeddings::OpenAiConfig;
use crate::error::{CollaboratorError, IngestError};
use crate::keywords::KeywordCompleter;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_KEYWORD_MODEL: &str = "gpt-3.5-turbo";
const KEYWORD_TIMEOUT: Duration = Duration::from_secs(15);
const SERVICE: &str = "keyword completion";

/// Chat-completions client used by delegated keyword extraction.
pub struct OpenAiKeywordClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiKeywordClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, IngestError> {
        let endpoint = config.endpoint("chat/completions")?;
        let client = Client::builder()
            .timeout(KEYWORD_TIMEOUT)
            .build()
            .map_err(|error| IngestError::Configuration(format!("http client: {error}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: DEFAULT_KEYWORD_MODEL.to_string(),
        })
    }
}

#[async_trait]
impl KeywordCompleter for OpenAiKeywordClient {
    async fn complete(&self, instruction: &str, text: &str) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": instruction},
                    {"role": "user", "content": text}
                ],
                "max_tokens": 100,
                "temperature": 0
            }))
            .send()
            .await
            .map_err(|error| CollaboratorError::from_transport(SERVICE, error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = response.json().await.map_err(|error| CollaboratorError::Malformed {
            service: SERVICE,
            details: error.to_string(),
        })?;
        completion_content(&payload)
    }
}

fn completion_content(payload: &Value) -> Result<String, CollaboratorError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CollaboratorError::Malformed {
            service: SERVICE,
            details: "missing choices[0].message.content".to_string(),
        })
}
