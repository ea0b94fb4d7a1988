use crate::error::{CollaboratorError, IngestError};
use crate::models::Element;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_UNSTRUCTURED_URL: &str = "https://api.unstructuredapp.io/general/v0/general";
const PARSE_TIMEOUT: Duration = Duration::from_secs(300);
const SERVICE: &str = "document parser";

/// Black-box document parser: one file in, ordered typed elements out.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<Vec<Element>, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct UnstructuredConfig {
    pub endpoint: String,
    pub api_key: String,
    pub strategy: String,
    pub chunking_strategy: String,
    pub max_characters: usize,
    pub overlap: usize,
}

impl UnstructuredConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            strategy: "hi_res".to_string(),
            chunking_strategy: "by_title".to_string(),
            max_characters: 1_000,
            overlap: 200,
        }
    }
}

pub struct UnstructuredClient {
    client: Client,
    config: UnstructuredConfig,
}

impl UnstructuredClient {
    pub fn new(config: UnstructuredConfig) -> Result<Self, IngestError> {
        if config.api_key.trim().is_empty() {
            return Err(IngestError::Configuration(
                "Unstructured API key is not set".to_string(),
            ));
        }
        url::Url::parse(&config.endpoint).map_err(|error| {
            IngestError::Configuration(format!(
                "invalid Unstructured endpoint {}: {error}",
                config.endpoint
            ))
        })?;

        let client = Client::builder()
            .timeout(PARSE_TIMEOUT)
            .build()
            .map_err(|error| IngestError::Configuration(format!("http client: {error}")))?;

        Ok(Self { client, config })
    }

    /// Strict JSON first; bare `NaN` literals, which the service can emit in
    /// metadata, are rewritten to `null` only if strict parsing fails.
    fn parse_elements(&self, body: &str) -> Result<Vec<Element>, CollaboratorError> {
        match serde_json::from_str(body) {
            Ok(elements) => Ok(elements),
            Err(strict_error) => {
                let relaxed = null_bare_nan_literals(body);
                serde_json::from_str(&relaxed).map_err(|_| CollaboratorError::Malformed {
                    service: SERVICE,
                    details: strict_error.to_string(),
                })
            }
        }
    }
}

/// Replaces `NaN` tokens that sit outside JSON string literals with `null`.
/// String contents, escapes included, are copied through untouched.
fn null_bare_nan_literals(body: &str) -> Cow<'_, str> {
    if !body.contains("NaN") {
        return Cow::Borrowed(body);
    }

    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut previous: Option<char> = None;
    let mut rest = body;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if rest.starts_with("NaN")
            && !previous.is_some_and(is_word)
            && !rest[3..].chars().next().is_some_and(is_word)
        {
            out.push_str("null");
            previous = Some('l');
            rest = &rest[3..];
            continue;
        }

        out.push(c);
        previous = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    Cow::Owned(out)
}

#[async_trait]
impl DocumentParser for UnstructuredClient {
    async fn parse(&self, path: &Path) -> Result<Vec<Element>, CollaboratorError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("document")
            .to_string();
        info!(file = %filename, "parsing document");

        let bytes = tokio::fs::read(path).await?;
        let form = Form::new()
            .part("files", Part::bytes(bytes).file_name(filename))
            .text("strategy", self.config.strategy.clone())
            .text("chunking_strategy", self.config.chunking_strategy.clone())
            .text("max_characters", self.config.max_characters.to_string())
            .text("overlap", self.config.overlap.to_string());

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("unstructured-api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|error| CollaboratorError::from_transport(SERVICE, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| CollaboratorError::from_transport(SERVICE, error))?;

        if status.as_u16() != 200 {
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let elements = self.parse_elements(&body)?;
        info!(elements = elements.len(), "document parsed");
        Ok(elements)
    }
}
