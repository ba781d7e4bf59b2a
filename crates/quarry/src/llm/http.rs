// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, Provider, ProviderConfig, TextGenerationClient};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Text generation over the providers' HTTP APIs: Anthropic messages, OpenAI chat
/// completions and Ollama generate.
#[derive(Clone, Debug)]
pub struct HttpTextClient {
    client: Client,
    config: ProviderConfig,
}

impl HttpTextClient {
    pub fn new(config: ProviderConfig) -> LLMResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LLMError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> LLMResult<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    fn payload(&self, prompt: &str) -> Value {
        match self.config.provider {
            Provider::Ollama => json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": self.config.temperature,
                    "num_predict": self.config.max_tokens
                }
            }),
            _ => json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "messages": [{
                    "role": "user",
                    "content": prompt
                }],
                "temperature": self.config.temperature
            }),
        }
    }

    fn authorise(&self, request: RequestBuilder) -> RequestBuilder {
        let key = self.config.api_key.as_deref().unwrap_or_default();
        match &self.config.provider {
            Provider::Anthropic => request
                .header("x-api-key", key)
                .header(
                    "anthropic-version",
                    self.config.api_version.as_deref().unwrap_or("2023-06-01"),
                ),
            Provider::OpenAI => request.bearer_auth(key),
            _ => request,
        }
    }
}

/// Pulls the completion text out of a provider response body.
fn extract_content(provider: &Provider, body: &Value) -> LLMResult<String> {
    let content = match provider {
        Provider::Anthropic => body["content"][0]["text"].as_str(),
        Provider::OpenAI => body["choices"][0]["message"]["content"].as_str(),
        Provider::Ollama => body["response"].as_str(),
        Provider::Custom(_) => body["content"][0]["text"]
            .as_str()
            .or_else(|| body["response"].as_str()),
    };
    content.map(str::to_string).ok_or_else(|| {
        LLMError::Serialisation(format!("Failed to extract content from {provider} response"))
    })
}

fn status_error(provider: &Provider, status: StatusCode, body: &str) -> LLMError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimit,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LLMError::Authentication(format!("{provider} API error {status}"))
        }
        _ => LLMError::Provider(format!("{provider} API error {status}: {body}")),
    }
}

#[async_trait]
impl TextGenerationClient for HttpTextClient {
    #[instrument(skip(self, prompt), fields(provider = %self.config.provider, prompt_len = prompt.len()))]
    async fn invoke(&self, prompt: &str) -> LLMResult<String> {
        let payload = self.payload(prompt);
        debug!(model = %self.config.model, "Sending completion request");
        let request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);
        let response = self.authorise(request).send().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout
            } else {
                LLMError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        info!(%status, "Received response from LLM API");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&self.config.provider, status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LLMError::Serialisation(e.to_string()))?;
        extract_content(&self.config.provider, &body)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
