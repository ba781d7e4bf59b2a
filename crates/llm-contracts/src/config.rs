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

use crate::types::{LLMError, LLMResult, Provider};
use serde::{Deserialize, Serialize};

/// Connection settings for one text-generation provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl ProviderConfig {
    /// Reads `QUARRY_LLM_PROVIDER` (anthropic, openai or ollama) and the matching
    /// provider variables, after loading any `.env` file in the working directory.
    pub fn from_env() -> LLMResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> LLMResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = Provider::from(
            lookup("QUARRY_LLM_PROVIDER").unwrap_or_else(|| "anthropic".to_string()),
        );
        let timeout_secs = parse_or(&lookup, "QUARRY_LLM_TIMEOUT_SECS", default_timeout_secs());

        let config = match provider {
            Provider::Anthropic => Self {
                endpoint: lookup("ANTHROPIC_ENDPOINT")
                    .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
                api_key: Some(lookup("ANTHROPIC_API_KEY").ok_or_else(|| {
                    LLMError::Configuration(
                        "ANTHROPIC_API_KEY environment variable not set".to_string(),
                    )
                })?),
                model: lookup("ANTHROPIC_MODEL")
                    .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string()),
                max_tokens: parse_or(&lookup, "ANTHROPIC_MAX_TOKENS", 4096),
                temperature: parse_or(&lookup, "ANTHROPIC_TEMPERATURE", 0.2),
                api_version: Some(
                    lookup("ANTHROPIC_API_VERSION").unwrap_or_else(|| "2023-06-01".to_string()),
                ),
                provider,
                timeout_secs,
            },
            Provider::OpenAI => Self {
                endpoint: lookup("OPENAI_ENDPOINT").unwrap_or_else(|| {
                    "https://api.openai.com/v1/chat/completions".to_string()
                }),
                api_key: Some(lookup("OPENAI_API_KEY").ok_or_else(|| {
                    LLMError::Configuration("OPENAI_API_KEY is not configured".to_string())
                })?),
                model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
                max_tokens: parse_or(&lookup, "OPENAI_MAX_TOKENS", 4096),
                temperature: parse_or(&lookup, "OPENAI_TEMPERATURE", 0.2),
                api_version: None,
                provider,
                timeout_secs,
            },
            Provider::Ollama => Self {
                endpoint: lookup("OLLAMA_ENDPOINT")
                    .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string()),
                api_key: None,
                model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
                max_tokens: parse_or(&lookup, "OLLAMA_MAX_TOKENS", 32768),
                temperature: parse_or(&lookup, "OLLAMA_TEMPERATURE", 0.2),
                api_version: None,
                provider,
                timeout_secs,
            },
            Provider::Custom(name) => {
                return Err(LLMError::Configuration(format!(
                    "Unsupported provider: {name}"
                )))
            }
        };
        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = self
            .api_key
            .as_deref()
            .map(|k| {
                if k.chars().count() <= 6 {
                    "***".to_string()
                } else {
                    let head: String = k.chars().take(3).collect();
                    let mut tail: Vec<char> = k.chars().rev().take(3).collect();
                    tail.reverse();
                    format!("{head}…{}", tail.into_iter().collect::<String>())
                }
            })
            .unwrap_or_else(|| "<none>".into());
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &masked)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
