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

use crate::error::ConfigError;
use crate::schema::SchemaCatalog;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Upper bound on rows fetched per table while profiling.
pub const MAX_SAMPLE_ROWS: usize = 10;

/// Knobs for one orchestrator instance.
///
/// Every field has a default, so a YAML file only needs the keys it overrides:
///
/// ```yaml
/// max_retries: 2
/// single_row_cap: 300
/// schema:
///   tables:
///     - name: employees
///       columns:
///         - { name: salary, type: numeric }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub max_retries: u32,
    pub recursion_limit: usize,
    pub single_row_cap: usize,
    pub multi_row_cap: usize,
    pub sample_limit: usize,
    pub schema: SchemaCatalog,
    pub agent_prompt: Option<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            recursion_limit: 200,
            single_row_cap: 300,
            multi_row_cap: 50,
            sample_limit: MAX_SAMPLE_ROWS,
            schema: SchemaCatalog::default(),
            agent_prompt: None,
        }
    }
}

impl FlowConfig {
    pub fn with_schema(mut self, schema: SchemaCatalog) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_agent_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.agent_prompt = Some(prompt.into());
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    #[instrument(name = "flow_config_load")]
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
        let config = Self::from_yaml_str(&content)?;
        info!(
            tables = config.schema.tables.len(),
            max_retries = config.max_retries,
            "Loaded flow config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recursion_limit == 0 {
            return Err(ConfigError::Invalid(
                "recursion_limit must be greater than zero".to_string(),
            ));
        }
        if self.single_row_cap == 0 || self.multi_row_cap == 0 {
            return Err(ConfigError::Invalid(
                "row caps must be greater than zero".to_string(),
            ));
        }
        if self.sample_limit == 0 || self.sample_limit > MAX_SAMPLE_ROWS {
            return Err(ConfigError::Invalid(format!(
                "sample_limit must be between 1 and {MAX_SAMPLE_ROWS}"
            )));
        }
        Ok(())
    }
}
