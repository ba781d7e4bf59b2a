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

use super::graph::Node;
use super::prompts::PromptContext;
use super::state::FlowState;
use crate::config::FlowConfig;
use crate::store::{Row, TabularStore};
use llm_contracts::TextGenerationClient;
use std::fmt;
use std::future::Future;
use tracing::error;

/// A collaborator call that failed inside a node. Nodes turn this into an inline
/// error string on the state rather than propagating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub node: Node,
    pub message: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StepFailure {}

/// Awaits `fut`, logging a failure once with the node that issued the call.
pub async fn fallible<T, E, F>(node: Node, fut: F) -> Result<T, StepFailure>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    fut.await.map_err(|e| {
        let message = e.to_string();
        error!(node = %node, error = %message, "Collaborator call failed");
        StepFailure { node, message }
    })
}

/// Borrowed collaborators and configuration handed to every node.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub llm: &'a dyn TextGenerationClient,
    pub store: &'a dyn TabularStore,
    pub config: &'a FlowConfig,
}

impl<'a> StepContext<'a> {
    pub fn prompt<'s>(&'s self, state: &'s FlowState, request: &'s str) -> PromptContext<'s> {
        PromptContext {
            request,
            intent: state.intent_analysis.as_deref(),
            schema: &self.config.schema,
            agent_prompt: self.config.agent_prompt.as_deref(),
            validated_tables: &state.validated_tables,
            table_samples: &state.table_samples,
        }
    }

    pub async fn generate(&self, node: Node, prompt: &str) -> Result<String, StepFailure> {
        fallible(node, self.llm.invoke(prompt)).await
    }

    pub async fn query(&self, node: Node, sql: &str) -> Result<Vec<Row>, StepFailure> {
        fallible(node, self.store.execute(sql)).await
    }
}
