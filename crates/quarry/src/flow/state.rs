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
use crate::store::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// The three request shapes `Orchestrator::run` accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    Text(String),
    Segments(Vec<String>),
    Messages(Vec<Message>),
}

impl RunInput {
    /// Interprets raw tool-layer text: a JSON array of role/content objects or of
    /// strings is taken as such, anything else is one user utterance.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            if let Ok(messages) = serde_json::from_str::<Vec<Message>>(trimmed) {
                return RunInput::Messages(messages);
            }
            if let Ok(segments) = serde_json::from_str::<Vec<String>>(trimmed) {
                return RunInput::Segments(segments);
            }
        }
        RunInput::Text(raw.to_string())
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        RunInput::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        RunInput::Text(text)
    }
}

impl From<Vec<String>> for RunInput {
    fn from(segments: Vec<String>) -> Self {
        RunInput::Segments(segments)
    }
}

impl From<Vec<Message>> for RunInput {
    fn from(messages: Vec<Message>) -> Self {
        RunInput::Messages(messages)
    }
}

/// Outcome of executing one statement. `rows` is capped; `total_row_count` is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub statement: String,
    pub total_row_count: usize,
    pub returned_row_count: usize,
    pub rows: Vec<Row>,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn empty(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Default::default()
        }
    }

    pub fn failed(statement: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn from_rows(statement: impl Into<String>, mut rows: Vec<Row>, cap: usize) -> Self {
        let total_row_count = rows.len();
        rows.truncate(cap);
        Self {
            statement: statement.into(),
            total_row_count,
            returned_row_count: rows.len(),
            rows,
            truncated: total_row_count > cap,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A `QueryOutcome` from a multi-statement plan, tagged with its 1-based position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementOutcome {
    pub index: usize,
    pub success: bool,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiQuerySummary {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub total_rows_found: usize,
    pub total_rows_returned: usize,
    pub summary: String,
}

impl MultiQuerySummary {
    pub fn from_outcomes(outcomes: &[StatementOutcome]) -> Self {
        let total_queries = outcomes.len();
        let successful_queries = outcomes.iter().filter(|o| o.success).count();
        let total_rows_found = outcomes.iter().map(|o| o.outcome.total_row_count).sum();
        let total_rows_returned = outcomes.iter().map(|o| o.outcome.returned_row_count).sum();
        let summary = if total_queries == 0 {
            "No queries were generated".to_string()
        } else {
            format!(
                "Executed {total_queries} queries ({successful_queries} successful), \
                 {total_rows_found} rows found, {total_rows_returned} rows returned"
            )
        };
        Self {
            total_queries,
            successful_queries,
            total_rows_found,
            total_rows_returned,
            summary,
        }
    }

    /// Fraction of statements that succeeded; zero for an empty plan.
    pub fn success_ratio(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.successful_queries as f64 / self.total_queries as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub count: Option<i64>,
    pub null_count: Option<i64>,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub exists: bool,
    pub row_count: Option<i64>,
    pub columns: BTreeMap<String, ColumnProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableProfile {
    pub fn missing(error: impl Into<String>) -> Self {
        Self {
            exists: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    NoQuery,
    ExecutionError,
    PartialMultiFailure,
    Success,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerdictMetrics {
    pub total_rows_found: usize,
    pub total_rows_returned: usize,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: EvaluationStatus,
    pub valid: bool,
    pub reason: String,
    pub continue_anyway: bool,
    pub needs_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<VerdictMetrics>,
}

/// The record threaded through every node of one run.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub input_segments: Vec<String>,
    pub messages: Vec<Message>,

    pub intent_analysis: Option<String>,
    pub is_ambiguous: bool,
    pub insufficient_data: bool,
    pub clarification_text: Option<String>,

    pub requires_multiple_queries: bool,
    pub sql_statement: Option<String>,
    pub sql_statements: Vec<String>,
    pub execution_result: Option<QueryOutcome>,
    pub execution_results: Vec<StatementOutcome>,
    pub multi_summary: Option<MultiQuerySummary>,

    pub validated_tables: BTreeMap<String, TableProfile>,
    pub table_samples: BTreeMap<String, Vec<Row>>,
    pub validation_errors: Vec<String>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub needs_retry: bool,
    pub error_log: Vec<String>,
    pub evaluation_verdict: Option<Verdict>,

    pub final_narrative: Option<String>,
    pub trace: Vec<Node>,
}

impl FlowState {
    pub fn new(input: RunInput, max_retries: u32) -> Self {
        let mut state = Self {
            max_retries,
            ..Default::default()
        };
        match input {
            RunInput::Text(text) => state.input_segments = vec![text],
            RunInput::Segments(segments) => state.input_segments = segments,
            RunInput::Messages(messages) => state.messages = messages,
        }
        state
    }

    /// Clears every mutable field, keeping only the caller's input and the retry budget.
    pub fn reset(&mut self) {
        let input_segments = std::mem::take(&mut self.input_segments);
        let messages = std::mem::take(&mut self.messages);
        *self = Self {
            input_segments,
            messages,
            max_retries: self.max_retries,
            ..Default::default()
        };
    }

    /// Joins segments into one user message when the caller sent plain text.
    pub fn normalise_messages(&mut self) {
        if self.messages.is_empty() && !self.input_segments.is_empty() {
            self.messages = vec![Message::user(self.input_segments.join(" "))];
        }
    }

    /// All message contents joined by spaces.
    pub fn request_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Drops the current plan and anything executed from it.
    pub fn clear_plan(&mut self) {
        self.requires_multiple_queries = false;
        self.sql_statement = None;
        self.sql_statements.clear();
        self.execution_result = None;
        self.execution_results.clear();
        self.multi_summary = None;
        self.needs_retry = false;
    }
}

/// Plain result record handed back by `Orchestrator::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: uuid::Uuid,
    pub intent_analysis: Option<String>,
    pub is_ambiguous: bool,
    pub insufficient_data: bool,
    pub clarification_text: Option<String>,
    pub requires_multiple_queries: bool,
    pub sql_statement: Option<String>,
    pub sql_statements: Vec<String>,
    pub execution_result: Option<QueryOutcome>,
    pub execution_results: Vec<StatementOutcome>,
    pub multi_summary: Option<MultiQuerySummary>,
    pub evaluation_verdict: Option<Verdict>,
    pub final_narrative: Option<String>,
    pub validated_tables: BTreeMap<String, TableProfile>,
    pub table_samples: BTreeMap<String, Vec<Row>>,
    pub validation_errors: Vec<String>,
    pub retry_count: u32,
    pub error_log: Vec<String>,
    pub trace: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
    pub elapsed_ms: u64,
}

pub const FALLBACK_SUMMARY: &str = "Unable to produce a summary";

impl RunResult {
    pub fn from_state(state: FlowState, run_id: uuid::Uuid, elapsed_ms: u64) -> Self {
        let summary = state
            .final_narrative
            .clone()
            .or_else(|| state.intent_analysis.clone())
            .unwrap_or_else(|| FALLBACK_SUMMARY.to_string());
        Self {
            run_id,
            intent_analysis: state.intent_analysis,
            is_ambiguous: state.is_ambiguous,
            insufficient_data: state.insufficient_data,
            clarification_text: state.clarification_text,
            requires_multiple_queries: state.requires_multiple_queries,
            sql_statement: state.sql_statement,
            sql_statements: state.sql_statements,
            execution_result: state.execution_result,
            execution_results: state.execution_results,
            multi_summary: state.multi_summary,
            evaluation_verdict: state.evaluation_verdict,
            final_narrative: state.final_narrative,
            validated_tables: state.validated_tables,
            table_samples: state.table_samples,
            validation_errors: state.validation_errors,
            retry_count: state.retry_count,
            error_log: state.error_log,
            trace: state.trace,
            error: None,
            summary,
            elapsed_ms,
        }
    }

    /// Keeps whatever the run produced before failing, with the failure as summary.
    pub fn failed(
        state: FlowState,
        run_id: uuid::Uuid,
        elapsed_ms: u64,
        error: impl std::fmt::Display,
    ) -> Self {
        let message = format!("Error processing request: {error}");
        let mut result = Self::from_state(state, run_id, elapsed_ms);
        result.summary = format!("Error: {error}");
        result.error = Some(message);
        result
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
