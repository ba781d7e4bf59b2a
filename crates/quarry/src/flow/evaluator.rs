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

use super::sanitize::StatementKind;
use super::state::{EvaluationStatus, FlowState, Verdict, VerdictMetrics};
use tracing::{info, instrument, warn};

/// Multi plans below this success ratio are treated as failed.
pub const MIN_SUCCESS_RATIO: f64 = 0.5;

fn no_query(reason: &str) -> Verdict {
    Verdict {
        status: EvaluationStatus::NoQuery,
        valid: false,
        reason: reason.to_string(),
        continue_anyway: false,
        needs_retry: false,
        metrics: None,
    }
}

/// Charges one retry and decides whether the budget allows another plan.
fn failed(
    state: &mut FlowState,
    status: EvaluationStatus,
    reason: String,
    metrics: Option<VerdictMetrics>,
) -> Verdict {
    state.retry_count = (state.retry_count + 1).min(state.max_retries);
    state.error_log.push(reason.clone());
    let exhausted = state.retry_count >= state.max_retries;
    if exhausted {
        warn!(retry_count = state.retry_count, "Retry budget spent, continuing anyway");
    } else {
        info!(retry_count = state.retry_count, "Requesting a new plan");
    }
    Verdict {
        status,
        valid: false,
        reason,
        continue_anyway: exhausted,
        needs_retry: !exhausted,
        metrics,
    }
}

fn success(reason: String, metrics: VerdictMetrics) -> Verdict {
    Verdict {
        status: EvaluationStatus::Success,
        valid: true,
        reason,
        continue_anyway: false,
        needs_retry: false,
        metrics: Some(metrics),
    }
}

fn evaluate_multi(state: &mut FlowState) -> Verdict {
    if state.sql_statements.is_empty() {
        return no_query("No statements were planned");
    }
    let Some(summary) = state.multi_summary.clone() else {
        return no_query("Planned statements were not executed");
    };
    let ratio = summary.success_ratio();
    let metrics = VerdictMetrics {
        total_rows_found: summary.total_rows_found,
        total_rows_returned: summary.total_rows_returned,
        truncated: state.execution_results.iter().any(|r| r.outcome.truncated),
        success_ratio: Some(ratio),
    };
    if ratio < MIN_SUCCESS_RATIO {
        let failures = state
            .execution_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "Query {}: {}",
                    r.index,
                    r.outcome.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        let reason = format!(
            "Only {} of {} statements succeeded: {failures}",
            summary.successful_queries, summary.total_queries
        );
        return failed(
            state,
            EvaluationStatus::PartialMultiFailure,
            reason,
            Some(metrics),
        );
    }
    success(
        format!(
            "{} of {} statements succeeded, {} rows found, {} returned",
            summary.successful_queries,
            summary.total_queries,
            summary.total_rows_found,
            summary.total_rows_returned
        ),
        metrics,
    )
}

fn evaluate_single(state: &mut FlowState) -> Verdict {
    let statement = state.sql_statement.clone().unwrap_or_default();
    match StatementKind::of(&statement) {
        StatementKind::Empty => return no_query("No statement was planned"),
        StatementKind::Error => return no_query(&statement),
        StatementKind::NoSqlNeeded => {
            return success(
                "The request does not need database access".to_string(),
                VerdictMetrics::default(),
            )
        }
        StatementKind::Sql => {}
    }

    let Some(outcome) = state.execution_result.clone() else {
        return no_query("The planned statement was not executed");
    };
    let metrics = VerdictMetrics {
        total_rows_found: outcome.total_row_count,
        total_rows_returned: outcome.returned_row_count,
        truncated: outcome.truncated,
        success_ratio: None,
    };
    if let Some(err) = outcome.error {
        let reason = format!("{err} (statement: {statement})");
        return failed(state, EvaluationStatus::ExecutionError, reason, Some(metrics));
    }
    success(
        format!(
            "Statement succeeded, {} rows found, {} returned",
            outcome.total_row_count, outcome.returned_row_count
        ),
        metrics,
    )
}

/// Judges the latest execution and sets the retry directive for the transition table.
#[instrument(name = "result_evaluator", skip_all, fields(retry_count = state.retry_count))]
pub fn evaluate(state: &mut FlowState) {
    let verdict = if state.requires_multiple_queries {
        evaluate_multi(state)
    } else {
        evaluate_single(state)
    };
    info!(status = ?verdict.status, valid = verdict.valid, "Evaluation complete");
    state.needs_retry = verdict.needs_retry;
    state.evaluation_verdict = Some(verdict);
}
