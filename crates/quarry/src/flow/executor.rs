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
use super::sanitize::{clean, StatementKind};
use super::state::{FlowState, MultiQuerySummary, QueryOutcome, StatementOutcome};
use super::step::StepContext;
use tracing::{debug, info, instrument, warn};

async fn run_capped(
    ctx: &StepContext<'_>,
    node: Node,
    statement: &str,
    cap: usize,
) -> QueryOutcome {
    match ctx.query(node, statement).await {
        Ok(rows) => QueryOutcome::from_rows(statement, rows, cap),
        Err(failure) => QueryOutcome::failed(statement, failure.message),
    }
}

#[instrument(name = "query_executor", skip_all)]
pub async fn execute(ctx: &StepContext<'_>, state: &mut FlowState) {
    let statement = state.sql_statement.clone().unwrap_or_default();
    let kind = StatementKind::of(&statement);
    if !kind.is_executable() {
        debug!(?kind, "Nothing to execute");
        state.execution_result = Some(QueryOutcome::empty(statement));
        return;
    }

    let cap = ctx.config.single_row_cap;
    let outcome = run_capped(ctx, Node::QueryExecutor, &statement, cap).await;
    match &outcome.error {
        Some(err) => warn!(error = %err, "Statement failed"),
        None => info!(
            total = outcome.total_row_count,
            returned = outcome.returned_row_count,
            truncated = outcome.truncated,
            "Statement executed"
        ),
    }
    state.execution_result = Some(outcome);
}

/// Runs every planned statement in order; one failing statement does not stop the rest.
#[instrument(
    name = "multi_query_executor",
    skip_all,
    fields(statements = state.sql_statements.len())
)]
pub async fn execute_all(ctx: &StepContext<'_>, state: &mut FlowState) {
    let cap = ctx.config.multi_row_cap;
    let mut results = Vec::with_capacity(state.sql_statements.len());
    for (i, raw) in state.sql_statements.iter().enumerate() {
        let index = i + 1;
        let statement = clean(raw);
        let outcome = if StatementKind::of(&statement).is_executable() {
            run_capped(ctx, Node::MultiQueryExecutor, &statement, cap).await
        } else {
            QueryOutcome::failed(statement, "Invalid or empty statement")
        };
        let success = !outcome.is_error();
        debug!(
            statement_index = index,
            success,
            rows = outcome.total_row_count,
            "Statement done"
        );
        results.push(StatementOutcome {
            index,
            success,
            outcome,
        });
    }

    let summary = MultiQuerySummary::from_outcomes(&results);
    info!(summary = %summary.summary, "Multi-statement execution complete");
    state.execution_results = results;
    state.multi_summary = Some(summary);
}
