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
use super::prompts::{self, RetryContext};
use super::sanitize::{clean, error_sentinel, is_no_sql, parse_multi, NO_SQL_NEEDED};
use super::state::FlowState;
use super::step::StepContext;
use tracing::{debug, info, instrument, warn};

pub const MAX_STATEMENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Multiple,
}

pub fn parse_strategy(response: &str) -> Strategy {
    if response.trim_start().to_uppercase().starts_with("MULTIPLE") {
        Strategy::Multiple
    } else {
        Strategy::Single
    }
}

/// History carried from a failed attempt into the next planning prompt.
struct Attempt {
    number: u32,
    error_log: Vec<String>,
    previous_statement: Option<String>,
}

impl Attempt {
    fn context(&self, with_statement: bool) -> RetryContext<'_> {
        RetryContext {
            attempt: self.number,
            error_log: &self.error_log,
            previous_statement: if with_statement {
                self.previous_statement.as_deref()
            } else {
                None
            },
        }
    }
}

#[instrument(name = "query_planner", skip_all, fields(retry_count = state.retry_count))]
pub async fn plan(ctx: &StepContext<'_>, state: &mut FlowState) {
    let attempt = (state.retry_count > 0).then(|| Attempt {
        number: state.retry_count,
        error_log: state.error_log.clone(),
        previous_statement: state.sql_statement.clone(),
    });
    state.clear_plan();

    let request = state.request_text();
    let classify = prompts::complexity(&ctx.prompt(state, &request));
    let strategy = match ctx.generate(Node::QueryPlanner, &classify).await {
        Ok(response) => parse_strategy(&response),
        Err(failure) => {
            state.sql_statement = Some(error_sentinel(&failure));
            return;
        }
    };
    debug!(?strategy, "Planning strategy chosen");

    if strategy == Strategy::Multiple {
        let retry = attempt.as_ref().map(|a| a.context(false));
        let prompt = prompts::multi_sql(&ctx.prompt(state, &request), retry.as_ref());
        match ctx.generate(Node::QueryPlanner, &prompt).await {
            Ok(response) => {
                let mut statements = parse_multi(&response);
                if statements.len() > MAX_STATEMENTS {
                    warn!(
                        produced = statements.len(),
                        kept = MAX_STATEMENTS,
                        "Too many statements, keeping the first ones"
                    );
                    statements.truncate(MAX_STATEMENTS);
                }
                if !statements.is_empty() {
                    info!(statements = statements.len(), "Multi-statement plan ready");
                    state.requires_multiple_queries = true;
                    state.sql_statements = statements;
                    return;
                }
                warn!("No usable statements in multi plan, falling back to a single query");
            }
            Err(failure) => {
                state.sql_statement = Some(error_sentinel(&failure));
                return;
            }
        }
    }

    let retry = attempt.as_ref().map(|a| a.context(true));
    let prompt = prompts::single_sql(&ctx.prompt(state, &request), retry.as_ref());
    let statement = match ctx.generate(Node::QueryPlanner, &prompt).await {
        Ok(response) => {
            let cleaned = clean(&response);
            if is_no_sql(&cleaned) {
                NO_SQL_NEEDED.to_string()
            } else {
                cleaned
            }
        }
        Err(failure) => error_sentinel(&failure),
    };
    info!(statement = %statement, "Single statement plan ready");
    state.sql_statement = Some(statement);
}
