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
use super::prompts;
use super::sanitize::StatementKind;
use super::state::FlowState;
use super::step::StepContext;
use crate::schema::SchemaCatalog;
use tracing::{info, instrument};

#[instrument(name = "insight_composer", skip_all)]
pub async fn compose(ctx: &StepContext<'_>, state: &mut FlowState) {
    let request = state.request_text();
    let prompt = {
        let pctx = ctx.prompt(state, &request);
        let no_sql = !state.requires_multiple_queries
            && state.sql_statement.as_deref().map(StatementKind::of)
                == Some(StatementKind::NoSqlNeeded);
        if no_sql {
            prompts::insight_no_sql(&pctx)
        } else if state.requires_multiple_queries && !state.execution_results.is_empty() {
            prompts::insight_multi(
                &pctx,
                &state.execution_results,
                state.multi_summary.as_ref(),
            )
        } else {
            prompts::insight_single(&pctx, state.execution_result.as_ref())
        }
    };

    let narrative = match ctx.generate(Node::InsightComposer, &prompt).await {
        Ok(text) => text,
        Err(failure) => format!("Error generating insights: {failure}"),
    };
    info!(len = narrative.len(), "Narrative composed");
    state.final_narrative = Some(narrative);
}

fn available_data(schema: &SchemaCatalog) -> String {
    if schema.is_empty() {
        "No table metadata is configured.".to_string()
    } else {
        schema.column_summary()
    }
}

pub fn clarification_text(state: &FlowState, schema: &SchemaCatalog) -> String {
    let request = state.request_text();
    let detail = state
        .clarification_text
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("The request could not be interpreted precisely.");
    let data = available_data(schema);

    if state.is_ambiguous {
        format!(
            "Your request needs more detail before it can be answered.\n\n\
             Original request: {request}\n\n\
             Clarification needed: {detail}\n\n\
             Available data:\n{data}\n\n\
             Please add the specific details so the exact query can be generated."
        )
    } else if state.insufficient_data {
        format!(
            "The request cannot be fully answered with the data that is available.\n\n\
             Original request: {request}\n\n\
             Limitation: {detail}\n\n\
             Available data:\n{data}\n\n\
             Requests that can be answered include:\n\
             - listing records filtered by one of the columns above\n\
             - statistics such as averages, totals, minimums and maximums\n\
             - comparisons between groups\n\
             - trends over date columns\n\n\
             Would you like to rephrase the question around this data?"
        )
    } else {
        format!(
            "More information is needed to process this request.\n\n\
             Original request: {request}\n\n\
             Please describe more specifically what you need."
        )
    }
}

/// Terminal node for ambiguous or unanswerable requests. No collaborator call.
#[instrument(name = "clarification_handler", skip_all)]
pub fn clarify(ctx: &StepContext<'_>, state: &mut FlowState) {
    let text = clarification_text(state, &ctx.config.schema);
    info!(
        ambiguous = state.is_ambiguous,
        insufficient = state.insufficient_data,
        "Clarification prepared"
    );
    state.final_narrative = Some(text);
}
