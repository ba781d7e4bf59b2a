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

//! Prompt builders for every node that talks to the text-generation service.
//!
//! Each prompt opens with a `### Task: <tag>` header naming the node's contract, so a
//! completion can always be traced back to the step that asked for it.

use super::state::{MultiQuerySummary, QueryOutcome, StatementOutcome, TableProfile};
use crate::schema::SchemaCatalog;
use crate::store::Row;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const TASK_INTENT: &str = "intent_analysis";
pub const TASK_AMBIGUITY: &str = "ambiguity_check";
pub const TASK_COMPLEXITY: &str = "complexity_classification";
pub const TASK_SINGLE_SQL: &str = "single_sql";
pub const TASK_MULTI_SQL: &str = "multi_sql";
pub const TASK_INSIGHT_NO_SQL: &str = "insight_no_sql";
pub const TASK_INSIGHT_MULTI: &str = "insight_multi";
pub const TASK_INSIGHT_SINGLE: &str = "insight_single";

const PREVIEW_ROWS: usize = 3;

/// What every prompt knows about the request.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub request: &'a str,
    pub intent: Option<&'a str>,
    pub schema: &'a SchemaCatalog,
    pub agent_prompt: Option<&'a str>,
    pub validated_tables: &'a BTreeMap<String, TableProfile>,
    pub table_samples: &'a BTreeMap<String, Vec<Row>>,
}

/// Failure history handed to the planner on a retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    pub attempt: u32,
    pub error_log: &'a [String],
    pub previous_statement: Option<&'a str>,
}

fn header(task: &str, ctx: &PromptContext<'_>) -> String {
    let mut out = format!("### Task: {task}\n");
    if let Some(profile) = ctx.agent_prompt {
        let _ = writeln!(out, "\n### Analyst profile\n{}", profile.trim());
    }
    out
}

fn intent_line<'a>(ctx: &PromptContext<'a>) -> &'a str {
    ctx.intent.unwrap_or("(none)")
}

pub fn intent(ctx: &PromptContext<'_>) -> String {
    let mut out = header(TASK_INTENT, ctx);
    let _ = write!(
        out,
        "\nYou coordinate a team of data agents. Analyse the user's request and:\n\
         1. Identify the main intent (data lookup, analysis, report, ...)\n\
         2. Extract the key entities (tables, columns, conditions)\n\
         3. Decide what kind of SQL analysis is required\n\
         4. Give structured context for the specialised agents\n\n\
         ### Available data\n{}\n\
         ### User request\n{}\n\n\
         Reply with a clear, structured analysis of the request.",
        ctx.schema.describe(),
        ctx.request
    );
    out
}

pub fn ambiguity(ctx: &PromptContext<'_>) -> String {
    let mut out = format!("### Task: {TASK_AMBIGUITY}\n");
    let _ = write!(
        out,
        "\nDecide whether the request is ambiguous or asks for data that does not exist.\n\n\
         User request: {}\nPrevious analysis: {}\n\n\
         ### Available data\n{}\n\
         Reply with EXACTLY one of:\n\
         CLEAR\n\
         AMBIGUOUS: <one specific clarifying question>\n\
         INSUFFICIENT_DATA: <which data is missing>\n\n\
         Examples:\n\
         - \"Show employees\" -> AMBIGUOUS: All employees, or those of a specific department?\n\
         - \"Best performing employees\" -> INSUFFICIENT_DATA: There is no performance data, only salary, position and department.\n\
         - \"List employees in the sales department\" -> CLEAR",
        ctx.request,
        intent_line(ctx),
        ctx.schema.describe()
    );
    out
}

pub fn complexity(ctx: &PromptContext<'_>) -> String {
    let mut out = format!("### Task: {TASK_COMPLEXITY}\n");
    let _ = write!(
        out,
        "\nDoes this request need more than one SQL query to be answered completely?\n\n\
         Request: {}\nPrevious analysis: {}\n\n\
         ### Available data\n{}\n\
         Reply ONLY with:\n\
         - SINGLE: one query is enough\n\
         - MULTIPLE: several queries are needed for a complete analysis\n\n\
         MULTIPLE fits comparisons across groups, statistics combined with listings,\n\
         aggregates together with detail rows, and temporal analyses from several angles.",
        ctx.request,
        intent_line(ctx),
        ctx.schema.describe()
    );
    out
}

fn retry_section(out: &mut String, retry: Option<&RetryContext<'_>>) {
    let Some(retry) = retry else { return };
    let _ = writeln!(
        out,
        "\n### Previous attempts failed (retry {})",
        retry.attempt
    );
    for (i, err) in retry.error_log.iter().enumerate() {
        let _ = writeln!(out, "{}. {err}", i + 1);
    }
    if let Some(prev) = retry.previous_statement {
        let _ = writeln!(out, "Failed statement: {prev}");
    }
    out.push_str("Correct the problem instead of repeating the failed SQL.\n");
}

fn planning_context(out: &mut String, ctx: &PromptContext<'_>) {
    let _ = write!(
        out,
        "\nRequest: {}\nPrevious analysis: {}\n\n### Available data\n{}",
        ctx.request,
        intent_line(ctx),
        ctx.schema.describe()
    );
    if !ctx.validated_tables.is_empty() {
        let _ = write!(
            out,
            "\n### Table profiles\n{}",
            validation_context(ctx.validated_tables)
        );
    }
    if ctx.table_samples.values().any(|rows| !rows.is_empty()) {
        let _ = write!(
            out,
            "\n### Sample rows\n{}",
            sample_context(ctx.table_samples)
        );
    }
}

pub fn single_sql(ctx: &PromptContext<'_>, retry: Option<&RetryContext<'_>>) -> String {
    let mut out = header(TASK_SINGLE_SQL, ctx);
    out.push_str("\nWrite one PostgreSQL query that answers the request.\n");
    planning_context(&mut out, ctx);
    retry_section(&mut out, retry);
    out.push_str(
        "\nRules:\n\
         - SELECT statements only\n\
         - No markdown, no code fences, no comments, no explanations\n\
         - Reply ONLY with the SQL\n\
         - If the request needs no database access, reply: NO_SQL_NEEDED",
    );
    out
}

pub fn multi_sql(ctx: &PromptContext<'_>, retry: Option<&RetryContext<'_>>) -> String {
    let mut out = header(TASK_MULTI_SQL, ctx);
    out.push_str(
        "\nWrite 2 to 4 PostgreSQL queries that together cover the request:\n\
         aggregates or statistics, specific listings, comparisons or rankings, and a\n\
         temporal view where it applies.\n",
    );
    planning_context(&mut out, ctx);
    retry_section(&mut out, retry);
    out.push_str(
        "\nFormat, one query per line:\n\
         QUERY_1: <sql>\n\
         QUERY_2: <sql>\n\n\
         Rules:\n\
         - SELECT statements only\n\
         - No markdown or code fences\n\
         - Use only as many queries as the analysis needs\n\n\
         Example:\n\
         QUERY_1: SELECT department, AVG(salary) AS avg_salary FROM employees GROUP BY department\n\
         QUERY_2: SELECT * FROM employees WHERE salary > 50000 ORDER BY salary DESC",
    );
    out
}

pub fn insight_no_sql(ctx: &PromptContext<'_>) -> String {
    let mut out = header(TASK_INSIGHT_NO_SQL, ctx);
    let _ = write!(
        out,
        "\nThe request does not need database access.\n\
         Original request: {}\nPrevious analysis: {}\n",
        ctx.request,
        intent_line(ctx)
    );
    append_profiles(&mut out, ctx);
    out.push_str("\nGive the user a direct, useful answer.");
    out
}

pub fn insight_multi(
    ctx: &PromptContext<'_>,
    results: &[StatementOutcome],
    summary: Option<&MultiQuerySummary>,
) -> String {
    let mut out = header(TASK_INSIGHT_MULTI, ctx);
    let _ = write!(
        out,
        "\nAnalyse the results of several SQL queries and write one integrated analysis.\n\n\
         Original request: {}\nQueries executed: {}\n",
        ctx.request,
        results.len()
    );
    if let Some(summary) = summary {
        let _ = writeln!(out, "Overview: {}", summary.summary);
    }
    let _ = write!(out, "\n### Results\n{}", format_multi_results(results));
    append_profiles(&mut out, ctx);
    out.push_str(
        "\nProvide an executive summary, the integrated analysis, key insights and patterns,\n\
         a direct answer to the original question, and recommendations.",
    );
    out
}

pub fn insight_single(ctx: &PromptContext<'_>, outcome: Option<&QueryOutcome>) -> String {
    let mut out = header(TASK_INSIGHT_SINGLE, ctx);
    let _ = write!(
        out,
        "\nAnalyse the result of the SQL query and produce useful insights.\n\n\
         Original request: {}\n",
        ctx.request
    );
    match outcome {
        Some(outcome) => {
            let _ = writeln!(out, "SQL executed: {}", outcome.statement);
            if let Some(err) = &outcome.error {
                let _ = writeln!(out, "Execution error: {err}");
            } else {
                let _ = writeln!(
                    out,
                    "Rows found: {}, rows shown: {}",
                    outcome.total_row_count, outcome.returned_row_count
                );
                if outcome.truncated {
                    out.push_str("Only a capped subset of the rows is shown.\n");
                }
                let _ = writeln!(out, "Results: {}", render_rows(&outcome.rows));
            }
        }
        None => out.push_str("No query was executed.\n"),
    }
    append_profiles(&mut out, ctx);
    out.push_str(
        "\nProvide a clear summary of the results, relevant patterns, a direct answer to the\n\
         user's question, and recommendations if they apply.",
    );
    out
}

fn append_profiles(out: &mut String, ctx: &PromptContext<'_>) {
    if !ctx.validated_tables.is_empty() {
        let _ = write!(
            out,
            "\n### Table profiles\n{}",
            validation_context(ctx.validated_tables)
        );
    }
}

fn render_rows(rows: &[Row]) -> String {
    serde_json::to_string(rows).unwrap_or_default()
}

/// Renders multi-statement outcomes for the synthesis prompt.
pub fn format_multi_results(results: &[StatementOutcome]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(out, "Query {}: {}", result.index, result.outcome.statement);
        if !result.success {
            let _ = writeln!(
                out,
                "Status: failed ({})\n",
                result.outcome.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }
        let outcome = &result.outcome;
        let _ = writeln!(
            out,
            "Status: success, {} rows found, {} returned",
            outcome.total_row_count, outcome.returned_row_count
        );
        if outcome.truncated {
            let _ = writeln!(
                out,
                "Note: results truncated to {} rows",
                outcome.returned_row_count
            );
        }
        if outcome.rows.len() <= PREVIEW_ROWS {
            let _ = writeln!(out, "Rows: {}", render_rows(&outcome.rows));
        } else {
            let _ = writeln!(
                out,
                "First {PREVIEW_ROWS} rows: {}",
                render_rows(&outcome.rows[..PREVIEW_ROWS])
            );
        }
        out.push('\n');
    }
    out
}

/// One line per profiled table, with numeric column statistics indented below it.
pub fn validation_context(tables: &BTreeMap<String, TableProfile>) -> String {
    let mut out = String::new();
    for (name, profile) in tables {
        if !profile.exists {
            let _ = writeln!(
                out,
                "- {name}: unavailable ({})",
                profile.error.as_deref().unwrap_or("unknown error")
            );
            continue;
        }
        match profile.row_count {
            Some(count) => {
                let _ = writeln!(out, "- {name}: {count} rows");
            }
            None => {
                let _ = writeln!(out, "- {name}: row count unknown");
            }
        }
        for (column, stats) in &profile.columns {
            if let Some(err) = &stats.error {
                let _ = writeln!(out, "    {column}: statistics unavailable ({err})");
                continue;
            }
            let _ = writeln!(
                out,
                "    {column}: count={} nulls={} avg={} min={} max={}",
                fmt_opt(stats.count),
                fmt_opt(stats.null_count),
                fmt_opt(stats.avg.map(|v| (v * 100.0).round() / 100.0)),
                fmt_opt(stats.min),
                fmt_opt(stats.max)
            );
        }
    }
    out
}

/// First few sampled rows per table, so the planner sees real values and formats.
pub fn sample_context(samples: &BTreeMap<String, Vec<Row>>) -> String {
    let mut out = String::new();
    for (name, rows) in samples {
        if rows.is_empty() {
            continue;
        }
        let shown = &rows[..rows.len().min(PREVIEW_ROWS)];
        let _ = writeln!(out, "- {name}: {}", render_rows(shown));
    }
    out
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}
