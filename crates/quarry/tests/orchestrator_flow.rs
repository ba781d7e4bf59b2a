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

mod common;

use common::*;
use quarry::flow::prompts::{
    TASK_AMBIGUITY, TASK_COMPLEXITY, TASK_INSIGHT_MULTI, TASK_INSIGHT_NO_SQL,
    TASK_INSIGHT_SINGLE, TASK_INTENT, TASK_MULTI_SQL, TASK_SINGLE_SQL,
};
use quarry::{
    EvaluationStatus, FlowConfig, Message, Node, RunInput, SchemaCatalog, TableSchema,
};
use serde_json::json;
use std::sync::Arc;

const TOP_SALARIES: &str = "SELECT name, salary FROM employees ORDER BY salary DESC";

fn employees_config() -> FlowConfig {
    FlowConfig::default().with_schema(employees_catalog())
}

fn count_of(trace: &[Node], node: Node) -> usize {
    trace.iter().filter(|n| **n == node).count()
}

#[tokio::test]
async fn test_single_query_is_capped_and_reports_true_total() {
    let client = Arc::new(ScriptedClient::clear_single(&format!(
        "```sql\n{TOP_SALARIES}\n```"
    )));
    let store = Arc::new(
        ScriptedStore::new()
            .rows("LIMIT 10", employee_rows(10))
            .rows("AS row_count", single_row("row_count", json!(420)))
            .rows("AVG(", stats_row())
            .rows("ORDER BY salary DESC", employee_rows(420)),
    );
    let result = orchestrator(&client, &store, employees_config())
        .run("Who are the best paid employees?")
        .await;

    assert!(result.error.is_none());
    assert_eq!(
        result.trace,
        vec![
            Node::Ingest,
            Node::IntentAnalyzer,
            Node::AmbiguityDetector,
            Node::TableValidator,
            Node::QueryPlanner,
            Node::QueryExecutor,
            Node::ResultEvaluator,
            Node::InsightComposer,
        ]
    );
    assert_eq!(result.sql_statement.as_deref(), Some(TOP_SALARIES));
    assert!(result.sql_statements.is_empty());

    let outcome = result.execution_result.unwrap();
    assert_eq!(outcome.total_row_count, 420);
    assert_eq!(outcome.returned_row_count, 300);
    assert_eq!(outcome.rows.len(), 300);
    assert!(outcome.truncated);

    let verdict = result.evaluation_verdict.unwrap();
    assert_eq!(verdict.status, EvaluationStatus::Success);
    assert!(verdict.valid);

    let profile = &result.validated_tables["employees"];
    assert!(profile.exists);
    assert_eq!(profile.row_count, Some(420));
    assert_eq!(
        profile.columns.keys().collect::<Vec<_>>(),
        vec!["id", "salary"]
    );
    assert_eq!(profile.columns["salary"].avg, Some(52000.5));

    assert_eq!(result.final_narrative.as_deref(), Some("Narrative"));
    assert_eq!(result.summary, "Narrative");
    let insight = &client.prompts_for(TASK_INSIGHT_SINGLE)[0];
    assert!(insight.contains("Rows found: 420, rows shown: 300"));
    assert!(insight.contains("- employees: 420 rows"));
}

#[tokio::test]
async fn test_ambiguous_request_ends_with_clarification() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES)
            .on(TASK_AMBIGUITY, "AMBIGUOUS: All employees or a single department?"),
    );
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, employees_config())
        .run("Show employees")
        .await;

    assert!(result.is_ambiguous);
    assert!(!result.insufficient_data);
    assert_eq!(result.trace.last(), Some(&Node::ClarificationHandler));
    assert!(result.sql_statement.is_none());
    assert!(result.execution_result.is_none());
    let narrative = result.final_narrative.unwrap();
    assert!(narrative.contains("All employees or a single department?"));
    assert!(narrative.contains("- employees: id, name, department, salary, hire_date"));
    assert!(store.executed().is_empty());
    assert_eq!(client.prompts().len(), 2);
}

#[tokio::test]
async fn test_insufficient_data_explains_what_is_available() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES)
            .on(TASK_AMBIGUITY, "INSUFFICIENT_DATA: There are no performance ratings."),
    );
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, employees_config())
        .run("Which employees perform best?")
        .await;

    assert!(result.insufficient_data);
    assert_eq!(
        result.clarification_text.as_deref(),
        Some("There are no performance ratings.")
    );
    assert_eq!(result.trace.last(), Some(&Node::ClarificationHandler));
    assert!(result
        .summary
        .contains("Limitation: There are no performance ratings."));
}

#[tokio::test]
async fn test_multi_plan_with_one_failure_proceeds_at_half_success() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES)
            .on(TASK_COMPLEXITY, "MULTIPLE")
            .on(
                TASK_MULTI_SQL,
                "QUERY_1: SELECT missing_col FROM employees\n\
                 QUERY_2: SELECT department, AVG(salary) FROM employees GROUP BY department",
            ),
    );
    let store = Arc::new(
        ScriptedStore::new()
            .fail("missing_col", "column \"missing_col\" does not exist")
            .rows("GROUP BY department", employee_rows(70)),
    );
    let config = FlowConfig::default();
    let result = orchestrator(&client, &store, config).run("Compare departments").await;

    assert!(result.requires_multiple_queries);
    assert!(result.sql_statement.is_none());
    assert_eq!(result.sql_statements.len(), 2);
    let flags: Vec<bool> = result.execution_results.iter().map(|r| r.success).collect();
    assert_eq!(flags, vec![false, true]);
    assert_eq!(
        result.execution_results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let summary = result.multi_summary.unwrap();
    assert_eq!(summary.total_queries, 2);
    assert_eq!(summary.successful_queries, 1);
    assert_eq!(summary.total_rows_found, 70);
    assert_eq!(summary.total_rows_returned, 50);
    let returned: usize = result
        .execution_results
        .iter()
        .map(|r| r.outcome.returned_row_count)
        .sum();
    assert_eq!(returned, summary.total_rows_returned);

    assert_eq!(
        result.evaluation_verdict.unwrap().status,
        EvaluationStatus::Success
    );
    assert_eq!(result.retry_count, 0);
    assert_eq!(count_of(&result.trace, Node::QueryPlanner), 1);
    assert_eq!(result.trace.last(), Some(&Node::InsightComposer));

    let insight = &client.prompts_for(TASK_INSIGHT_MULTI)[0];
    assert!(insight.contains(
        "Status: failed (Query failed: column \"missing_col\" does not exist)"
    ));
    assert!(insight.contains("Note: results truncated to 50 rows"));
}

#[tokio::test]
async fn test_multi_plan_below_half_success_retries_until_budget_spent() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES)
            .on(TASK_COMPLEXITY, "MULTIPLE")
            .on(
                TASK_MULTI_SQL,
                "QUERY_1: SELECT a FROM nowhere\nQUERY_2: SELECT b FROM nowhere\nQUERY_3: SELECT 1",
            ),
    );
    let store = Arc::new(ScriptedStore::new().fail("nowhere", "relation \"nowhere\" does not exist"));
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Full department analysis")
        .await;

    assert_eq!(count_of(&result.trace, Node::QueryPlanner), 2);
    assert_eq!(count_of(&result.trace, Node::MultiQueryExecutor), 2);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.error_log.len(), 2);
    let verdict = result.evaluation_verdict.unwrap();
    assert_eq!(verdict.status, EvaluationStatus::PartialMultiFailure);
    assert!(verdict.continue_anyway);
    assert!(!verdict.needs_retry);
    assert_eq!(result.trace.last(), Some(&Node::InsightComposer));

    let second_plan = &client.prompts_for(TASK_MULTI_SQL)[1];
    assert!(second_plan.contains("Only 1 of 3 statements succeeded"));
}

#[tokio::test]
async fn test_persistent_single_failure_stops_after_budget() {
    let client = Arc::new(ScriptedClient::clear_single("SELECT bogus FROM employees"));
    let store = Arc::new(ScriptedStore::new().fail("bogus", "column \"bogus\" does not exist"));
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Average bonus")
        .await;

    assert_eq!(count_of(&result.trace, Node::QueryPlanner), 2);
    assert_eq!(count_of(&result.trace, Node::QueryExecutor), 2);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.error_log.len(), 2);
    let verdict = result.evaluation_verdict.unwrap();
    assert_eq!(verdict.status, EvaluationStatus::ExecutionError);
    assert!(verdict.continue_anyway && !verdict.valid);
    assert_eq!(result.trace.last(), Some(&Node::InsightComposer));
    assert_eq!(
        store.executed().iter().filter(|s| s.contains("bogus")).count(),
        2
    );

    let plans = client.prompts_for(TASK_SINGLE_SQL);
    assert_eq!(plans.len(), 2);
    assert!(!plans[0].contains("Previous attempts failed"));
    assert!(plans[1].contains("Previous attempts failed (retry 1)"));
    assert!(plans[1].contains("1. Query failed: column \"bogus\" does not exist"));
    assert!(plans[1].contains("Failed statement: SELECT bogus FROM employees"));
}

#[tokio::test]
async fn test_retry_recovers_after_one_failure() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES).queue(
            TASK_SINGLE_SQL,
            &[
                "SELECT bogus FROM employees",
                "SELECT name FROM employees WHERE salary > 100000",
            ],
        ),
    );
    let store = Arc::new(
        ScriptedStore::new()
            .fail("bogus", "column \"bogus\" does not exist")
            .rows("WHERE salary > 100000", employee_rows(2)),
    );
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Who earns more than 100k?")
        .await;

    assert_eq!(result.retry_count, 1);
    assert_eq!(result.error_log.len(), 1);
    assert_eq!(
        result.sql_statement.as_deref(),
        Some("SELECT name FROM employees WHERE salary > 100000")
    );
    let verdict = result.evaluation_verdict.unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.status, EvaluationStatus::Success);
    assert_eq!(result.execution_result.unwrap().total_row_count, 2);
    assert_eq!(count_of(&result.trace, Node::QueryPlanner), 2);
}

#[tokio::test]
async fn test_unparseable_multi_plan_falls_back_to_single() {
    let client = Arc::new(
        ScriptedClient::clear_single("SELECT COUNT(*) FROM employees")
            .on(TASK_COMPLEXITY, "MULTIPLE")
            .on(TASK_MULTI_SQL, "I would rather describe the queries in prose."),
    );
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("How many employees?")
        .await;

    assert!(!result.requires_multiple_queries);
    assert!(result.sql_statements.is_empty());
    assert_eq!(
        result.sql_statement.as_deref(),
        Some("SELECT COUNT(*) FROM employees")
    );
    assert_eq!(count_of(&result.trace, Node::QueryExecutor), 1);
    assert_eq!(count_of(&result.trace, Node::MultiQueryExecutor), 0);
    assert_eq!(client.prompts_for(TASK_SINGLE_SQL).len(), 1);
}

#[tokio::test]
async fn test_no_sql_needed_skips_execution_and_answers_directly() {
    let client = Arc::new(ScriptedClient::clear_single("no_sql_needed"));
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("What can you help me with?")
        .await;

    assert_eq!(result.sql_statement.as_deref(), Some("NO_SQL_NEEDED"));
    let outcome = result.execution_result.unwrap();
    assert_eq!(outcome.total_row_count, 0);
    assert!(outcome.error.is_none());
    assert_eq!(
        result.evaluation_verdict.unwrap().status,
        EvaluationStatus::Success
    );
    assert!(store.executed().is_empty());
    assert_eq!(client.prompts_for(TASK_INSIGHT_NO_SQL).len(), 1);
    assert!(client.prompts_for(TASK_INSIGHT_SINGLE).is_empty());
}

#[tokio::test]
async fn test_planner_failure_goes_straight_to_composer() {
    let client = Arc::new(
        ScriptedClient::clear_single(TOP_SALARIES).fail(TASK_COMPLEXITY, "model overloaded"),
    );
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Top salaries")
        .await;

    assert_eq!(
        result.sql_statement.as_deref(),
        Some("ERROR: Provider error: model overloaded")
    );
    let verdict = result.evaluation_verdict.unwrap();
    assert_eq!(verdict.status, EvaluationStatus::NoQuery);
    assert!(!verdict.valid && !verdict.needs_retry && !verdict.continue_anyway);
    assert_eq!(result.retry_count, 0);
    assert!(result.error_log.is_empty());
    assert_eq!(count_of(&result.trace, Node::QueryPlanner), 1);
    assert_eq!(
        &result.trace[result.trace.len() - 2..],
        &[Node::ResultEvaluator, Node::InsightComposer]
    );
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_missing_table_is_recorded_and_planning_continues() {
    let catalog = SchemaCatalog::new(vec![
        employees_table(),
        TableSchema::new("departments", vec![quarry::ColumnDef::new("budget", "numeric")]),
        TableSchema::new("ghosts", vec![quarry::ColumnDef::new("haunts", "integer")]),
    ]);
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(
        ScriptedStore::new()
            .fail("FROM ghosts", "relation \"ghosts\" does not exist")
            .rows("AS row_count", single_row("row_count", json!(12))),
    );
    let result = orchestrator(&client, &store, FlowConfig::default().with_schema(catalog))
        .run("Compare employees, departments and ghosts")
        .await;

    assert_eq!(result.validated_tables.len(), 3);
    assert!(result.validated_tables["employees"].exists);
    assert!(result.validated_tables["departments"].exists);
    assert_eq!(result.validated_tables["departments"].row_count, Some(12));
    let ghosts = &result.validated_tables["ghosts"];
    assert!(!ghosts.exists);
    assert!(ghosts.error.as_deref().unwrap().contains("does not exist"));
    assert_eq!(result.validation_errors.len(), 1);
    assert!(result.validation_errors[0].starts_with("Table 'ghosts':"));
    assert!(result.trace.contains(&Node::QueryPlanner));
}

#[tokio::test]
async fn test_table_samples_reach_planner_and_result() {
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(
        ScriptedStore::new()
            .rows("LIMIT 10", single_row("name", json!("Ada Lovelace")))
            .rows("AS row_count", single_row("row_count", json!(1))),
    );
    let result = orchestrator(&client, &store, employees_config())
        .run("Who earns the most?")
        .await;

    assert_eq!(result.table_samples["employees"].len(), 1);
    assert_eq!(result.table_samples["employees"][0]["name"], json!("Ada Lovelace"));
    let planning = &client.prompts_for(TASK_SINGLE_SQL)[0];
    assert!(planning.contains("### Sample rows"));
    assert!(planning.contains(r#"- employees: [{"name":"Ada Lovelace"}]"#));
}

#[tokio::test]
async fn test_failing_collaborator_never_aborts_the_run() {
    let client = Arc::new(ScriptedClient::new());
    let store = Arc::new(ScriptedStore::new());
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Anything at all")
        .await;

    assert!(result.error.is_none());
    assert!(result
        .intent_analysis
        .as_deref()
        .unwrap()
        .starts_with("Error in analysis:"));
    assert!(!result.is_ambiguous && !result.insufficient_data);
    assert!(result.sql_statement.as_deref().unwrap().starts_with("ERROR:"));
    assert_eq!(
        result.evaluation_verdict.unwrap().status,
        EvaluationStatus::NoQuery
    );
    assert!(result.summary.starts_with("Error generating insights:"));
    assert_eq!(result.trace.last(), Some(&Node::InsightComposer));
}

#[tokio::test]
async fn test_step_limit_produces_error_result() {
    let client = Arc::new(ScriptedClient::clear_single("SELECT bogus FROM employees"));
    let store = Arc::new(ScriptedStore::new().fail("bogus", "nope"));
    let config = FlowConfig {
        recursion_limit: 6,
        ..FlowConfig::default()
    };
    let result = orchestrator(&client, &store, config).run("Average bonus").await;

    assert_eq!(result.trace.len(), 6);
    assert_eq!(
        result.error.as_deref(),
        Some("Error processing request: Recursion limit of 6 steps reached without reaching END")
    );
    assert!(result.summary.starts_with("Error: "));
    assert!(result.intent_analysis.is_some());
}

#[tokio::test]
async fn test_panicking_store_is_converted_into_error_result() {
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(ScriptedStore::new().panic_on("ORDER BY", "driver crashed"));
    let result = orchestrator(&client, &store, FlowConfig::default())
        .run("Top salaries")
        .await;

    let error = result.error.unwrap();
    assert!(error.contains("Node query_executor panicked: driver crashed"));
    assert!(result.summary.starts_with("Error: Node query_executor panicked"));
    assert_eq!(result.trace.last(), Some(&Node::QueryPlanner));
    assert_eq!(result.sql_statement.as_deref(), Some(TOP_SALARIES));
}

#[tokio::test]
async fn test_orchestrator_reuse_keeps_runs_independent() {
    let client = Arc::new(ScriptedClient::clear_single("SELECT bogus FROM employees"));
    let store = Arc::new(ScriptedStore::new().fail("bogus", "nope"));
    let orchestrator = orchestrator(&client, &store, FlowConfig::default());

    let first = orchestrator.run("first request").await;
    let second = orchestrator.run("second request").await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.retry_count, 2);
    assert_eq!(second.retry_count, 2);
    assert_eq!(second.error_log.len(), 2);
    let intents = client.prompts_for(TASK_INTENT);
    assert!(intents[1].contains("second request"));
    assert!(!intents[1].contains("first request"));
}

#[tokio::test]
async fn test_input_shapes_become_one_request_text() {
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(ScriptedStore::new());
    let orchestrator = orchestrator(&client, &store, FlowConfig::default());

    orchestrator
        .run(RunInput::from_raw(
            r#"[{"role":"user","content":"top salaries"},{"role":"user","content":"in sales"}]"#,
        ))
        .await;
    orchestrator
        .run(vec!["list".to_string(), "departments".to_string()])
        .await;
    orchestrator
        .run(vec![Message::user("hire dates by year")])
        .await;
    orchestrator.run(RunInput::from_raw("plain [text] request")).await;

    let intents = client.prompts_for(TASK_INTENT);
    assert!(intents[0].contains("### User request\ntop salaries in sales"));
    assert!(!intents[0].contains("\"role\""));
    assert!(intents[1].contains("### User request\nlist departments"));
    assert!(intents[2].contains("### User request\nhire dates by year"));
    assert!(intents[3].contains("### User request\nplain [text] request"));
}

#[tokio::test]
async fn test_analyst_profile_reaches_intent_and_planning_prompts() {
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(ScriptedStore::new());
    let config = FlowConfig::default().with_agent_prompt("You rank metrics by business impact.");
    orchestrator(&client, &store, config).run("Top salaries").await;

    let profile = "### Analyst profile\nYou rank metrics by business impact.";
    assert!(client.prompts_for(TASK_INTENT)[0].contains(profile));
    assert!(client.prompts_for(TASK_SINGLE_SQL)[0].contains(profile));
}

#[test]
fn test_result_serialises_for_the_tool_layer() {
    let client = Arc::new(ScriptedClient::clear_single(TOP_SALARIES));
    let store = Arc::new(ScriptedStore::new().rows("ORDER BY", employee_rows(2)));
    let result = tokio_test::block_on(
        orchestrator(&client, &store, FlowConfig::default()).run("Top salaries"),
    );

    let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(value["summary"], "Narrative");
    assert_eq!(value["execution_result"]["total_row_count"], 2);
    assert_eq!(value["execution_result"]["rows"][0]["salary"], 30000.0);
    assert_eq!(value["evaluation_verdict"]["status"], "success");
    assert_eq!(value["trace"][0], "Ingest");
    assert!(value.get("error").is_none());
}
