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

mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::Args;
use quarry::{
    FlowConfig, HttpTextClient, Orchestrator, PgStore, RunInput, RunResult, TextGenerationClient,
};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "debug,reqwest=info,hyper=info,h2=info,hyper_util=info,rustls=info,sqlx=info",
            )
        })
    } else {
        EnvFilter::new("warn,quarry=info,talking_database_demo=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    info!("Starting Talking Database Demo");

    let mut config = match args.get_config_path() {
        Some(path) => {
            let path = path.to_string_lossy().to_string();
            FlowConfig::from_yaml_file(&path)
                .await
                .with_context(|| format!("loading flow config from {path}"))?
        }
        None => FlowConfig::default(),
    };
    if let Some(profile) = &args.profile_file {
        let text = tokio::fs::read_to_string(profile)
            .await
            .with_context(|| format!("reading analyst profile {}", profile.display()))?;
        config = config.with_agent_prompt(text);
    }

    let llm = HttpTextClient::from_env().context("configuring the text-generation client")?;
    info!(model = llm.model_name(), "Text-generation client ready");

    let database_url = args
        .get_database_url()
        .ok_or_else(|| anyhow!("DATABASE_URL is not set and --database-url was not given"))?;
    let store = PgStore::connect(&database_url, args.max_connections)
        .await
        .context("connecting to the database")?;
    info!("Database pool ready");

    let orchestrator = Orchestrator::new(Arc::new(llm), Arc::new(store), config);

    if let Some(query) = &args.query {
        let result = orchestrator.run(RunInput::from_raw(query)).await;
        print_result(&result, args.json)?;
        return Ok(());
    }

    println!("\nTalking Database Demo");
    println!("═══════════════════════════════════════════════════════════════");
    println!("Ask a question about the data in plain language.");
    println!("   Examples: \"Top 5 salaries in engineering\"");
    println!("             \"Compare average salary across departments\"");
    println!("             \"How many people were hired each year?\"");
    println!("Type 'exit' to quit.");
    println!("═══════════════════════════════════════════════════════════════");

    loop {
        print!("\nEnter your question: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        println!("{}", "─".repeat(80));
        let result = orchestrator.run(RunInput::from_raw(input)).await;
        print_result(&result, args.json)?;
        println!("{}", "─".repeat(80));
    }

    Ok(())
}

fn print_result(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    if let Some(error) = &result.error {
        println!("Run failed: {error}");
    }
    if result.is_ambiguous || result.insufficient_data {
        println!("{}", result.summary);
        return Ok(());
    }

    if let Some(sql) = &result.sql_statement {
        println!("SQL: {sql}");
    }
    for (i, sql) in result.sql_statements.iter().enumerate() {
        println!("SQL {}: {sql}", i + 1);
    }
    if let Some(outcome) = &result.execution_result {
        match &outcome.error {
            Some(err) => println!("Execution error: {err}"),
            None => println!(
                "Rows: {} found, {} shown{}",
                outcome.total_row_count,
                outcome.returned_row_count,
                if outcome.truncated { " (truncated)" } else { "" }
            ),
        }
    }
    if let Some(summary) = &result.multi_summary {
        println!("{}", summary.summary);
    }
    if result.retry_count > 0 {
        println!("Retries: {}", result.retry_count);
    }
    for err in &result.validation_errors {
        println!("Validation: {err}");
    }
    println!("\n{}", result.summary);
    println!("\n({} ms, path: {})", result.elapsed_ms, path(result));
    Ok(())
}

fn path(result: &RunResult) -> String {
    result
        .trace
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
