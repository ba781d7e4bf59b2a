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

#![allow(dead_code)]

use async_trait::async_trait;
use quarry::flow::prompts::{
    TASK_AMBIGUITY, TASK_COMPLEXITY, TASK_INSIGHT_MULTI, TASK_INSIGHT_NO_SQL,
    TASK_INSIGHT_SINGLE, TASK_INTENT, TASK_SINGLE_SQL,
};
use quarry::{
    ColumnDef, FlowConfig, LLMError, Orchestrator, Row, SchemaCatalog, StoreError, TableSchema,
    TabularStore, TextGenerationClient,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub enum Reply {
    Text(String),
    Fail(String),
}

/// Text-generation stand-in keyed on the `### Task:` header of each prompt.
/// Queued replies are consumed first, then the task's fixed reply applies.
#[derive(Default)]
pub struct ScriptedClient {
    fixed: HashMap<String, Reply>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    prompts: Mutex<Vec<String>>,
}

pub fn task_of(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("### Task: "))
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies that take the request down the plain single-statement path.
    pub fn clear_single(sql: &str) -> Self {
        Self::new()
            .on(TASK_INTENT, "The user wants employee salary information.")
            .on(TASK_AMBIGUITY, "CLEAR")
            .on(TASK_COMPLEXITY, "SINGLE")
            .on(TASK_SINGLE_SQL, sql)
            .on(TASK_INSIGHT_SINGLE, "Narrative")
            .on(TASK_INSIGHT_MULTI, "Narrative")
            .on(TASK_INSIGHT_NO_SQL, "Narrative")
    }

    pub fn on(mut self, task: &str, reply: &str) -> Self {
        self.fixed
            .insert(task.to_string(), Reply::Text(reply.to_string()));
        self
    }

    pub fn fail(mut self, task: &str, message: &str) -> Self {
        self.fixed
            .insert(task.to_string(), Reply::Fail(message.to_string()));
        self
    }

    pub fn queue(self, task: &str, replies: &[&str]) -> Self {
        self.queued.lock().unwrap().insert(
            task.to_string(),
            replies.iter().map(|r| Reply::Text(r.to_string())).collect(),
        );
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompts_for(&self, task: &str) -> Vec<String> {
        self.prompts()
            .into_iter()
            .filter(|p| task_of(p) == task)
            .collect()
    }
}

#[async_trait]
impl TextGenerationClient for ScriptedClient {
    async fn invoke(&self, prompt: &str) -> Result<String, LLMError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let task = task_of(prompt);
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&task)
            .and_then(VecDeque::pop_front);
        match queued.or_else(|| self.fixed.get(&task).cloned()) {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(LLMError::Provider(message)),
            None => Err(LLMError::Provider(format!("no script for task {task}"))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[derive(Clone, Debug)]
enum Outcome {
    Rows(Vec<Row>),
    Fail(String),
    Panic(String),
}

/// Store stand-in: the first rule whose pattern occurs in the SQL decides the
/// outcome. Unmatched statements return no rows.
#[derive(Default)]
pub struct ScriptedStore {
    rules: Vec<(String, Outcome)>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.rules.push((pattern.to_string(), Outcome::Rows(rows)));
        self
    }

    pub fn fail(mut self, pattern: &str, message: &str) -> Self {
        self.rules
            .push((pattern.to_string(), Outcome::Fail(message.to_string())));
        self
    }

    pub fn panic_on(mut self, pattern: &str, message: &str) -> Self {
        self.rules
            .push((pattern.to_string(), Outcome::Panic(message.to_string())));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabularStore for ScriptedStore {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        self.executed.lock().unwrap().push(sql.to_string());
        let outcome = self
            .rules
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, outcome)| outcome.clone());
        match outcome {
            Some(Outcome::Rows(rows)) => Ok(rows),
            Some(Outcome::Fail(message)) => Err(StoreError::QueryFailed(message)),
            Some(Outcome::Panic(message)) => panic!("{message}"),
            None => Ok(Vec::new()),
        }
    }
}

pub fn employee_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".into(), json!(i + 1));
            row.insert("name".into(), json!(format!("Employee {}", i + 1)));
            row.insert("salary".into(), json!(30000.0 + 1000.0 * i as f64));
            row
        })
        .collect()
}

pub fn single_row(key: &str, value: serde_json::Value) -> Vec<Row> {
    let mut row = Row::new();
    row.insert(key.to_string(), value);
    vec![row]
}

pub fn stats_row() -> Vec<Row> {
    let mut row = Row::new();
    row.insert("count".into(), json!(420));
    row.insert("null_count".into(), json!(0));
    row.insert("avg".into(), json!(52000.5));
    row.insert("min".into(), json!(30000.0));
    row.insert("max".into(), json!(449000.0));
    vec![row]
}

pub fn employees_table() -> TableSchema {
    TableSchema::new(
        "employees",
        vec![
            ColumnDef::new("id", "integer"),
            ColumnDef::new("name", "varchar(120)"),
            ColumnDef::new("department", "varchar(60)"),
            ColumnDef::new("salary", "numeric(12,2)"),
            ColumnDef::new("hire_date", "date"),
        ],
    )
}

pub fn employees_catalog() -> SchemaCatalog {
    SchemaCatalog::new(vec![employees_table()])
}

pub fn orchestrator(
    client: &Arc<ScriptedClient>,
    store: &Arc<ScriptedStore>,
    config: FlowConfig,
) -> Orchestrator {
    Orchestrator::new(client.clone(), store.clone(), config)
}
