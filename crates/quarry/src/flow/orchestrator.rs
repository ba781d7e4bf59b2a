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

use super::graph::{self, Node};
use super::state::{FlowState, RunInput, RunResult};
use super::step::StepContext;
use super::{composer, evaluator, executor, intent, planner, validator};
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::store::TabularStore;
use futures::FutureExt;
use llm_contracts::TextGenerationClient;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Drives one request through the node graph. Holds no per-request state, so a
/// single instance can serve any number of sequential or concurrent runs.
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn TextGenerationClient>,
    store: Arc<dyn TabularStore>,
    config: FlowConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn TextGenerationClient>,
        store: Arc<dyn TabularStore>,
        config: FlowConfig,
    ) -> Self {
        Self { llm, store, config }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Never fails: top-level faults come back as a result with `error` set.
    #[instrument(name = "orchestrator_run", skip_all)]
    pub async fn run(&self, input: impl Into<RunInput>) -> RunResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut state = FlowState::new(input.into(), self.config.max_retries);
        info!(%run_id, model = self.llm.model_name(), "Starting run");

        let outcome = self.drive(&mut state).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(%run_id, elapsed_ms, steps = state.trace.len(), "Run complete");
                RunResult::from_state(state, run_id, elapsed_ms)
            }
            Err(err) => {
                error!(%run_id, error = %err, "Run aborted");
                RunResult::failed(state, run_id, elapsed_ms, err)
            }
        }
    }

    async fn drive(&self, state: &mut FlowState) -> Result<(), FlowError> {
        self.config.validate()?;
        let ctx = StepContext {
            llm: self.llm.as_ref(),
            store: self.store.as_ref(),
            config: &self.config,
        };
        let limit = self.config.recursion_limit;
        let mut steps = 0usize;
        let mut current = Some(Node::ENTRY);

        while let Some(node) = current {
            if steps >= limit {
                return Err(FlowError::RecursionLimit { limit });
            }
            steps += 1;
            debug!(node = %node, step = steps, "Entering node");

            AssertUnwindSafe(Self::step(&ctx, node, state))
                .catch_unwind()
                .await
                .map_err(|payload| FlowError::NodePanicked {
                    node: node.to_string(),
                    message: panic_message(payload.as_ref()),
                })?;

            state.trace.push(node);
            current = graph::next(node, state);
        }
        Ok(())
    }

    async fn step(ctx: &StepContext<'_>, node: Node, state: &mut FlowState) {
        match node {
            Node::Ingest => {
                state.reset();
                state.normalise_messages();
            }
            Node::IntentAnalyzer => intent::analyze(ctx, state).await,
            Node::AmbiguityDetector => intent::detect(ctx, state).await,
            Node::ClarificationHandler => composer::clarify(ctx, state),
            Node::TableValidator => validator::validate(ctx, state).await,
            Node::QueryPlanner => planner::plan(ctx, state).await,
            Node::QueryExecutor => executor::execute(ctx, state).await,
            Node::MultiQueryExecutor => executor::execute_all(ctx, state).await,
            Node::ResultEvaluator => evaluator::evaluate(state),
            Node::InsightComposer => composer::compose(ctx, state).await,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
