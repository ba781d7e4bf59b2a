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

use super::state::FlowState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Ingest,
    IntentAnalyzer,
    AmbiguityDetector,
    ClarificationHandler,
    TableValidator,
    QueryPlanner,
    QueryExecutor,
    MultiQueryExecutor,
    ResultEvaluator,
    InsightComposer,
}

impl Node {
    pub const ENTRY: Node = Node::Ingest;

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Ingest => "ingest",
            Node::IntentAnalyzer => "intent_analyzer",
            Node::AmbiguityDetector => "ambiguity_detector",
            Node::ClarificationHandler => "clarification_handler",
            Node::TableValidator => "table_validator",
            Node::QueryPlanner => "query_planner",
            Node::QueryExecutor => "query_executor",
            Node::MultiQueryExecutor => "multi_query_executor",
            Node::ResultEvaluator => "result_evaluator",
            Node::InsightComposer => "insight_composer",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. `None` means END.
pub fn next(node: Node, state: &FlowState) -> Option<Node> {
    match node {
        Node::Ingest => Some(Node::IntentAnalyzer),
        Node::IntentAnalyzer => Some(Node::AmbiguityDetector),
        Node::AmbiguityDetector => {
            if state.is_ambiguous || state.insufficient_data {
                Some(Node::ClarificationHandler)
            } else {
                Some(Node::TableValidator)
            }
        }
        Node::TableValidator => Some(Node::QueryPlanner),
        Node::QueryPlanner => {
            if state.requires_multiple_queries {
                Some(Node::MultiQueryExecutor)
            } else {
                Some(Node::QueryExecutor)
            }
        }
        Node::QueryExecutor | Node::MultiQueryExecutor => Some(Node::ResultEvaluator),
        Node::ResultEvaluator => {
            if state.needs_retry && state.retry_count < state.max_retries {
                Some(Node::QueryPlanner)
            } else {
                Some(Node::InsightComposer)
            }
        }
        Node::ClarificationHandler | Node::InsightComposer => None,
    }
}
