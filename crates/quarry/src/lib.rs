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

pub mod config;
pub mod error;
pub mod flow;
pub mod llm;
pub mod schema;
pub mod store;

pub use config::FlowConfig;
pub use error::{ConfigError, FlowError, StoreError};
pub use flow::{
    EvaluationStatus, FlowState, Message, MultiQuerySummary, Node, Orchestrator, QueryOutcome,
    RunInput, RunResult, StatementOutcome, TableProfile, Verdict,
};
pub use llm::HttpTextClient;
pub use llm_contracts::{LLMError, ProviderConfig, TextGenerationClient};
pub use schema::{ColumnDef, SchemaCatalog, TableSchema};
pub use store::{PgStore, Row, TabularStore};
