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
use super::state::FlowState;
use super::step::StepContext;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ambiguity {
    Clear,
    Ambiguous(String),
    InsufficientData(String),
}

/// Reads the detector's one-line verdict. Anything unrecognised counts as clear.
pub fn parse_ambiguity(response: &str) -> Ambiguity {
    let response = response.trim();
    if let Some(question) = response.strip_prefix("AMBIGUOUS:") {
        Ambiguity::Ambiguous(question.trim().to_string())
    } else if let Some(missing) = response.strip_prefix("INSUFFICIENT_DATA:") {
        Ambiguity::InsufficientData(missing.trim().to_string())
    } else {
        Ambiguity::Clear
    }
}

#[instrument(name = "intent_analyzer", skip_all)]
pub async fn analyze(ctx: &StepContext<'_>, state: &mut FlowState) {
    let request = state.request_text();
    let prompt = prompts::intent(&ctx.prompt(state, &request));
    let analysis = match ctx.generate(Node::IntentAnalyzer, &prompt).await {
        Ok(text) => text,
        Err(failure) => format!("Error in analysis: {failure}"),
    };
    debug!(len = analysis.len(), "Intent analysis recorded");
    state.intent_analysis = Some(analysis);
}

#[instrument(name = "ambiguity_detector", skip_all)]
pub async fn detect(ctx: &StepContext<'_>, state: &mut FlowState) {
    let request = state.request_text();
    let prompt = prompts::ambiguity(&ctx.prompt(state, &request));
    let verdict = match ctx.generate(Node::AmbiguityDetector, &prompt).await {
        Ok(text) => parse_ambiguity(&text),
        Err(_) => {
            warn!("Ambiguity check unavailable, treating request as clear");
            Ambiguity::Clear
        }
    };

    state.is_ambiguous = false;
    state.insufficient_data = false;
    state.clarification_text = None;
    match verdict {
        Ambiguity::Clear => {}
        Ambiguity::Ambiguous(question) => {
            state.is_ambiguous = true;
            state.clarification_text = Some(question);
        }
        Ambiguity::InsufficientData(missing) => {
            state.insufficient_data = true;
            state.clarification_text = Some(missing);
        }
    }
    info!(
        ambiguous = state.is_ambiguous,
        insufficient = state.insufficient_data,
        "Request assessed"
    );
}
