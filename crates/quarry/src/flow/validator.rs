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
use super::sanitize::sanitize_identifier;
use super::state::{ColumnProfile, FlowState, TableProfile};
use super::step::{StepContext, StepFailure};
use crate::schema::TableSchema;
use crate::store::{value_as_f64, value_as_i64, Row};
use tracing::{debug, info, instrument, warn};

pub fn sample_sql(table: &str, limit: usize) -> String {
    format!("SELECT * FROM {} LIMIT {limit}", sanitize_identifier(table))
}

pub fn count_sql(table: &str) -> String {
    format!(
        "SELECT COUNT(*) AS row_count FROM {}",
        sanitize_identifier(table)
    )
}

pub fn column_stats_sql(table: &str, column: &str) -> String {
    let c = sanitize_identifier(column);
    format!(
        "SELECT COUNT({c}) AS count, COUNT(*) - COUNT({c}) AS null_count, \
         AVG({c}) AS avg, MIN({c}) AS min, MAX({c}) AS max FROM {}",
        sanitize_identifier(table)
    )
}

fn column_profile(rows: &[Row]) -> ColumnProfile {
    let Some(row) = rows.first() else {
        return ColumnProfile {
            error: Some("statistics query returned no rows".to_string()),
            ..Default::default()
        };
    };
    let read_f64 = |key: &str| row.get(key).and_then(value_as_f64);
    let read_i64 = |key: &str| row.get(key).and_then(value_as_i64);
    ColumnProfile {
        count: read_i64("count"),
        null_count: read_i64("null_count"),
        avg: read_f64("avg"),
        min: read_f64("min"),
        max: read_f64("max"),
        error: None,
    }
}

async fn profile_table(
    ctx: &StepContext<'_>,
    table: &TableSchema,
) -> Result<(TableProfile, Vec<Row>), StepFailure> {
    let limit = ctx.config.sample_limit;
    let mut sample = ctx
        .query(Node::TableValidator, &sample_sql(&table.name, limit))
        .await?;
    sample.truncate(limit);

    let counted = ctx
        .query(Node::TableValidator, &count_sql(&table.name))
        .await?;
    let row_count = counted
        .first()
        .and_then(|row| row.values().next())
        .and_then(value_as_i64);

    let mut profile = TableProfile {
        exists: true,
        row_count,
        ..Default::default()
    };
    for column in table.numeric_columns() {
        let stats = match ctx
            .query(
                Node::TableValidator,
                &column_stats_sql(&table.name, &column.name),
            )
            .await
        {
            Ok(rows) => column_profile(&rows),
            Err(failure) => ColumnProfile {
                error: Some(failure.message),
                ..Default::default()
            },
        };
        profile.columns.insert(column.name.clone(), stats);
    }
    Ok((profile, sample))
}

/// Samples and profiles every candidate table. Failures are recorded per table and
/// never stop the run.
#[instrument(name = "table_validator", skip_all)]
pub async fn validate(ctx: &StepContext<'_>, state: &mut FlowState) {
    let mut search_text = state.request_text();
    if let Some(intent) = &state.intent_analysis {
        search_text.push(' ');
        search_text.push_str(intent);
    }
    let candidates = ctx.config.schema.candidates(&search_text);
    if candidates.is_empty() {
        debug!("No tables configured, skipping validation");
        return;
    }

    for table in candidates {
        match profile_table(ctx, table).await {
            Ok((profile, sample)) => {
                debug!(table = %table.name, rows = ?profile.row_count, "Table profiled");
                state.validated_tables.insert(table.name.clone(), profile);
                state.table_samples.insert(table.name.clone(), sample);
            }
            Err(failure) => {
                warn!(table = %table.name, error = %failure, "Table validation failed");
                state
                    .validation_errors
                    .push(format!("Table '{}': {}", table.name, failure.message));
                state
                    .validated_tables
                    .insert(table.name.clone(), TableProfile::missing(failure.message));
            }
        }
    }
    info!(
        tables = state.validated_tables.len(),
        errors = state.validation_errors.len(),
        "Validation complete"
    );
}
