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

use super::{decimal_to_value, Row, TabularStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Postgres-backed store. Each call checks a connection out of the pool for the
/// duration of that one statement and runs it in a read-only transaction that is
/// always rolled back.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TabularStore for PgStore {
    #[instrument(skip(self, sql), fields(sql_len = sql.len()))]
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query(sql).fetch_all(&mut *tx).await?;
        tx.rollback().await?;
        debug!(rows = rows.len(), "Statement returned");
        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut out = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name()).map_err(
            |e| StoreError::Decode {
                column: column.name().to_string(),
                message: e.to_string(),
            },
        )?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// How a Postgres column is turned into a JSON scalar. Keyed on the type name sqlx
/// reports, so the mapping can be checked without a live server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Text,
    Json,
    Uuid,
    Interval,
    TextArray,
    Int4Array,
    Int8Array,
    Float8Array,
    NumericArray,
    BoolArray,
    Unsupported,
}

impl ColumnKind {
    fn of(type_name: &str) -> Self {
        match type_name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::TimestampTz,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Self::Text,
            "JSON" | "JSONB" => Self::Json,
            "UUID" => Self::Uuid,
            "INTERVAL" => Self::Interval,
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => Self::TextArray,
            "INT4[]" => Self::Int4Array,
            "INT8[]" => Self::Int8Array,
            "FLOAT8[]" => Self::Float8Array,
            "NUMERIC[]" => Self::NumericArray,
            "BOOL[]" => Self::BoolArray,
            _ => Self::Unsupported,
        }
    }
}

fn array_value<T>(items: Vec<Option<T>>, convert: impl Fn(T) -> Value) -> Value {
    Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(Value::Null, &convert))
            .collect(),
    )
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`. Components keep their own sign the way
/// Postgres stores them.
fn interval_to_value(months: i32, days: i32, microseconds: i64) -> Value {
    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        out.push_str(&format!("{years}Y"));
    }
    if months != 0 {
        out.push_str(&format!("{months}M"));
    }
    if days != 0 {
        out.push_str(&format!("{days}D"));
    }

    let hours = microseconds / 3_600_000_000;
    let minutes = (microseconds % 3_600_000_000) / 60_000_000;
    let micros = microseconds % 60_000_000;
    if hours != 0 || minutes != 0 || micros != 0 || out.len() == 1 {
        out.push('T');
        if hours != 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes != 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if micros != 0 || (hours == 0 && minutes == 0) {
            let sign = if micros < 0 { "-" } else { "" };
            let whole = (micros / 1_000_000).abs();
            let frac = (micros % 1_000_000).abs();
            if frac == 0 {
                out.push_str(&format!("{sign}{whole}S"));
            } else {
                let digits = format!("{frac:06}");
                out.push_str(&format!("{sign}{whole}.{}S", digits.trim_end_matches('0')));
            }
        }
    }
    Value::String(out)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match ColumnKind::of(type_name) {
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
        ColumnKind::Int2 => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        ColumnKind::Int4 => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        ColumnKind::Int8 => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        ColumnKind::Float4 => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|f| Value::from(f64::from(f))),
        ColumnKind::Float8 => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        ColumnKind::Numeric => row
            .try_get::<Option<Decimal>, _>(idx)?
            .map(decimal_to_value),
        ColumnKind::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::String(d.to_string())),
        ColumnKind::Time => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| Value::String(t.to_string())),
        ColumnKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|t| Value::String(t.to_string())),
        ColumnKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|t| Value::String(t.to_rfc3339())),
        ColumnKind::Text => row
            .try_get::<Option<String>, _>(idx)?
            .map(Value::String),
        ColumnKind::Json => row.try_get::<Option<Value>, _>(idx)?,
        ColumnKind::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|u| Value::String(u.to_string())),
        ColumnKind::Interval => row
            .try_get::<Option<PgInterval>, _>(idx)?
            .map(|i| interval_to_value(i.months, i.days, i.microseconds)),
        ColumnKind::TextArray => row
            .try_get::<Option<Vec<Option<String>>>, _>(idx)?
            .map(|v| array_value(v, Value::String)),
        ColumnKind::Int4Array => row
            .try_get::<Option<Vec<Option<i32>>>, _>(idx)?
            .map(|v| array_value(v, Value::from)),
        ColumnKind::Int8Array => row
            .try_get::<Option<Vec<Option<i64>>>, _>(idx)?
            .map(|v| array_value(v, Value::from)),
        ColumnKind::Float8Array => row
            .try_get::<Option<Vec<Option<f64>>>, _>(idx)?
            .map(|v| array_value(v, Value::from)),
        ColumnKind::NumericArray => row
            .try_get::<Option<Vec<Option<Decimal>>>, _>(idx)?
            .map(|v| array_value(v, decimal_to_value)),
        ColumnKind::BoolArray => row
            .try_get::<Option<Vec<Option<bool>>>, _>(idx)?
            .map(|v| array_value(v, Value::Bool)),
        ColumnKind::Unsupported => {
            warn!(
                column = row.columns()[idx].name(),
                pg_type = type_name,
                "Unsupported column type, emitting null"
            );
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
