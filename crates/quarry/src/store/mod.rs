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

use crate::error::StoreError;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

pub mod postgres;

pub use postgres::PgStore;

/// One result row; column order follows the SELECT list.
pub type Row = serde_json::Map<String, Value>;

/// Read-only relational executor. Callers only submit SELECT statements; the store
/// does not parse SQL to enforce that.
#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, StoreError>;
}

/// Arbitrary-precision decimals leave the store as plain floats.
pub fn decimal_to_value(decimal: Decimal) -> Value {
    decimal
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Reads a numeric scalar regardless of how the store encoded it.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn decimals_become_floats() {
        let salary = Decimal::from_str("52000.75").unwrap();
        assert_eq!(decimal_to_value(salary), json!(52000.75));
        assert_eq!(decimal_to_value(Decimal::ZERO), json!(0.0));
    }

    #[test]
    fn numeric_readers_accept_strings_and_numbers() {
        assert_eq!(value_as_f64(&json!("12.5")), Some(12.5));
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&Value::Null), None);
        assert_eq!(value_as_i64(&json!(42)), Some(42));
        assert_eq!(value_as_i64(&json!("7")), Some(7));
        assert_eq!(value_as_i64(&json!(9.0)), Some(9));
        assert_eq!(value_as_i64(&json!(true)), None);
    }
}
