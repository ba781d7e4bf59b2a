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

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

const NUMERIC_TYPES: &[&str] = &[
    "int",
    "integer",
    "int2",
    "int4",
    "int8",
    "smallint",
    "bigint",
    "serial",
    "bigserial",
    "numeric",
    "decimal",
    "real",
    "float",
    "float4",
    "float8",
    "double",
    "double precision",
    "money",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: None,
        }
    }

    /// True for integer, fixed-point and floating-point column types; precision
    /// suffixes such as `numeric(12,2)` are ignored.
    pub fn is_numeric(&self) -> bool {
        let base = self
            .data_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        NUMERIC_TYPES.contains(&base.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            description: None,
            columns,
        }
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_numeric())
    }

    fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Structural metadata for the tables a deployment may query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Tables named in `text` (case-insensitive, schema prefix optional). Falls back to
    /// the whole catalog when the text mentions none of them.
    pub fn candidates(&self, text: &str) -> Vec<&TableSchema> {
        let haystack = text.to_lowercase();
        let mentioned: Vec<&TableSchema> = self
            .tables
            .iter()
            .filter(|t| {
                haystack.contains(&t.name.to_lowercase())
                    || haystack.contains(&t.short_name().to_lowercase())
            })
            .collect();
        if mentioned.is_empty() {
            self.tables.iter().collect()
        } else {
            mentioned
        }
    }

    /// Prompt-ready listing: one line per table followed by its typed columns.
    pub fn describe(&self) -> String {
        if self.tables.is_empty() {
            return "No table metadata is configured.".to_string();
        }
        let mut out = String::new();
        for table in &self.tables {
            let _ = write!(out, "Table '{}'", table.name);
            if let Some(desc) = &table.description {
                let _ = write!(out, " ({desc})");
            }
            out.push_str(":\n");
            for column in &table.columns {
                let _ = write!(out, "  - {} ({})", column.name, column.data_type);
                if let Some(desc) = &column.description {
                    let _ = write!(out, ": {desc}");
                }
                out.push('\n');
            }
        }
        out
    }

    /// Column names grouped per table, used where the user is told what data exists.
    pub fn column_summary(&self) -> String {
        self.tables
            .iter()
            .map(|t| {
                let cols: Vec<&str> = t.columns.iter().map(|c| c.name.as_str()).collect();
                format!("- {}: {}", t.name, cols.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
