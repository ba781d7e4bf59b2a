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

use once_cell::sync::Lazy;
use regex::Regex;

pub const NO_SQL_NEEDED: &str = "NO_SQL_NEEDED";
pub const ERROR_PREFIX: &str = "ERROR:";

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```[ \t]*sql\b|```").expect("code fence pattern"));
static QUERY_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^QUERY_\d+\s*:(.*)$").expect("query label pattern"));

const EXPLANATION_OPENERS: &[&str] = &[
    "this query",
    "esta consulta",
    "explanation",
    "note:",
    "here is",
    "here's",
];

/// Strips a completion down to the bare SQL: no fences, comments or prose, one line.
pub fn clean(text: &str) -> String {
    // Joining lines can line up a prose opener across the break ("Here" + "is ..."),
    // so the single-line result gets one more pass.
    clean_pass(&clean_pass(text))
}

fn clean_pass(text: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(text, "");
    unfenced
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('#') && !line.starts_with("--"))
        .filter(|line| {
            let lower = line.to_lowercase();
            !EXPLANATION_OPENERS.iter().any(|p| lower.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pulls `QUERY_<n>: ...` statements out of a multi-statement completion, in the
/// order they appear.
pub fn parse_multi(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| QUERY_LABEL.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| clean(m.as_str())))
        .filter(|stmt| !stmt.is_empty() && !is_no_sql(stmt))
        .collect()
}

pub fn is_no_sql(statement: &str) -> bool {
    statement
        .trim_start()
        .to_uppercase()
        .starts_with(NO_SQL_NEEDED)
}

pub fn is_error(statement: &str) -> bool {
    statement.trim_start().starts_with("ERROR")
}

pub fn error_sentinel(message: impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX} {message}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Empty,
    Error,
    NoSqlNeeded,
    Sql,
}

impl StatementKind {
    pub fn of(statement: &str) -> Self {
        if statement.trim().is_empty() {
            StatementKind::Empty
        } else if is_error(statement) {
            StatementKind::Error
        } else if is_no_sql(statement) {
            StatementKind::NoSqlNeeded
        } else {
            StatementKind::Sql
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, StatementKind::Sql)
    }
}

/// Keeps identifier characters only; dotted names are sanitized per segment.
pub fn sanitize_identifier(name: &str) -> String {
    name.split('.')
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join(".")
}

fn sanitize_segment(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if out.is_empty() && c.is_ascii_digit() {
                continue;
            }
            out.push(c);
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}
