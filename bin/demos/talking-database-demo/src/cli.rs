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

use clap::Parser;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIGS: &[&str] = &[
    "config/quarry.yml",
    "bin/demos/talking-database-demo/config/quarry.yml",
];

#[derive(Parser, Debug, Clone)]
#[command(name = "talking-database-demo")]
#[command(about = "Ask questions of a Postgres database in plain language")]
pub struct Args {
    /// Flow config (YAML). Defaults to config/quarry.yml when present.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Analyst profile prepended to intent and planning prompts.
    #[arg(short, long)]
    pub profile_file: Option<PathBuf>,

    /// Run a single request and exit instead of starting the prompt loop.
    #[arg(short, long)]
    pub query: Option<String>,

    /// Print the full result record as JSON.
    #[arg(long)]
    pub json: bool,

    #[arg(long)]
    pub database_url: Option<String>,

    #[arg(long, default_value_t = 5)]
    pub max_connections: u32,

    #[arg(short, long)]
    pub debug: bool,
}

impl Args {
    pub fn get_database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| env::var("DATABASE_URL").ok())
    }

    pub fn get_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            DEFAULT_CONFIGS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .map(Path::to_path_buf)
        })
    }
}
