// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::Parser;
use simple_logger::SimpleLogger;
use webrace::cli::{Cli, Commands};
use webrace::race_cli::{run_analyze, run_race_scan};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(cli.level_filter())
        .with_module_level("hyper", log::LevelFilter::Warn)
        .with_module_level("reqwest", log::LevelFilter::Warn)
        .init()?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Scan(args) => run_race_scan(args).await,
        Commands::Analyze(args) => run_analyze(args),
    }
}
