//! jsbox Runtime
//!
//! Command-line front end: run a snippet on either engine, or inspect how its
//! imports would resolve.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use jsbox_core::Settings;
use jsbox_modules::{scan_imports, SpecifierResolver};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            file,
            engine,
            config,
            json,
        } => {
            let settings = match config {
                Some(path) => Settings::from_json_file(&path)
                    .with_context(|| format!("failed to load settings from {}", path.display()))?,
                None => Settings::default(),
            };
            let source = read_source(&file)?;

            tracing::info!("jsbox v{} ({engine} engine)", jsbox_core::VERSION);
            let mut engine = jsbox_realm::create_engine(engine, &settings);
            engine.initialize().await?;
            let outcome = engine.execute(&source).await;
            engine.dispose().await;
            let result = outcome?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let rendered = cli::render(&result);
                if !rendered.is_empty() {
                    println!("{rendered}");
                }
            }
            Ok(if result.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Resolve {
            specifiers,
            cdn_root,
        } => {
            let resolver = cdn_root.map(SpecifierResolver::new).unwrap_or_default();
            for specifier in specifiers {
                println!("{specifier}\t{}", resolver.resolve(&specifier));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Scan { file } => {
            let source = read_source(&file)?;
            for specifier in scan_imports(&source) {
                println!("{specifier}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Read a file, or stdin when the path is `-`.
fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read source from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
