use clap::{Parser, Subcommand};
use jsbox_core::{EngineKind, ExecutionResult};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "jsbox", about = "Run JavaScript snippets in a sandbox", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a file (or `-` for stdin)
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, default_value_t = EngineKind::Interpreter)]
        engine: EngineKind,

        /// Settings JSON; missing fields use defaults
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the URL each specifier resolves to
    Resolve {
        #[arg(value_name = "SPECIFIER", required = true)]
        specifiers: Vec<String>,

        #[arg(long = "cdn-root")]
        cdn_root: Option<String>,
    },
    /// List the specifiers a file imports
    Scan {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Human-readable rendering of an execution: one line per log entry, then
/// the completion value or the error.
pub fn render(result: &ExecutionResult) -> String {
    let mut lines: Vec<String> = result
        .logs()
        .iter()
        .map(|entry| format!("[{}] {}", entry.level, entry.content))
        .collect();
    if let Some(value) = result.return_value() {
        lines.push(format!("=> {value}"));
    }
    if let Some(error) = result.error() {
        lines.push(format!("!! {error}"));
    }
    lines.join("\n")
}
