//! `evident` binary entry point.

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use evident::cli::{Cli, OutputFormat, execute};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;
    match execute(&cli).await {
        Ok(output) => emit(&output),
        Err(e) => report_failure(&e, format),
    }
}

/// Writes a successful command result to stdout.
fn emit(output: &str) -> ExitCode {
    if output.is_empty() {
        return ExitCode::SUCCESS;
    }
    let mut stdout = std::io::stdout().lock();
    match writeln!(stdout, "{output}") {
        Ok(()) => ExitCode::SUCCESS,
        // A downstream reader that closed the pipe early is not our
        // failure.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(e) => {
            let _ = writeln!(std::io::stderr().lock(), "error: cannot write output: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Renders a failure per the selected format. Scripted callers running
/// with `--format json` read errors from stdout like any other result;
/// text mode keeps stdout clean for piping and reports on stderr.
fn report_failure(error: &evident::Error, format: OutputFormat) -> ExitCode {
    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "error": error.to_string(),
                "kind": format!("{:?}", error.kind()),
            });
            let _ = writeln!(std::io::stdout().lock(), "{body}");
        }
        OutputFormat::Text => {
            let _ = writeln!(std::io::stderr().lock(), "error: {error}");
        }
    }
    ExitCode::FAILURE
}
