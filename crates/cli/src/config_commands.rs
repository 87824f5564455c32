use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    rollcall_config::{RollcallConfig, Severity, validate},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration and report errors and warnings.
    Check,
    /// Print the effective configuration with secrets redacted.
    Show,
}

pub fn handle_config(action: ConfigAction, config: &RollcallConfig, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check => check(config, path),
        ConfigAction::Show => {
            println!("{config:#?}");
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &RollcallConfig, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("Checking discovered configuration\n"),
    }

    let diagnostics = validate(config);
    for d in &diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    let warnings = diagnostics.len() - errors;

    if !diagnostics.is_empty() {
        eprintln!();
    }
    if diagnostics.is_empty() {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
