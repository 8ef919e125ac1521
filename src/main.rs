//! `dfi` command-line tool

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::process;

use dfi::cli::{Cli, CliContext, DfiDriver};
use dfi::config::{DfiConfig, CONFIG_FILE_NAME};
use dfi::error_stack;

fn main() {
    let cli = Cli::parse();
    let context = CliContext::new(cli.verbose, cli.quiet);

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dfi=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(&cli, &context) {
        context.error(&format!("{:#}", e));
        // Most recent first; the innermost failure is printed last
        for message in error_stack::drain().into_iter().skip(1) {
            context.verbose(&format!("caused by: {}", message));
        }
        process::exit(1);
    }
}

fn run(cli: &Cli, context: &CliContext) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), context)?;
    let driver = DfiDriver::new(context.clone(), config);
    let report = driver.execute(&cli.command)?;
    context.info(&report);
    Ok(())
}

fn load_config(path: Option<&Path>, context: &CliContext) -> anyhow::Result<DfiConfig> {
    match path {
        Some(path) => {
            context.verbose(&format!("Loading configuration from {}", path.display()));
            DfiConfig::from_file(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))
        }
        None => {
            let config = DfiConfig::discover(".")
                .with_context(|| format!("failed to load {}", CONFIG_FILE_NAME))?;
            Ok(config)
        }
    }
}
