//! `claimgate` -- CLI binary for the claimgate compliance gateway.
//!
//! Provides the following subcommands:
//!
//! - `claimgate check` -- Run items through a policy and print verdicts.
//! - `claimgate pack` -- Build an audit pack from exported records.
//! - `claimgate validate` -- Check a policy against the transform manifest.

use clap::{Parser, Subcommand};

mod commands;

/// claimgate compliance gateway CLI.
#[derive(Parser)]
#[command(name = "claimgate", about = "claimgate compliance gateway CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run items through a policy profile and print one verdict per line.
    Check(commands::check::CheckArgs),

    /// Generate an audit pack from a JSONL audit trail.
    Pack(commands::pack::PackArgs),

    /// Load a policy against the transform manifest and report errors.
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check(args) => commands::check::run(args).await?,
        Commands::Pack(args) => commands::pack::run(args).await?,
        Commands::Validate(args) => commands::validate::run(args)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_check_with_route() {
        let cli = Cli::try_parse_from([
            "claimgate", "check", "--policy", "p.yaml", "--items", "i.json", "--route", "/v1/menu",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Check(_)));
        assert!(!cli.verbose);
    }

    #[test]
    fn check_requires_route_or_profile() {
        let res = Cli::try_parse_from([
            "claimgate", "check", "--policy", "p.yaml", "--items", "i.json",
        ]);
        assert!(res.is_err());
        let res = Cli::try_parse_from([
            "claimgate", "check", "--policy", "p.yaml", "--items", "i.json", "--route", "/a",
            "--profile", "menu",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::try_parse_from(["claimgate", "validate", "--policy", "p.yaml", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}
