mod commands;
mod input;
mod output;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::backtest::BacktestArgs;
use commands::optimize::OptimizeArgs;
use commands::returns::ReturnsArgs;
use commands::risk::RiskArgs;

/// Target-beta minimum-variance allocation
#[derive(Parser)]
#[command(
    name = "balloc",
    version,
    about = "Target-beta minimum-variance portfolio allocation",
    long_about = "Builds return tables from prices, estimates covariance and benchmark \
                  betas, solves for the lowest-variance long-only portfolio with a \
                  chosen beta, and backtests the resulting weights. All arithmetic is \
                  done in decimal precision."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log to stderr (-v info, -vv debug); RUST_LOG applies otherwise
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an aligned return table from prices
    Returns(ReturnsArgs),
    /// Estimate the covariance matrix and benchmark betas
    Risk(RiskArgs),
    /// Solve for minimum-variance weights at a target beta
    Optimize(OptimizeArgs),
    /// Compound a weight vector over historical returns
    Backtest(BacktestArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Returns(args) => commands::returns::run_returns(args),
        Commands::Risk(args) => commands::risk::run_risk(args),
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Backtest(args) => commands::backtest::run_backtest_cmd(args),
        Commands::Version => {
            println!("balloc {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
