use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;

use beta_alloc_core::allocation::{allocate, AllocationInput};
use beta_alloc_core::optimization::solver::SolverOptions;
use beta_alloc_core::optimization::target_beta::{optimize_target_beta, TargetBetaInput};

use super::{read_prices, read_typed_input, window_from};

/// Arguments for target-beta optimization
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to a JSON/YAML TargetBetaInput (covariance and betas supplied)
    #[arg(long)]
    pub input: Option<String>,

    /// Wide price CSV; runs the full prices -> weights pipeline
    #[arg(long, requires_all = ["benchmark", "target_beta"], conflicts_with = "input")]
    pub prices: Option<String>,

    /// Benchmark column (e.g. SPY)
    #[arg(long)]
    pub benchmark: Option<String>,

    /// Required portfolio beta
    #[arg(long, allow_hyphen_values = true)]
    pub target_beta: Option<Decimal>,

    /// First return date to include (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last return date to include (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Override the SQP iteration budget
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let solver = args.max_iterations.map(|max_iterations| SolverOptions {
        max_iterations,
        ..SolverOptions::default()
    });

    if let (Some(_), Some(benchmark), Some(target_beta)) =
        (&args.prices, &args.benchmark, args.target_beta)
    {
        let prices = read_prices(args.prices.as_deref(), None)?;
        let result = allocate(&AllocationInput {
            prices,
            benchmark: benchmark.clone(),
            target_beta,
            window: window_from(args.start, args.end),
            solver,
        })?;
        return Ok(serde_json::to_value(result)?);
    }

    let mut tb_input: TargetBetaInput =
        read_typed_input(args.input.as_deref(), "target-beta optimization")?;
    if let Some(target) = args.target_beta {
        tb_input.target_beta = target;
    }
    if solver.is_some() {
        tb_input.solver = solver;
    }
    let result = optimize_target_beta(&tb_input)?;
    Ok(serde_json::to_value(result)?)
}
