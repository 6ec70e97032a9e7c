//! MasterMind CLI - run a business request through the orchestration pipeline
//!
//! Thin request handler over the `mastermind` library: loads configuration,
//! builds one engine and prints the assembled response.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mastermind::{
    telemetry, AssemblyStrategy, MasterMind, MastermindConfig, OutputFormat, ProcessOptions,
    Request,
};
use tokio_util::sync::CancellationToken;

/// MasterMind - route, decompose, schedule and assemble business requests
#[derive(Parser)]
#[command(name = "mastermind")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a business request through the MasterMind orchestration pipeline")]
#[command(long_about = r#"
Examples:
  mastermind run "Rénovation complète cuisine et salle de bain, devis et plan"
  mastermind run --format html --strategy hierarchical "Plan the product launch"
  mastermind route "Préparer la facture du trimestre"
  mastermind plan --max-parallel 2 "Audit complet et stratégie marketing"
"#)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "MASTERMIND_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and print the assembled response
    Run {
        /// Request text
        #[arg(required = true)]
        request: Vec<String>,

        /// Output format (text, markdown, json, html)
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Assembly strategy (merge, concatenate, structured, hierarchical, summary,
        /// best_of, weighted)
        #[arg(short, long)]
        strategy: Option<AssemblyStrategy>,

        /// Route to this department instead of classifying
        #[arg(short, long)]
        department: Option<String>,

        /// Decompose even simple requests
        #[arg(long)]
        force_decompose: bool,

        /// Override the planner's concurrency bound
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Use the synchronous entry point (no LLM calls, simulated agents)
        #[arg(long)]
        sync: bool,

        /// Print the full result as JSON instead of the rendered content
        #[arg(long)]
        json: bool,
    },

    /// Classify a request without running it
    Route {
        #[arg(required = true)]
        request: Vec<String>,
    },

    /// Show the decomposition and execution plan for a request
    Plan {
        #[arg(required = true)]
        request: Vec<String>,

        #[arg(long)]
        force_decompose: bool,

        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => MastermindConfig::load_with_env(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => MastermindConfig::from_env().context("invalid environment configuration")?,
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Route { request } => {
            let mastermind = mastermind::initialize_mastermind(config).await?;
            let routing = mastermind
                .router()
                .route(&Request::text(request.join(" ")), None)
                .await;
            println!("{}", serde_json::to_string_pretty(&routing)?);
        }
        Commands::Plan {
            request,
            force_decompose,
            max_parallel,
        } => {
            let mastermind = mastermind::initialize_mastermind(config).await?;
            let request = Request::text(request.join(" "));
            let routing = mastermind.router().route(&request, None).await;
            let decomposition = mastermind
                .decomposer()
                .decompose(&request, &routing, force_decompose)
                .await;

            let mut options = mastermind.planner().default_options();
            if let Some(max_parallel) = max_parallel {
                options = options.with_max_parallel(max_parallel);
            }
            let plan = mastermind.planner().create_plan(
                request.id,
                &request.id.to_string(),
                &decomposition.subtasks,
                &options,
            );

            let report = serde_json::json!({
                "routing": routing,
                "decomposition": decomposition,
                "plan": plan,
                "statistics": plan.statistics(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run {
            request,
            format,
            strategy,
            department,
            force_decompose,
            max_parallel,
            sync,
            json,
        } => {
            let mastermind = mastermind::initialize_mastermind(config).await?;
            let options = ProcessOptions {
                force_department: department,
                force_decompose,
                strategy,
                format,
                max_parallel,
                cancellation: None,
            };
            let request = Request::text(request.join(" "));

            let result = if sync {
                mastermind.process_sync(request, options)
            } else {
                run_cancellable(&mastermind, request, options).await
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.content);
                for warning in &result.warnings {
                    eprintln!("warning: {}", warning);
                }
                for error in &result.errors {
                    eprintln!("error: {}", error);
                }
                eprintln!(
                    "{} | department: {} | {}/{} subtasks | {}ms",
                    if result.success { "ok" } else { "failed" },
                    result.department.as_deref().unwrap_or("-"),
                    result.successful_subtasks,
                    result.total_subtasks,
                    result.total_duration_ms
                );
            }

            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Process with Ctrl-C wired to the request's cancellation token
async fn run_cancellable(
    mastermind: &MasterMind,
    request: Request,
    options: ProcessOptions,
) -> mastermind::MasterMindResult {
    let token = cancel_on_ctrl_c();
    mastermind
        .process(request, options.with_cancellation(token))
        .await
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            trigger.cancel();
        }
    });
    token
}
