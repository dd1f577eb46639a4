//! zmw-router - inspect and exercise the LLM command router
//!
//! # Usage
//!
//! ```bash
//! # Services found in a saved set of interface documents
//! zmw-router --interfaces svcs.json services
//!
//! # What the model would be shown for a query
//! zmw-router --interfaces svcs.json context "turn on the kitchen lights"
//! zmw-router --interfaces svcs.json grammar "turn on the kitchen lights"
//!
//! # Ask the configured llama-server, without executing the answer
//! zmw-router --interfaces svcs.json ask --dry-run "play music in the kitchen"
//!
//! # Score a labelled prompt set
//! zmw-router --interfaces svcs.json evaluate cases.json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zmw_router::cli::commands::{
    ask::AskArgs, context::ContextArgs, evaluate::EvaluateArgs, grammar::GrammarArgs,
};
use zmw_router::cli::{commands, CliContext, OutputFormat};

#[derive(Parser)]
#[command(name = "zmw-router")]
#[command(version)]
#[command(about = "Route natural language requests to pub/sub services through a constrained LLM", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Saved interface documents (JSON object keyed by service, or array)
    #[arg(short, long, global = true, value_name = "FILE", env = "ZMW_ROUTER_INTERFACES")]
    interfaces: Option<PathBuf>,

    /// Output format (table, json, plain)
    #[arg(short, long, global = true, default_value = "table")]
    output_format: String,

    /// Suppress status messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known services
    Services,

    /// Show the prompt context selected for a query
    Context(ContextArgs),

    /// Show the generation grammar compiled for a query
    Grammar(GrammarArgs),

    /// Run a query end to end
    Ask(AskArgs),

    /// Score a labelled prompt set (never executes commands)
    Evaluate(EvaluateArgs),
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let directive = if verbose {
        "zmw_router=debug"
    } else {
        "zmw_router=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().context("invalid log directive")?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let output_format: OutputFormat = cli.output_format.parse().unwrap_or_else(|e| {
        eprintln!("Warning: {}. Using table format.", e);
        OutputFormat::Table
    });

    let mut ctx = match cli.config {
        Some(path) => CliContext::new(path.clone())
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => CliContext::with_defaults().context("initializing context")?,
    };
    ctx.interfaces_path = cli.interfaces;
    ctx.output_format = output_format;
    ctx.quiet = cli.quiet;
    ctx.verbose = cli.verbose;

    match cli.command {
        Commands::Services => commands::services::execute(&mut ctx).await,
        Commands::Context(args) => commands::context::execute(&mut ctx, args).await,
        Commands::Grammar(args) => commands::grammar::execute(&mut ctx, args).await,
        Commands::Ask(args) => commands::ask::execute(&mut ctx, args).await,
        Commands::Evaluate(args) => commands::evaluate::execute(&mut ctx, args).await,
    }?;
    Ok(())
}
