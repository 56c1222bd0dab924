#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "verso: versioned resource reference graph",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Output format: pretty, text, or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Alias for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Schema",
        about = "Validate a schema file",
        long_about = "Load a schema TOML file, build the registry and report what it declares.",
        after_help = "EXAMPLES:\n    # Validate the project schema\n    verso check .verso/schema.toml\n\n    # Emit machine-readable output\n    verso check schema.toml --format json"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        next_help_heading = "Schema",
        about = "List capabilities",
        long_about = "List every capability with its supertypes, ancestors and fields.",
        after_help = "EXAMPLES:\n    # Show capabilities\n    verso capabilities schema.toml"
    )]
    Capabilities(cmd::capabilities::CapabilitiesArgs),

    #[command(
        next_help_heading = "Schema",
        about = "List reference types",
        long_about = "List reference types that extend a base type and whose source capability extends a base capability.",
        after_help = "EXAMPLES:\n    # Structural reference types of paragraphs\n    verso reftypes schema.toml --capability paragraph --base sheet_to_sheet"
    )]
    Reftypes(cmd::reftypes::ReftypesArgs),

    #[command(
        next_help_heading = "Graph",
        about = "Run a scenario script",
        long_about = "Run create, update and batch steps from a JSON script against an in-memory pool and report the resulting tree.",
        after_help = "EXAMPLES:\n    # Replay a scenario\n    verso scenario schema.toml steps.json\n\n    # Emit machine-readable output\n    verso scenario schema.toml steps.json --json"
    )]
    Scenario(cmd::scenario::ScenarioArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VERSO_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "verso=debug,info"
        } else {
            "verso=info,warn"
        })
    });

    let format = env::var("VERSO_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    match cli.command {
        Commands::Check(ref args) => cmd::check::run_check(args, output),
        Commands::Capabilities(ref args) => cmd::capabilities::run_capabilities(args, output),
        Commands::Reftypes(ref args) => cmd::reftypes::run_reftypes(args, output),
        Commands::Scenario(ref args) => cmd::scenario::run_scenario(args, output),
    }
}
