use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "orderflow")]
#[command(version, about = "Order lifecycle, quality protocols and checkpoints for document pipelines")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Database file. Overrides orderflow.toml and ORDERFLOW_DB_PATH.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to .orderflow/orderflow.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .orderflow directory, config and database
    Init,
    /// Create, inspect and move orders
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    /// Record pipeline signals and run quality protocols
    Protocol {
        #[command(subcommand)]
        command: ProtocolCommands,
    },
    /// List, open and respond to checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Show where a hold reason resumes the pipeline
    ResumePhase {
        /// Hold reason, e.g. evidence_gap
        reason: String,
        /// Phase the order was in when the hold opened
        #[arg(long)]
        current: Option<String>,
    },
    /// Release refund locks older than the configured age
    SweepLocks,
    /// Show queued admin alerts
    Alerts {
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum OrderCommands {
    /// Create an order in SUBMITTED
    Create {
        /// Service tier: A, B, C or D
        #[arg(long)]
        tier: String,
    },
    /// Show an order with its workflow state
    Show { id: i64 },
    /// Move an order to a new status
    Transition {
        id: i64,
        status: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Refund an order under the refund lock
    Refund {
        id: i64,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProtocolCommands {
    /// Record citation verifications and run the order protocols
    Citations {
        id: i64,
        #[arg(long)]
        phase: String,
        /// Citation ids that failed verification (comma-separated)
        #[arg(long, value_delimiter = ',')]
        failed: Vec<String>,
        /// Citation ids that passed verification (comma-separated)
        #[arg(long, value_delimiter = ',')]
        passed: Vec<String>,
    },
    /// Record phase spend and run the order protocols
    Cost {
        id: i64,
        #[arg(long)]
        phase: String,
        #[arg(long)]
        cents: i64,
    },
    /// Record a revision iteration
    Loop {
        id: i64,
        #[arg(long)]
        phase: String,
        /// Completed iterations, starting at 1
        #[arg(long)]
        loops: u32,
        /// Latest grade: letter (B+) or number (3.3)
        #[arg(long)]
        grade: String,
        /// Best draft so far
        #[arg(long)]
        draft: Option<String>,
    },
    /// Show persisted protocol results for an order
    Results { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List an order's checkpoints
    List { id: i64 },
    /// Open a review or notification checkpoint
    Open {
        id: i64,
        #[arg(long)]
        phase: String,
        /// blocking or notification
        #[arg(long, default_value = "blocking")]
        kind: String,
        #[arg(long, default_value = "")]
        message: String,
    },
    /// Respond to a checkpoint
    Respond {
        checkpoint_id: i64,
        /// approve, request_changes, provide_evidence, dismiss or confirm_receipt
        action: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default orderflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let problems = orderflow::status::registry::validate();
    if !problems.is_empty() {
        anyhow::bail!("Status transition table is invalid:\n  {}", problems.join("\n  "));
    }

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config = orderflow::config::OrderflowConfig::with_cli_args(
        project_dir,
        cli.config.clone(),
        cli.db.clone(),
        cli.verbose,
    )?;
    let _log_guard = orderflow::logging::init(
        &config.toml.logging,
        config.log_dir().as_deref(),
        cli.verbose,
    )?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Order { command } => cmd::cmd_order(&config, command.clone(), cli.json).await?,
        Commands::Protocol { command } => {
            cmd::cmd_protocol(&config, command.clone(), cli.json).await?
        }
        Commands::Checkpoint { command } => {
            cmd::cmd_checkpoint(&config, command.clone(), cli.json).await?
        }
        Commands::ResumePhase { reason, current } => {
            cmd::cmd_resume_phase(&config, reason, current.as_deref())?
        }
        Commands::SweepLocks => cmd::cmd_sweep_locks(&config).await?,
        Commands::Alerts { limit } => cmd::cmd_alerts(&config, *limit, cli.json).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
