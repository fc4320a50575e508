use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use gridway_core::RunConfig;

mod backend;
mod commands;
mod hosts;

#[derive(Parser)]
#[command(
    name = "gridway",
    about = "Gridway — capacity-aware cluster orchestrator",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a work manifest across the cluster.
    ///
    /// The mode is a letter code such as "dcr" (distributed + compiled +
    /// run) or the equivalent bitmask integer.
    Run {
        /// Path to the work manifest (JSON array of {label, weight})
        target: String,
        /// Execution mode: letter code or bitmask
        #[arg(short, long, default_value = "r")]
        mode: String,
        /// Cluster hosts as addr[:workers], comma-separated
        #[arg(long)]
        hosts: String,
        /// Extra arguments forwarded verbatim to the worker backend
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra: Vec<String>,
    },
    /// Provision hosts from scratch (or refresh with --upgrade)
    Install {
        #[arg(long)]
        hosts: String,
        /// Refresh dependencies and artifacts instead of a full install
        #[arg(long)]
        upgrade: bool,
        /// Require accelerator hardware on every host
        #[arg(long)]
        accelerated: bool,
    },
    /// Time every run mode in a bitmask range and write a ranked report
    Sweep {
        target: String,
        #[arg(long)]
        hosts: String,
        /// First mode bitmask to try
        #[arg(long, default_value_t = 1)]
        from: u32,
        /// Last mode bitmask to try
        #[arg(long, default_value_t = 255)]
        to: u32,
        /// Report path (default: the configured report file)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Signal every leased process on the given hosts
    Kill {
        #[arg(long)]
        hosts: String,
        /// SIGKILL instead of SIGTERM
        #[arg(long)]
        force: bool,
    },
    /// Purge working directories on the given hosts
    Clean {
        #[arg(long)]
        hosts: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = match cli.verbose {
        0 => "gridway=info",
        1 => "gridway=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    let mut config = RunConfig::from_env()?;
    let overlay = Path::new("gridway.toml");
    if overlay.exists() {
        config = config.overlay_file(overlay)?;
    }

    match cli.command {
        Commands::Run {
            target,
            mode,
            hosts,
            extra,
        } => commands::run::run(config, &target, &mode, &hosts, extra, cli.verbose).await,
        Commands::Install {
            hosts,
            upgrade,
            accelerated,
        } => commands::install::install(config, &hosts, upgrade, accelerated).await,
        Commands::Sweep {
            target,
            hosts,
            from,
            to,
            report,
        } => commands::sweep::sweep(config, &target, &hosts, from, to, report).await,
        Commands::Kill { hosts, force } => commands::kill::kill(config, &hosts, force).await,
        Commands::Clean { hosts } => commands::clean::clean(config, &hosts).await,
    }
}
