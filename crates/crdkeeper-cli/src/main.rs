//! crdkeeper CLI - install and upgrade an operator's CRDs exactly once across replicas

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod args;
mod commands;
mod display;
mod error;
mod exit_codes;

use args::{CrdArgs, LeaderArgs};

#[derive(Parser)]
#[command(name = "crdkeeper")]
#[command(author = "crdkeeper Contributors")]
#[command(version)]
#[command(about = "Install and upgrade an operator's CRDs exactly once across leader-elected replicas", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or upgrade CRDs, then exit so the operator restarts on the new schema
    ///
    /// Exits 0 whether CRDs were applied or were already up to date. When CRDs
    /// were written, the log line "Restarting operator after updating CRDs" is
    /// emitted; its absence means no restart is required. Losing the leader
    /// lease while applying exits non-zero.
    Install {
        #[command(flatten)]
        crds: CrdArgs,

        #[command(flatten)]
        leader: LeaderArgs,
    },

    /// Show which CRDs install would write, without writing anything
    Plan {
        #[command(flatten)]
        crds: CrdArgs,

        /// Show a unified diff of the spec for every CRD that would be written
        #[arg(long)]
        diff: bool,

        /// Output the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load CRDs and check patterns without contacting the cluster
    Validate {
        #[command(flatten)]
        crds: CrdArgs,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            });
        }
    };

    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Install { crds, leader } => commands::install::run(&crds, &leader).await,
        Commands::Plan { crds, diff, json } => commands::plan::run(&crds, diff, json).await,
        Commands::Validate { crds } => commands::validate::run(&crds),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
