//! cfgpatch CLI - Check whether a configuration update can be applied to a running cluster

use cfgpatch_engine::{CheckOptions, DEFAULT_CONDITION_TIMEOUT, DEFAULT_MAX_CONCURRENCY};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::PatchInputs;

#[derive(Parser)]
#[command(name = "cfgpatch")]
#[command(author = "cfgpatch Contributors")]
#[command(version)]
#[command(about = "Check whether a configuration update can be applied to a running cluster", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

/// Documents describing an update
#[derive(Args)]
struct InputArgs {
    /// Configuration currently deployed
    #[arg(long)]
    base: PathBuf,

    /// Requested configuration
    #[arg(long)]
    target: PathBuf,

    /// Schema document declaring fields and update policies
    #[arg(long)]
    schema: PathBuf,
}

impl InputArgs {
    fn inputs(&self) -> PatchInputs<'_> {
        PatchInputs {
            base: &self.base,
            target: &self.target,
            schema: &self.schema,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check every change against its update policy and the live cluster state
    Check {
        #[command(flatten)]
        inputs: InputArgs,

        /// Recorded live state of the cluster (YAML or JSON)
        #[arg(long, env = "CFGPATCH_LIVE_STATE")]
        live_state: Option<PathBuf>,

        /// Cluster name used in messages
        #[arg(long, env = "CFGPATCH_CLUSTER_NAME", default_value = "cluster")]
        cluster_name: String,

        /// Upper bound in seconds for a single live-state query
        #[arg(
            long,
            env = "CFGPATCH_CONDITION_TIMEOUT",
            default_value_t = DEFAULT_CONDITION_TIMEOUT.as_secs()
        )]
        condition_timeout: u64,

        /// Number of changes checked concurrently
        #[arg(long, env = "CFGPATCH_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
        concurrency: usize,

        /// Output the change-set as JSON
        #[arg(long)]
        json: bool,

        /// Also show the offline update policy level
        #[arg(long)]
        show_level: bool,
    },

    /// List changes and their update policies, without live state
    Diff {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the built-in update policies
    Policies {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match &cli.command {
        Commands::Check {
            inputs,
            live_state,
            cluster_name,
            condition_timeout,
            concurrency,
            json,
            show_level,
        } => {
            let options = CheckOptions {
                condition_timeout: Duration::from_secs(*condition_timeout),
                max_concurrency: *concurrency,
            };
            commands::check::run(
                inputs.inputs(),
                live_state.as_deref(),
                cluster_name,
                options,
                *json,
                *show_level,
            )
            .await
        }

        Commands::Diff { inputs, json } => commands::diff::run(inputs.inputs(), *json),

        Commands::Policies { json } => commands::policies::run(*json),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(code);
        }
    }
}
