//! Yatima CLI: verify the attestations attached to container images.
//!
//! Checks DSSE-signed in-toto attestations against a key and evaluates
//! their predicates against policy.

mod commands;
mod config;

use clap::Parser;
use color_eyre::eyre::Result;

/// Yatima: verify container image attestations.
///
/// Checks the signatures on in-toto attestations attached to images and
/// evaluates their predicates against JSON constraint or Rego policies.
/// Named after the Yatima citizen in Greg Egan's "Diaspora".
#[derive(Parser)]
#[command(name = "yatima", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Verify image attestations and evaluate their predicates against policy.
    VerifyAttestation(commands::verify_attestation::VerifyAttestationArgs),
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::VerifyAttestation(args) => commands::verify_attestation::execute(args),
    }
}
