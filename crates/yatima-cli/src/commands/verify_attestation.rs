//! The `yatima verify-attestation` subcommand.
//!
//! Verifies the attestations attached to each image and evaluates the
//! predicates of the requested type against policy.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr, bail};
use yatima_envelope::PredicateKind;
use yatima_verify::fetch::LocalAttestationStore;
use yatima_verify::key::DEFAULT_CERTIFICATE_AUTHORITY;
use yatima_verify::policy::FsPolicyLoader;
use yatima_verify::rekor::{RekorClient, TransparencyLog};
use yatima_verify::{
    CancelSignal, EngineKind, ImageOutcome, KeySource, Orchestrator, RunReport, Services,
    VerifyConfig,
};

use crate::config::{self, FileConfig};

/// Arguments for `yatima verify-attestation`.
#[derive(Args)]
pub struct VerifyAttestationArgs {
    /// Image references to verify.
    #[arg(required = true, value_name = "IMAGE")]
    pub images: Vec<String>,

    /// Public key (PEM file). Without a key, keyless verification is used.
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Predicate type to evaluate: custom, link, slsaprovenance or spdx.
    #[arg(long = "type", value_name = "TYPE")]
    pub predicate_type: Option<PredicateKind>,

    /// Policy file to evaluate (repeatable; JSON constraints or .rego).
    #[arg(long = "policy", value_name = "PATH")]
    pub policies: Vec<PathBuf>,

    /// Policy engine: constraints or rego (default: by file extension).
    #[arg(long, value_name = "ENGINE")]
    pub policy_engine: Option<EngineKind>,

    /// Directory of stored attestations (`<image>.jsonl` files).
    #[arg(long, value_name = "DIR")]
    pub attestations: Option<PathBuf>,

    /// Require statement subjects to carry the image digest.
    #[arg(long)]
    pub check_claims: bool,

    /// Enable experimental features (keyless verification, transparency log).
    #[arg(
        long,
        env = "YATIMA_EXPERIMENTAL",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub experimental: bool,

    /// Transparency log to confirm attestations against.
    #[arg(long, value_name = "URL")]
    pub rekor_url: Option<String>,

    /// Root certificates (PEM) for keyless verification.
    #[arg(long, value_name = "PATH")]
    pub root_certs: Option<PathBuf>,

    /// Certificate authority that issues keyless signing certificates.
    #[arg(long, value_name = "URL")]
    pub certificate_authority: Option<String>,

    /// Fail images that have no verified attestation.
    #[arg(long)]
    pub require_verified: bool,

    /// Fail images that have no verified attestation of the requested type.
    #[arg(long)]
    pub require_decision: bool,

    /// Give up after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Configuration file (default: ~/.config/yatima/config.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Merge flags over file settings into a library configuration.
fn build_config(args: &VerifyAttestationArgs, file: &FileConfig) -> Result<VerifyConfig> {
    let experimental = args.experimental || file.experimental;

    let key = match args.key.as_ref().or(file.key.as_ref()) {
        Some(path) => KeySource::public_key_file(path)?,
        None => KeySource::EphemeralCertificate {
            authority: args
                .certificate_authority
                .clone()
                .or_else(|| file.certificate_authority.clone())
                .unwrap_or_else(|| DEFAULT_CERTIFICATE_AUTHORITY.to_owned()),
        },
    };

    let predicate_kind = match (&args.predicate_type, &file.predicate_type) {
        (Some(kind), _) => *kind,
        (None, Some(name)) => name.parse()?,
        (None, None) => PredicateKind::Custom,
    };

    let policies = if args.policies.is_empty() {
        &file.policy
    } else {
        &args.policies
    };

    let root_certificates = match args.root_certs.as_ref().or(file.root_certs.as_ref()) {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read root certificates {}", path.display()))?,
        ),
        None => None,
    };

    Ok(VerifyConfig {
        key,
        experimental,
        check_claims: args.check_claims || file.check_claims,
        predicate_kind,
        policy_sources: policies
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        transparency_log_url: args.rekor_url.clone().or_else(|| file.rekor_url.clone()),
        root_certificates,
        require_verified: args.require_verified || file.require_verified,
        require_decision: args.require_decision || file.require_decision,
    })
}

/// Execute the verify-attestation command.
pub fn execute(args: VerifyAttestationArgs) -> Result<()> {
    let file = config::load(args.config.as_deref())?;
    let config = build_config(&args, &file)?;

    let Some(store) = args.attestations.clone().or_else(|| file.attestations.clone()) else {
        bail!("no attestation source; pass --attestations <DIR> or set `attestations` in the config file");
    };

    let engine = args
        .policy_engine
        .or(file.policy_engine)
        .unwrap_or_else(|| EngineKind::detect(&config.policy_sources));

    let transparency_log: Option<Box<dyn TransparencyLog>> = match &config.transparency_log_url {
        Some(_) => Some(Box::new(RekorClient::new()?)),
        None => None,
    };

    let services = Services {
        fetcher: Box::new(LocalAttestationStore::new(store)),
        policy_loader: Box::new(FsPolicyLoader),
        evaluator: engine.evaluator(),
        transparency_log,
        token_driver: None,
    };

    let cancel = args
        .timeout
        .map_or_else(CancelSignal::new, |secs| {
            CancelSignal::with_timeout(Duration::from_secs(secs))
        });

    let orchestrator = Orchestrator::new(config, services)?;
    let report = orchestrator.run(&args.images, &cancel)?;

    if args.json {
        let mut json = serde_json::to_value(&report)?;
        json["passed"] = serde_json::Value::Bool(report.passed());
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        print_report(&report);
    }

    if !report.passed() {
        process::exit(1);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    let header = &report.header;
    for image in &report.images {
        println!("Verification for {} --", image.image);
        println!("The following checks were performed on each of these signatures:");
        if header.claims_checked {
            println!("  - The claims were validated against the image digest");
        }
        if image.bundle_verified {
            println!("  - Existence of the claims in the transparency log was verified");
        }
        println!("  - The signatures were verified against the {}", header.key);

        for envelope in &image.envelopes {
            if let Some(payload) = &envelope.payload {
                println!("{payload}");
            }
        }

        for decision in &image.decisions {
            let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
            match &decision.reason {
                Some(reason) => println!("[{verdict}] {}: {reason}", decision.envelope),
                None => println!("[{verdict}] {}", decision.envelope),
            }
        }

        let (icon, msg) = match &image.outcome {
            ImageOutcome::Allowed => (
                "PASS",
                format!(
                    "{} verified, {} of type {}",
                    image.verified_count, image.matched_count, header.predicate_kind
                ),
            ),
            ImageOutcome::Denied { reason } => ("FAIL", reason.clone()),
            ImageOutcome::Error { reason } => ("ERROR", reason.clone()),
        };
        println!("[{icon}] {}: {msg}", image.image);
        println!();
    }

    if report.cancelled {
        println!("Verification CANCELLED");
    } else if report.passed() {
        println!("Verification PASSED");
    } else {
        println!("Verification FAILED");
    }
}
