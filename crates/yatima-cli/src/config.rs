//! Optional TOML configuration file.
//!
//! Resolution order:
//! 1. The path given with `--config` (must exist)
//! 2. `config.toml` in the XDG config dir (`~/.config/yatima/`)
//!
//! Command-line flags override every value read from the file.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use yatima_verify::EngineKind;

/// Settings that may be kept in the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// PEM public key.
    pub(crate) key: Option<PathBuf>,
    /// Directory of stored attestations.
    pub(crate) attestations: Option<PathBuf>,
    /// Predicate type name.
    #[serde(rename = "type")]
    pub(crate) predicate_type: Option<String>,
    /// Policy files.
    pub(crate) policy: Vec<PathBuf>,
    /// Policy engine; detected from file extensions when absent.
    pub(crate) policy_engine: Option<EngineKind>,
    /// Allow experimental features.
    pub(crate) experimental: bool,
    /// Check subject digests against the image digest.
    pub(crate) check_claims: bool,
    /// Transparency log base URL.
    pub(crate) rekor_url: Option<String>,
    /// PEM roots for keyless verification.
    pub(crate) root_certs: Option<PathBuf>,
    /// Issuing authority for keyless verification.
    pub(crate) certificate_authority: Option<String>,
    /// Fail images without verified attestations.
    pub(crate) require_verified: bool,
    /// Fail images without an attestation of the requested type.
    pub(crate) require_decision: bool,
}

fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "yatima", "yatima")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load the configuration file, or defaults when there is none.
pub(crate) fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    parse(&content).wrap_err_with(|| format!("invalid config {}", path.display()))
}

fn parse(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}
