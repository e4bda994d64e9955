//! Transparency log lookups.
//!
//! [`RekorClient`] asks a Rekor instance, through a [`RekorApi`], whether
//! an envelope was logged: an index search by the envelope's SHA-256, then
//! a fetch of each matching entry. An entry counts when it has a log index, a positive
//! integration time and either an inclusion proof or a signed entry
//! timestamp. Neither the proof nor the timestamp signature is checked
//! against the log's key.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use tracing::{debug, warn};
use yatima_envelope::envelope::envelope_digest;

use crate::error::LogError;

/// Looks up envelopes in a transparency log.
pub trait TransparencyLog: Send + Sync {
    /// `Ok(true)` when `envelope` has a well-formed entry at `endpoint`,
    /// `Ok(false)` when it has none. `Err` means the log could not be
    /// consulted.
    fn check_inclusion(&self, envelope: &[u8], endpoint: &str) -> Result<bool, LogError>;
}

/// The two Rekor REST calls a lookup needs.
pub trait RekorApi: Send + Sync {
    /// UUIDs of entries whose artifact hash is `hash`.
    fn search_index(&self, base: &str, hash: &str) -> Result<Vec<String>, LogError>;

    /// Raw body of entry `uuid`, or `None` if the log has no such entry.
    fn fetch_entry(&self, base: &str, uuid: &str) -> Result<Option<String>, LogError>;
}

/// [`RekorApi`] over blocking HTTP.
#[derive(Debug, Clone)]
pub struct HttpRekorApi {
    http: reqwest::blocking::Client,
}

/// Minimal Rekor client.
#[derive(Debug, Clone)]
pub struct RekorClient<A = HttpRekorApi> {
    api: A,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    log_index: Option<i64>,
    integrated_time: Option<i64>,
    #[serde(rename = "logID")]
    log_id: Option<String>,
    verification: Option<EntryVerification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryVerification {
    inclusion_proof: Option<serde_json::Value>,
    signed_entry_timestamp: Option<String>,
}

impl LogEntry {
    fn is_well_formed(&self) -> bool {
        let Some(log_index) = self.log_index else {
            return false;
        };
        let Some(integrated) = self.integrated_time.filter(|t| *t > 0) else {
            return false;
        };
        let Some(verification) = &self.verification else {
            return false;
        };
        if verification.inclusion_proof.is_none() && verification.signed_entry_timestamp.is_none() {
            return false;
        }

        let integrated_at = DateTime::from_timestamp(integrated, 0)
            .map_or_else(|| integrated.to_string(), |t| t.to_rfc3339());
        debug!(
            log_index,
            log_id = self.log_id.as_deref().unwrap_or(""),
            integrated_at,
            "transparency log entry found"
        );
        true
    }
}

/// Parse an entry-fetch response (`{"<uuid>": {entry}}`) and report
/// whether any entry is well-formed.
fn entries_contain_valid(body: &str) -> Result<bool, LogError> {
    let entries: BTreeMap<String, LogEntry> =
        serde_json::from_str(body).map_err(|e| LogError::Malformed(e.to_string()))?;
    Ok(entries.values().any(LogEntry::is_well_formed))
}

fn normalize_endpoint(endpoint: &str) -> Result<&str, LogError> {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Ok(trimmed)
    } else {
        Err(LogError::Endpoint(endpoint.to_owned()))
    }
}

impl HttpRekorApi {
    /// Build with a 30 second request timeout.
    pub fn new() -> Result<Self, LogError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("yatima/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

impl RekorApi for HttpRekorApi {
    fn search_index(&self, base: &str, hash: &str) -> Result<Vec<String>, LogError> {
        let uuids: Vec<String> = self
            .http
            .post(format!("{base}/api/v1/index/retrieve"))
            .json(&serde_json::json!({ "hash": hash }))
            .send()?
            .error_for_status()?
            .json()?;
        Ok(uuids)
    }

    fn fetch_entry(&self, base: &str, uuid: &str) -> Result<Option<String>, LogError> {
        let resp = self
            .http
            .get(format!("{base}/api/v1/log/entries/{uuid}"))
            .send()?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.text()?))
    }
}

impl RekorClient {
    /// Client talking HTTP to the log.
    pub fn new() -> Result<Self, LogError> {
        Ok(Self::with_api(HttpRekorApi::new()?))
    }
}

impl<A: RekorApi> RekorClient<A> {
    /// Client issuing its calls through `api`.
    pub const fn with_api(api: A) -> Self {
        Self { api }
    }
}

impl<A: RekorApi> TransparencyLog for RekorClient<A> {
    fn check_inclusion(&self, envelope: &[u8], endpoint: &str) -> Result<bool, LogError> {
        let base = normalize_endpoint(endpoint)?;
        let hash = envelope_digest(envelope);

        let uuids = self.api.search_index(base, &hash)?;
        if uuids.is_empty() {
            debug!(%hash, "no transparency log entry for envelope");
            return Ok(false);
        }

        for uuid in &uuids {
            let Some(body) = self.api.fetch_entry(base, uuid)? else {
                warn!(%uuid, "indexed transparency log entry not found");
                continue;
            };
            if entries_contain_valid(&body)? {
                return Ok(true);
            }
            warn!(%uuid, "transparency log entry is incomplete");
        }
        Ok(false)
    }
}
