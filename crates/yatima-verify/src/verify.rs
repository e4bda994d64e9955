//! Top-level verification orchestrator.
//!
//! The `Orchestrator` runs attestation verification, predicate dispatch
//! and policy evaluation for each image in turn and collects the results
//! into a `RunReport`.

use serde::Serialize;
use tracing::{debug, info, warn};
use yatima_envelope::{Dispatch, PredicateKind, decode_predicate};

use crate::attestation::{CheckOptions, LogCheck, VerifiedEnvelope, verify_attestations};
use crate::cancel::CancelSignal;
use crate::claims::{ClaimVerifier, SubjectDigestClaimVerifier};
use crate::error::{PolicyError, VerificationError};
use crate::fetch::AttestationFetcher;
use crate::key::{KeyContext, KeySource, resolve_key};
use crate::policy::{PolicyDecision, PolicyEvaluator, PolicySource, PolicySourceLoader};
use crate::rekor::TransparencyLog;
use crate::token::TokenDriver;

/// Configuration for a verification run.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Where the verification key comes from.
    pub key: KeySource,
    /// Allow experimental features (keyless keys, transparency log).
    pub experimental: bool,
    /// Require statement subjects to name the image digest.
    pub check_claims: bool,
    /// Predicate kind to evaluate.
    pub predicate_kind: PredicateKind,
    /// Policy source locations; empty means verification only.
    pub policy_sources: Vec<String>,
    /// Transparency log to confirm envelopes against.
    pub transparency_log_url: Option<String>,
    /// PEM roots for keyless verification.
    pub root_certificates: Option<String>,
    /// Treat an image without verified attestations as a failure.
    pub require_verified: bool,
    /// Treat an image without an attestation of `predicate_kind` as a failure.
    pub require_decision: bool,
}

impl VerifyConfig {
    /// Configuration with defaults for everything but the key.
    pub const fn new(key: KeySource) -> Self {
        Self {
            key,
            experimental: false,
            check_claims: false,
            predicate_kind: PredicateKind::Custom,
            policy_sources: Vec::new(),
            transparency_log_url: None,
            root_certificates: None,
            require_verified: false,
            require_decision: false,
        }
    }
}

/// Collaborators the orchestrator calls out to.
pub struct Services {
    /// Source of attestations.
    pub fetcher: Box<dyn AttestationFetcher>,
    /// Reads policy documents.
    pub policy_loader: Box<dyn PolicySourceLoader>,
    /// Evaluates predicates.
    pub evaluator: Box<dyn PolicyEvaluator>,
    /// Transparency log client, needed when a log URL is configured.
    pub transparency_log: Option<Box<dyn TransparencyLog>>,
    /// Hardware token driver, needed for token keys.
    pub token_driver: Option<Box<dyn TokenDriver>>,
}

/// How an image fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOutcome {
    /// Every evaluated attestation was allowed.
    Allowed,
    /// A policy or strictness check rejected the image.
    Denied {
        /// Why.
        reason: String,
    },
    /// The image could not be evaluated.
    Error {
        /// What went wrong.
        reason: String,
    },
}

/// One verified envelope as seen by dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeSummary {
    /// `sha256:<hex>` of the envelope.
    pub digest: String,
    /// The statement's predicate type, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate_type: Option<String>,
    /// Why dispatch passed over the envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// Decoded statement payload.
    #[serde(skip)]
    pub payload: Option<String>,
}

/// Results for one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    /// The image reference.
    pub image: String,
    /// Envelopes that passed verification.
    pub verified_count: usize,
    /// Envelopes dropped during verification.
    pub rejected_count: usize,
    /// Whether the transparency log confirmed the verified envelopes.
    pub bundle_verified: bool,
    /// Verified envelopes carrying the requested predicate kind.
    pub matched_count: usize,
    /// Per-envelope dispatch results.
    pub envelopes: Vec<EnvelopeSummary>,
    /// Policy decisions, in evaluation order.
    pub decisions: Vec<PolicyDecision>,
    /// Final classification.
    pub outcome: ImageOutcome,
}

impl ImageReport {
    fn new(image: &str) -> Self {
        Self {
            image: image.to_owned(),
            verified_count: 0,
            rejected_count: 0,
            bundle_verified: false,
            matched_count: 0,
            envelopes: Vec::new(),
            decisions: Vec::new(),
            outcome: ImageOutcome::Allowed,
        }
    }

    /// Whether the image passed.
    pub const fn allowed(&self) -> bool {
        matches!(self.outcome, ImageOutcome::Allowed)
    }
}

/// What the run checked, for the report header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportHeader {
    /// The key source used.
    pub key: String,
    /// Whether statement claims were checked.
    pub claims_checked: bool,
    /// The transparency log consulted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency_log: Option<String>,
    /// The predicate kind evaluated.
    pub predicate_kind: PredicateKind,
    /// The policy engine used, when policies were given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_engine: Option<&'static str>,
}

/// The result of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// What was checked.
    pub header: ReportHeader,
    /// Per-image results, in input order.
    pub images: Vec<ImageReport>,
    /// Whether the run stopped early.
    pub cancelled: bool,
}

impl RunReport {
    /// `true` only if the run completed and every image was allowed.
    pub fn passed(&self) -> bool {
        !self.cancelled && !self.images.is_empty() && self.images.iter().all(ImageReport::allowed)
    }
}

/// Drives verification of a list of images.
pub struct Orchestrator {
    config: VerifyConfig,
    check: CheckOptions,
    fetcher: Box<dyn AttestationFetcher>,
    policy_loader: Box<dyn PolicySourceLoader>,
    evaluator: Box<dyn PolicyEvaluator>,
}

impl Orchestrator {
    /// Validate the configuration and resolve the key.
    ///
    /// Every configuration error surfaces here, before anything is fetched.
    pub fn new(config: VerifyConfig, services: Services) -> Result<Self, VerificationError> {
        let Services {
            fetcher,
            policy_loader,
            evaluator,
            transparency_log,
            token_driver,
        } = services;

        let transparency_log = match &config.transparency_log_url {
            None => None,
            Some(_) if !config.experimental => {
                return Err(VerificationError::Configuration(
                    "transparency log lookups are experimental; enable the experimental flag"
                        .to_owned(),
                ));
            }
            Some(url) => Some(LogCheck {
                endpoint: url.clone(),
                client: transparency_log.ok_or_else(|| {
                    VerificationError::Configuration(
                        "a transparency log URL was given without a log client".to_owned(),
                    )
                })?,
            }),
        };

        let ctx = KeyContext {
            experimental: config.experimental,
            root_certificates: config.root_certificates.as_deref(),
            token_driver: token_driver.as_deref(),
        };
        let sig_verifier = resolve_key(&config.key, &ctx)?;

        let claim_verifier: Option<Box<dyn ClaimVerifier>> = config
            .check_claims
            .then(|| Box::new(SubjectDigestClaimVerifier) as Box<dyn ClaimVerifier>);

        Ok(Self {
            check: CheckOptions {
                sig_verifier,
                claim_verifier,
                transparency_log,
            },
            config,
            fetcher,
            policy_loader,
            evaluator,
        })
    }

    /// Report header describing this run.
    pub fn header(&self) -> ReportHeader {
        ReportHeader {
            key: self.config.key.describe(),
            claims_checked: self.config.check_claims,
            transparency_log: self.config.transparency_log_url.clone(),
            predicate_kind: self.config.predicate_kind,
            policy_engine: (!self.config.policy_sources.is_empty()).then(|| self.evaluator.name()),
        }
    }

    /// Verify every image, in order.
    pub fn run(&self, images: &[String], cancel: &CancelSignal) -> Result<RunReport, VerificationError> {
        if images.is_empty() {
            return Err(VerificationError::Configuration("no images given".to_owned()));
        }

        let mut report = RunReport {
            header: self.header(),
            images: Vec::with_capacity(images.len()),
            cancelled: false,
        };

        for image in images {
            let mut image_report = ImageReport::new(image);
            match self.verify_image(image, &mut image_report, cancel) {
                Ok(()) => {
                    info!(image = %image, decisions = image_report.decisions.len(), "image allowed");
                }
                Err(VerificationError::Cancelled) => {
                    warn!(image = %image, "verification cancelled");
                    image_report.outcome = ImageOutcome::Error {
                        reason: VerificationError::Cancelled.to_string(),
                    };
                    report.images.push(image_report);
                    report.cancelled = true;
                    break;
                }
                Err(e) if e.is_denial() => {
                    warn!(image = %image, error = %e, "image denied");
                    image_report.outcome = ImageOutcome::Denied {
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "image verification failed");
                    image_report.outcome = ImageOutcome::Error {
                        reason: e.to_string(),
                    };
                }
            }
            report.images.push(image_report);
        }

        Ok(report)
    }

    fn verify_image(
        &self,
        image: &str,
        report: &mut ImageReport,
        cancel: &CancelSignal,
    ) -> Result<(), VerificationError> {
        let result = verify_attestations(image, self.fetcher.as_ref(), &self.check, cancel)?;
        report.verified_count = result.verified.len();
        report.rejected_count = result.rejected;
        report.bundle_verified = result.bundle_verified;

        if self.config.require_verified && result.verified.is_empty() {
            return Err(VerificationError::NoVerifiedAttestations {
                image: image.to_owned(),
            });
        }

        let mut sources: Option<Vec<PolicySource>> = None;
        for verified in &result.verified {
            let dispatch = decode_predicate(&verified.envelope, self.config.predicate_kind)
                .map_err(|source| VerificationError::Decode {
                    image: image.to_owned(),
                    envelope: verified.digest.clone(),
                    source,
                })?;
            report.envelopes.push(summarize(verified, &dispatch));

            let Some(statement) = dispatch.matched() else {
                debug!(
                    image,
                    envelope = %verified.digest,
                    reason = %dispatch.skip_reason().unwrap_or_default(),
                    "skipping attestation"
                );
                continue;
            };
            report.matched_count += 1;

            if self.config.policy_sources.is_empty() {
                continue;
            }

            let predicate_json = statement.predicate.to_json().map_err(|source| {
                VerificationError::Decode {
                    image: image.to_owned(),
                    envelope: verified.digest.clone(),
                    source,
                }
            })?;

            if sources.is_none() {
                sources = Some(self.load_sources(image, &verified.digest, cancel)?);
            }
            let loaded = sources.as_deref().unwrap_or_default();
            self.evaluate(image, verified, &predicate_json, loaded, report)?;
        }

        if self.config.require_decision && report.matched_count == 0 {
            return Err(VerificationError::NoMatchingPredicate {
                image: image.to_owned(),
                kind: self.config.predicate_kind,
            });
        }
        Ok(())
    }

    fn source_list(&self) -> String {
        self.config.policy_sources.join(", ")
    }

    fn load_sources(
        &self,
        image: &str,
        envelope: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<PolicySource>, VerificationError> {
        self.config
            .policy_sources
            .iter()
            .map(|location| {
                cancel.check()?;
                let contents = self.policy_loader.load(location).map_err(|e| {
                    VerificationError::PolicySource {
                        image: image.to_owned(),
                        envelope: envelope.to_owned(),
                        sources: self.source_list(),
                        reason: e.to_string(),
                    }
                })?;
                debug!(location = %location, "loaded policy source");
                Ok(PolicySource {
                    location: location.clone(),
                    contents,
                })
            })
            .collect()
    }

    fn evaluate(
        &self,
        image: &str,
        verified: &VerifiedEnvelope,
        predicate_json: &[u8],
        sources: &[PolicySource],
        report: &mut ImageReport,
    ) -> Result<(), VerificationError> {
        let locations: Vec<String> = sources.iter().map(|s| s.location.clone()).collect();
        match self.evaluator.evaluate(predicate_json, sources) {
            Ok(()) => {
                info!(
                    image,
                    envelope = %verified.digest,
                    engine = self.evaluator.name(),
                    "policy allowed attestation"
                );
                report.decisions.push(PolicyDecision {
                    envelope: verified.digest.clone(),
                    allowed: true,
                    reason: None,
                    sources: locations,
                });
                Ok(())
            }
            Err(e @ (PolicyError::Denied { .. } | PolicyError::Input(_))) => {
                let reason = e.to_string();
                report.decisions.push(PolicyDecision {
                    envelope: verified.digest.clone(),
                    allowed: false,
                    reason: Some(reason.clone()),
                    sources: locations,
                });
                Err(VerificationError::PolicyDenied {
                    image: image.to_owned(),
                    envelope: verified.digest.clone(),
                    sources: self.source_list(),
                    reason,
                })
            }
            Err(e @ PolicyError::Source { .. }) => Err(VerificationError::PolicySource {
                image: image.to_owned(),
                envelope: verified.digest.clone(),
                sources: self.source_list(),
                reason: e.to_string(),
            }),
        }
    }
}

fn summarize(verified: &VerifiedEnvelope, dispatch: &Dispatch) -> EnvelopeSummary {
    let predicate_type = match dispatch {
        Dispatch::Matched(statement) => Some(statement.predicate.kind().uri().to_owned()),
        Dispatch::OtherKind { kind } => Some(kind.uri().to_owned()),
        Dispatch::Unsupported { predicate_type } => Some(predicate_type.clone()),
        Dispatch::PayloadTypeMismatch { .. } => None,
    };
    let payload = verified
        .envelope
        .decode_payload()
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    EnvelopeSummary {
        digest: verified.digest.clone(),
        predicate_type,
        skipped: dispatch.skip_reason(),
        payload,
    }
}
