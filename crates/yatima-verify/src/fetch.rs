//! Attestation fetch collaborators.
//!
//! Registry access is behind [`AttestationFetcher`]. The bundled
//! [`LocalAttestationStore`] reads what `cosign download attestation`
//! writes: one DSSE envelope per line.

use std::path::PathBuf;

use tracing::debug;

use crate::error::FetchError;

/// One attestation as attached to an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAttestation {
    /// The DSSE envelope JSON, exactly as stored.
    pub envelope: Vec<u8>,
    /// PEM certificate chain (leaf first) for keyless signatures.
    pub certificate_chain: Option<String>,
}

/// Everything fetched for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttestationSet {
    /// Resolved image digest (`sha256:<hex>`), when known.
    pub image_digest: Option<String>,
    /// Attached attestations, in storage order.
    pub attestations: Vec<FetchedAttestation>,
}

/// Obtains the attestations attached to an image.
pub trait AttestationFetcher: Send + Sync {
    /// Fetch all attestations for `image`. An image without attestations
    /// yields an empty set.
    fn fetch_attestations(&self, image: &str) -> Result<AttestationSet, FetchError>;
}

/// Attestations stored on disk, one `.jsonl` file per image.
///
/// For `example.com/app:v1` the store reads
/// `<root>/example.com_app_v1.jsonl` and, if present, the image digest
/// from `<root>/example.com_app_v1.digest`. A line may also be a JSON
/// object `{"envelope": {...}, "certificateChain": "..."}` to carry a
/// keyless certificate chain alongside the envelope.
#[derive(Debug, Clone)]
pub struct LocalAttestationStore {
    root: PathBuf,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredLine {
    envelope: Box<serde_json::value::RawValue>,
    certificate_chain: Option<String>,
}

impl LocalAttestationStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File stem used for `image`.
    pub fn file_stem(image: &str) -> String {
        image.replace(['/', ':', '@'], "_")
    }

    fn parse_line(line: &str) -> FetchedAttestation {
        // Wrapped lines carry a certificate chain; anything else is taken
        // to be the bare envelope.
        match serde_json::from_str::<StoredLine>(line) {
            Ok(stored) => FetchedAttestation {
                envelope: stored.envelope.get().as_bytes().to_vec(),
                certificate_chain: stored.certificate_chain,
            },
            Err(_) => FetchedAttestation {
                envelope: line.as_bytes().to_vec(),
                certificate_chain: None,
            },
        }
    }
}

impl AttestationFetcher for LocalAttestationStore {
    fn fetch_attestations(&self, image: &str) -> Result<AttestationSet, FetchError> {
        if image.trim().is_empty() {
            return Err(FetchError::InvalidReference(image.to_owned()));
        }
        let stem = Self::file_stem(image);

        let envelopes_path = self.root.join(format!("{stem}.jsonl"));
        let attestations = match std::fs::read_to_string(&envelopes_path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(Self::parse_line)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let digest_path = self.root.join(format!("{stem}.digest"));
        let image_digest = match std::fs::read_to_string(&digest_path) {
            Ok(digest) => Some(digest.trim().to_owned()).filter(|d| !d.is_empty()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        debug!(
            image,
            path = %envelopes_path.display(),
            count = attestations.len(),
            "read attestations from local store"
        );
        Ok(AttestationSet {
            image_digest,
            attestations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_flattens_reference() {
        assert_eq!(
            LocalAttestationStore::file_stem("example.com/app:v1"),
            "example.com_app_v1"
        );
        assert_eq!(
            LocalAttestationStore::file_stem("registry.io/ns/app@sha256:abc"),
            "registry.io_ns_app_sha256_abc"
        );
    }

    #[test]
    fn missing_file_is_an_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAttestationStore::new(dir.path());
        let set = store.fetch_attestations("example.com/app:v1").unwrap();
        assert!(set.attestations.is_empty());
        assert!(set.image_digest.is_none());
    }

    #[test]
    fn reads_envelopes_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("example.com_app_v1.jsonl"),
            "{\"payloadType\":\"a\",\"payload\":\"\",\"signatures\":[]}\n\n{\"payloadType\":\"b\",\"payload\":\"\",\"signatures\":[]}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("example.com_app_v1.digest"), "sha256:abcd\n").unwrap();

        let store = LocalAttestationStore::new(dir.path());
        let set = store.fetch_attestations("example.com/app:v1").unwrap();
        assert_eq!(set.attestations.len(), 2);
        assert_eq!(set.image_digest.as_deref(), Some("sha256:abcd"));
        assert!(set.attestations[0].certificate_chain.is_none());
        assert!(
            String::from_utf8_lossy(&set.attestations[1].envelope).contains("\"b\"")
        );
    }

    #[test]
    fn wrapped_line_carries_certificate_chain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.jsonl"),
            r#"{"envelope":{"payloadType":"a","payload":"","signatures":[]},"certificateChain":"-----BEGIN CERTIFICATE-----"}"#,
        )
        .unwrap();

        let set = LocalAttestationStore::new(dir.path())
            .fetch_attestations("app")
            .unwrap();
        assert_eq!(set.attestations.len(), 1);
        let att = &set.attestations[0];
        assert_eq!(
            att.envelope,
            br#"{"payloadType":"a","payload":"","signatures":[]}"#.to_vec()
        );
        assert_eq!(
            att.certificate_chain.as_deref(),
            Some("-----BEGIN CERTIFICATE-----")
        );
    }

    #[test]
    fn empty_reference_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalAttestationStore::new(dir.path());
        assert!(matches!(
            store.fetch_attestations("  "),
            Err(FetchError::InvalidReference(_))
        ));
    }
}
