//! PEM and SPKI helpers shared by the key loaders.

use base64::Engine;

/// The fixed `SubjectPublicKeyInfo` header of an uncompressed P-256 key:
/// ```text
/// SEQUENCE {
///   SEQUENCE {
///     OID 1.2.840.10045.2.1  (id-ecPublicKey)
///     OID 1.2.840.10045.3.1.7 (prime256v1)
///   }
///   BIT STRING <public key>
/// }
/// ```
#[rustfmt::skip]
pub const P256_SPKI_HEADER: [u8; 26] = [
    0x30, 0x59,                                     // SEQUENCE (89 bytes total)
    0x30, 0x13,                                     // SEQUENCE (19 bytes)
    0x06, 0x07,                                     // OID (7 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01,       // 1.2.840.10045.2.1
    0x06, 0x08,                                     // OID (8 bytes)
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // 1.2.840.10045.3.1.7
    0x03, 0x42, 0x00,                               // BIT STRING (66 bytes, 0 unused bits)
];

/// Length of an uncompressed P-256 point.
const P256_POINT_LEN: usize = 65;

/// Extract DER bytes from the first PEM block in `pem`.
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    pem_blocks(pem).into_iter().next()
}

/// Decode every PEM block in `pem`, in order.
///
/// Certificate chains arrive as concatenated blocks, leaf first. Blocks
/// whose body is not valid base64 are dropped.
pub fn pem_blocks(pem: &str) -> Vec<Vec<u8>> {
    let mut blocks = Vec::new();
    let mut body: Option<String> = None;

    for line in pem.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            body = Some(String::new());
        } else if trimmed.starts_with("-----END ") {
            if let Some(b64) = body.take()
                && let Ok(der) = base64::engine::general_purpose::STANDARD.decode(&b64)
            {
                blocks.push(der);
            }
        } else if let Some(b64) = body.as_mut() {
            b64.push_str(trimmed);
        }
    }

    blocks
}

/// Wrap DER bytes in PEM with the given label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    // base64 output is ASCII, so splitting on byte boundaries is safe
    for chunk in b64.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// Encode a raw P-256 public key (uncompressed point) as SPKI DER.
pub fn encode_p256_spki(pub_key: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(P256_SPKI_HEADER.len() + pub_key.len());
    spki.extend_from_slice(&P256_SPKI_HEADER);
    spki.extend_from_slice(pub_key);
    spki
}

/// The raw EC point of a P-256 SPKI, or `None` for any other key type.
pub fn p256_point(spki_der: &[u8]) -> Option<&[u8]> {
    spki_der
        .strip_prefix(&P256_SPKI_HEADER)
        .filter(|point| point.len() == P256_POINT_LEN)
}
