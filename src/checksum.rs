//! Streaming content-digest verification for model artifacts.
//!
//! Files here are commonly multiple gigabytes, so digests are computed over a
//! fixed 64 KiB buffer: cost is O(file size), memory stays O(1). A digest
//! mismatch is a normal `false` result, not an error; the acquirer treats it
//! as "re-download", not "crash".

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::errors::{ErrorKind, StructuredError, ToStructured};

const BUF_SIZE: usize = 64 * 1024;

/// Digest algorithms accepted in manifests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Md5,
}

impl DigestAlgorithm {
    /// Parse a manifest `checksum_type` string. Unknown names are an error,
    /// never silently accepted.
    pub fn parse(name: &str) -> Result<Self, DigestError> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "md5" => Ok(DigestAlgorithm::Md5),
            other => Err(DigestError::Unsupported {
                algorithm: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
            DigestAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

/// Failures while computing a digest. Mismatches are not failures.
#[derive(Debug, Error, Diagnostic)]
pub enum DigestError {
    #[error("unsupported digest algorithm: {algorithm}")]
    #[diagnostic(
        code(voiceloom::checksum::unsupported),
        help("Supported algorithms are sha256 and md5; fix the manifest's checksum_type.")
    )]
    Unsupported { algorithm: String },

    #[error("failed to read file for digesting")]
    #[diagnostic(code(voiceloom::checksum::io))]
    Io(#[from] std::io::Error),
}

impl ToStructured for DigestError {
    fn to_structured(&self) -> StructuredError {
        match self {
            DigestError::Unsupported { algorithm } => {
                StructuredError::new(ErrorKind::UnsupportedDigest, self.to_string())
                    .with_context("algorithm", json!(algorithm))
                    .with_remediation("use sha256 or md5 in the manifest's checksum_type field")
            }
            DigestError::Io(e) => {
                StructuredError::new(ErrorKind::UnsupportedDigest, self.to_string())
                    .with_context("io_error", json!(e.to_string()))
                    .with_remediation("check that the file exists and is readable")
            }
        }
    }
}

/// Compute the digest of `path`, returned as lowercase hex.
pub fn compute(path: &Path, algorithm: DigestAlgorithm) -> Result<String, DigestError> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; BUF_SIZE];

    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        DigestAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Compare the file at `path` against `expected` (hex, case-insensitive).
///
/// Returns `Ok(false)` on mismatch; only I/O trouble or an unsupported
/// algorithm produce `Err`. Pure with respect to file bytes: re-running on an
/// unmodified file always yields the same answer.
pub fn verify(
    path: &Path,
    expected: &str,
    algorithm: DigestAlgorithm,
) -> Result<bool, DigestError> {
    let actual = compute(path, algorithm)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn sha256_of_known_input() {
        let f = file_with(b"abc");
        let digest = compute(f.path(), DigestAlgorithm::Sha256).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn md5_of_known_input() {
        let f = file_with(b"abc");
        let digest = compute(f.path(), DigestAlgorithm::Md5).unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn verify_is_case_insensitive() {
        let f = file_with(b"abc");
        let ok = verify(
            f.path(),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD",
            DigestAlgorithm::Sha256,
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn mismatch_is_false_not_error() {
        let f = file_with(b"abc");
        let ok = verify(f.path(), "deadbeef", DigestAlgorithm::Sha256).unwrap();
        assert!(!ok);
    }

    #[test]
    fn verify_is_stable_across_reruns() {
        let f = file_with(b"stable bytes");
        let first = compute(f.path(), DigestAlgorithm::Sha256).unwrap();
        let second = compute(f.path(), DigestAlgorithm::Sha256).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(matches!(
            DigestAlgorithm::parse("crc32"),
            Err(DigestError::Unsupported { .. })
        ));
    }
}
