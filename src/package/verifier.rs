//! Offline package verification.
//!
//! Needs nothing but the archive and the signer's public key. Every check runs and every
//! failure is reported; verification never stops at the first problem.
//!
//! ```text
//! verify_package(archive, public_key)
//!     |-- parse manifest.json, check algorithms
//!     |-- verify manifest.sig over the exact manifest bytes (fail closed)
//!     |-- recompute the digest of every listed file
//!     `-- re-verify every listed custody chain
//! ```

use super::signing::verify_signature;
use super::{PackageArchive, PackageManifest, MANIFEST_PATH, SIGNATURE_ALGO, SIGNATURE_PATH};
use crate::custody::{verify_chain, CustodyEvent};
use crate::hash::HASH_ALGO;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Digest check of one listed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCheck {
    pub path: String,
    pub expected: String,
    /// Empty when the file is missing from the archive.
    pub actual: String,
    pub ok: bool,
}

/// Result of verifying a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub signature_ok: bool,
    pub files: Vec<FileCheck>,
    /// Structural and signature problems.
    pub errors: Vec<String>,
}

/// Verify a package against `public_key`.
///
/// Without a public key the signature cannot be checked and `signature_ok` is false.
pub fn verify_package(archive: &PackageArchive, public_key: Option<&[u8]>) -> VerificationReport {
    let mut report = VerificationReport::default();

    let Some(manifest_bytes) = archive.get(MANIFEST_PATH) else {
        report.errors.push(format!("{} is missing", MANIFEST_PATH));
        return report;
    };
    let manifest = match PackageManifest::from_bytes(manifest_bytes) {
        Ok(manifest) => manifest,
        Err(e) => {
            report.errors.push(format!("{} is invalid: {}", MANIFEST_PATH, e));
            return report;
        }
    };

    if manifest.hash_algo != HASH_ALGO {
        report
            .errors
            .push(format!("unsupported hash_algo {:?}", manifest.hash_algo));
    }
    if manifest.signature_algo != SIGNATURE_ALGO {
        report
            .errors
            .push(format!("unsupported signature_algo {:?}", manifest.signature_algo));
    }

    report.signature_ok = check_signature(archive, manifest_bytes, public_key, &mut report.errors);

    let mut listed = BTreeSet::new();
    for entry in &manifest.files {
        if !listed.insert(entry.path.as_str()) {
            report.errors.push(format!("{} is listed twice", entry.path));
        }

        let actual = archive
            .get(&entry.path)
            .map(crate::hash::sha256_hex)
            .unwrap_or_default();
        let ok = !actual.is_empty() && crate::hash::digests_equal(&actual, &entry.sha256_hex);
        report.files.push(FileCheck {
            path: entry.path.clone(),
            expected: entry.sha256_hex.clone(),
            actual,
            ok,
        });

        if entry.path.starts_with("custody/") && entry.path.ends_with(".json") {
            if let Some(bytes) = archive.get(&entry.path) {
                check_custody(&entry.path, bytes, &mut report.errors);
            }
        }
    }

    for path in archive.paths() {
        if path != MANIFEST_PATH && path != SIGNATURE_PATH && !listed.contains(path) {
            report.errors.push(format!("{} is not listed in the manifest", path));
        }
    }

    report.ok =
        report.signature_ok && report.errors.is_empty() && report.files.iter().all(|f| f.ok);
    report
}

fn check_signature(
    archive: &PackageArchive,
    manifest_bytes: &[u8],
    public_key: Option<&[u8]>,
    errors: &mut Vec<String>,
) -> bool {
    let Some(public_key) = public_key else {
        errors.push("no public key supplied; signature not verified".to_string());
        return false;
    };
    let Some(encoded) = archive.get(SIGNATURE_PATH) else {
        errors.push(format!("{} is missing", SIGNATURE_PATH));
        return false;
    };
    let signature = match std::str::from_utf8(encoded)
        .ok()
        .and_then(|text| STANDARD.decode(text.trim()).ok())
    {
        Some(signature) => signature,
        None => {
            errors.push(format!("{} is not valid base64", SIGNATURE_PATH));
            return false;
        }
    };
    if !verify_signature(public_key, manifest_bytes, &signature) {
        errors.push("manifest signature does not verify".to_string());
        return false;
    }
    true
}

fn check_custody(path: &str, bytes: &[u8], errors: &mut Vec<String>) {
    let events: Vec<CustodyEvent> = match serde_json::from_slice(bytes) {
        Ok(events) => events,
        Err(e) => {
            errors.push(format!("{} is not a custody chain: {}", path, e));
            return;
        }
    };
    let chain = verify_chain(&events);
    for issue in chain.issues {
        errors.push(format!(
            "{}: event {} (seq {}): {:?}: {}",
            path, issue.index, issue.seq, issue.kind, issue.detail
        ));
    }
}
