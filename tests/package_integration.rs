//! Package export and offline verification across the filesystem.

mod common;

use common::*;
use warden::custody::CustodyAction;
use warden::package::{verify_package, EvidenceFilter, PackageArchive, MANIFEST_PATH};
use warden::Severity;

#[tokio::test]
async fn test_package_round_trip_through_directory() {
    let env = TestWarden::new().await;
    let first = env.ingest(Some("inc-1"), Severity::Medium).await;
    let second = env.ingest(Some("inc-2"), Severity::High).await;

    let result = env
        .warden
        .packages
        .build(FAMILY, &EvidenceFilter::default(), &guardian(), &|_| {})
        .await
        .unwrap();
    assert!(result.skipped.is_empty());
    // Two evidence files and two custody chains.
    assert_eq!(result.file_count, 4);

    let archive = PackageArchive::load_from_store(env.warden.objects.as_ref(), &result.storage_key)
        .await
        .unwrap();
    let out_dir = env.temp_dir.path().join("export");
    archive.write_to_dir(&out_dir).await.unwrap();

    let reread = PackageArchive::read_from_dir(&out_dir).await.unwrap();
    let report = verify_package(&reread, Some(&env.warden.keyring.public_key()));
    assert!(report.ok, "report: {:?}", report);
    assert!(report.signature_ok);
    assert_eq!(report.files.len(), 4);

    // The export itself is recorded in each item's chain.
    for item in [&first, &second] {
        let chain = env.warden.ledger.list_chain(&item.evidence_id).await.unwrap();
        let last = chain.last().unwrap();
        assert_eq!(last.action, CustodyAction::View);
        assert_eq!(last.event_key, result.package_id);
    }
}

#[tokio::test]
async fn test_bit_flip_fails_file_but_not_signature() {
    let env = TestWarden::new().await;
    let item = env.ingest(None, Severity::Low).await;

    let result = env
        .warden
        .packages
        .build(FAMILY, &EvidenceFilter::default(), &guardian(), &|_| {})
        .await
        .unwrap();
    let mut archive =
        PackageArchive::load_from_store(env.warden.objects.as_ref(), &result.storage_key)
            .await
            .unwrap();

    let path = format!("evidence/{}/alert.json", item.evidence_id);
    archive.get_mut(&path).unwrap()[0] ^= 0x01;

    let report = verify_package(&archive, Some(&env.warden.keyring.public_key()));
    assert!(!report.ok);
    assert!(report.signature_ok);
    let failed: Vec<_> = report.files.iter().filter(|f| !f.ok).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, path);
}

#[tokio::test]
async fn test_signature_from_rotated_key_rejected_by_old_public_key() {
    let env = TestWarden::new().await;
    env.ingest(None, Severity::Low).await;

    let old_public = env.warden.keyring.public_key();
    env.warden.keyring.stage_next().unwrap();
    env.warden.keyring.commit().unwrap();

    let result = env
        .warden
        .packages
        .build(FAMILY, &EvidenceFilter::default(), &guardian(), &|_| {})
        .await
        .unwrap();
    let archive = PackageArchive::load_from_store(env.warden.objects.as_ref(), &result.storage_key)
        .await
        .unwrap();

    assert!(!verify_package(&archive, Some(&old_public)).signature_ok);
    assert!(verify_package(&archive, Some(&env.warden.keyring.public_key())).ok);
}

#[tokio::test]
async fn test_tampered_manifest_fails_closed() {
    let env = TestWarden::new().await;
    env.ingest(None, Severity::Low).await;

    let result = env
        .warden
        .packages
        .build(FAMILY, &EvidenceFilter::default(), &guardian(), &|_| {})
        .await
        .unwrap();
    let mut archive =
        PackageArchive::load_from_store(env.warden.objects.as_ref(), &result.storage_key)
            .await
            .unwrap();

    let manifest = archive.get_mut(MANIFEST_PATH).unwrap();
    manifest.push(b'\n');

    let report = verify_package(&archive, Some(&env.warden.keyring.public_key()));
    assert!(!report.signature_ok);
    assert!(!report.ok);
}
