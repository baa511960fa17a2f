//! License verification and machine binding.

use std::sync::{Arc, Barrier};
use std::thread;

mod common;
use common::*;

use convia_license::licensing::admin;

fn expect_valid(result: VerifyResult) -> convia_license::licensing::Verified {
    match result {
        VerifyResult::Valid(verified) => verified,
        other => panic!("expected valid, got {:?}", other),
    }
}

fn expect_rejection(result: VerifyResult) -> Rejection {
    match result {
        VerifyResult::Invalid { reason, .. } => reason,
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn test_first_verification_binds_machine() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    let verified = expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());

    assert_eq!(verified.license_id, license.id);
    assert_eq!(verified.plan, "basic");
    assert_eq!(verified.allowed_containers, 1);
    assert_eq!(verified.current_usage, 1);
    assert!(verified.newly_bound);
}

#[test]
fn test_repeat_verification_does_not_consume_quota() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());
    let again = expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());

    assert_eq!(again.current_usage, 1);
    assert!(!again.newly_bound);
    assert_eq!(binding_count(&db.pool, license.id), 1);
}

#[test]
fn test_new_machine_rejected_at_quota() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());
    let result = engine.verify(&license.license_key, "machine-b", None).unwrap();

    assert_eq!(
        result,
        VerifyResult::Invalid {
            reason: Rejection::ContainerLimitReached,
            allowed_containers: Some(1),
            current_usage: Some(1),
        }
    );
    assert_eq!(Rejection::ContainerLimitReached.message(), "container limit reached");
    // The original binding is untouched
    expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());
}

#[test]
fn test_containers_on_one_machine_count_separately() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 2);
    let engine = VerificationEngine::new(db.pool.clone());
    let key = &license.license_key;

    expect_valid(engine.verify(key, "host-1", Some("web")).unwrap());
    let second = expect_valid(engine.verify(key, "host-1", Some("worker")).unwrap());
    assert_eq!(second.current_usage, 2);

    assert_eq!(
        expect_rejection(engine.verify(key, "host-1", Some("cron")).unwrap()),
        Rejection::ContainerLimitReached
    );
    // No container is its own identity
    assert_eq!(
        expect_rejection(engine.verify(key, "host-1", None).unwrap()),
        Rejection::ContainerLimitReached
    );
}

#[test]
fn test_empty_container_id_is_absent() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    expect_valid(engine.verify(&license.license_key, "machine-a", Some("")).unwrap());
    let again = expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());

    assert!(!again.newly_bound);
    assert_eq!(binding_count(&db.pool, license.id), 1);
}

#[test]
fn test_unknown_key_not_found() {
    let db = test_db();
    let engine = VerificationEngine::new(db.pool.clone());

    let reason = expect_rejection(engine.verify("TEST-NOPE-NOPE-NOPE-NOPE", "m", None).unwrap());
    assert_eq!(reason, Rejection::NotFound);
    assert_eq!(reason.message(), "license not found");
}

#[test]
fn test_inactive_license_rejected_and_bindings_kept() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());
    expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());

    for status in [LicenseStatus::Cancelled, LicenseStatus::Suspended, LicenseStatus::Expired] {
        queries::set_license_status(&db.pool.get().unwrap(), license.id, status).unwrap();
        let reason = expect_rejection(engine.verify(&license.license_key, "machine-a", None).unwrap());
        assert_eq!(reason, Rejection::Inactive, "{:?}", status);
    }
    assert_eq!(binding_count(&db.pool, license.id), 1);

    // Reactivation restores access on the same binding
    queries::set_license_status(&db.pool.get().unwrap(), license.id, LicenseStatus::Active).unwrap();
    let verified = expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());
    assert!(!verified.newly_bound);
}

#[test]
fn test_past_expiry_rejected_even_when_active() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    set_expires_at(&db.pool, license.id, now() - 60);
    let engine = VerificationEngine::new(db.pool.clone());

    let reason = expect_rejection(engine.verify(&license.license_key, "machine-a", None).unwrap());
    assert_eq!(reason, Rejection::Expired);
    assert_eq!(binding_count(&db.pool, license.id), 0);
}

#[test]
fn test_bind_refuses_license_cancelled_before_lock() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let mut conn = db.pool.get().unwrap();
    queries::set_license_status(&conn, license.id, LicenseStatus::Cancelled).unwrap();

    let err = queries::upsert_binding_atomic(&mut conn, license.id, "machine-a", None).unwrap_err();

    match err {
        AppError::LicenseInactive(status) => assert_eq!(status, LicenseStatus::Cancelled.as_ref()),
        other => panic!("expected LicenseInactive, got {:?}", other),
    }
    assert_eq!(binding_count(&db.pool, license.id), 0);
}

#[test]
fn test_bind_refuses_license_expired_before_lock() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    set_expires_at(&db.pool, license.id, now() - 5);
    let mut conn = db.pool.get().unwrap();

    let err = queries::upsert_binding_atomic(&mut conn, license.id, "machine-a", None).unwrap_err();

    assert!(matches!(err, AppError::LicenseExpired), "{:?}", err);
    assert_eq!(binding_count(&db.pool, license.id), 0);
}

#[test]
fn test_bind_reports_terms_read_under_lock() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 5);
    let mut conn = db.pool.get().unwrap();
    conn.execute(
        "UPDATE licenses SET plan = 'basic', allowed_containers = 2 WHERE id = ?1",
        rusqlite::params![license.id],
    )
    .unwrap();

    let acquisition = queries::upsert_binding_atomic(&mut conn, license.id, "machine-a", None).unwrap();

    assert!(acquisition.is_new());
    assert_eq!(acquisition.license().plan, "basic");
    assert_eq!(acquisition.license().allowed_containers, 2);
    assert_eq!(acquisition.usage(), 1);
}

#[test]
fn test_future_expiry_verifies() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    set_expires_at(&db.pool, license.id, now() + 3600);
    let engine = VerificationEngine::new(db.pool.clone());

    expect_valid(engine.verify(&license.license_key, "machine-a", None).unwrap());
}

#[test]
fn test_blank_machine_id_is_bad_request() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    let err = engine.verify(&license.license_key, "   ", None).unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[test]
fn test_reset_frees_quota() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());
    expect_valid(engine.verify(&license.license_key, "old-machine", None).unwrap());

    let removed = admin::reset_bindings(&db.pool.get().unwrap(), license.id).unwrap();
    assert_eq!(removed, 1);

    let verified = expect_valid(engine.verify(&license.license_key, "new-machine", None).unwrap());
    assert!(verified.newly_bound);
    assert_eq!(verified.current_usage, 1);
}

#[test]
fn test_reset_unknown_license_not_found() {
    let db = test_db();
    let err = admin::reset_bindings(&db.pool.get().unwrap(), 999).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn test_concurrent_new_machines_never_exceed_quota() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 3);
    let engine = VerificationEngine::new(db.pool.clone());

    let threads = 10;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let key = license.license_key.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.verify(&key, &format!("machine-{}", i), None).unwrap()
            })
        })
        .collect();

    let results: Vec<VerifyResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let valid = results.iter().filter(|r| r.is_valid()).count();
    let limited = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                VerifyResult::Invalid {
                    reason: Rejection::ContainerLimitReached,
                    ..
                }
            )
        })
        .count();

    assert_eq!(valid, 3);
    assert_eq!(limited, 7);
    assert_eq!(binding_count(&db.pool, license.id), 3);
}

#[test]
fn test_concurrent_same_machine_binds_once() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let engine = VerificationEngine::new(db.pool.clone());

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let key = license.license_key.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.verify(&key, "shared-machine", Some("c1")).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_valid());
    }
    assert_eq!(binding_count(&db.pool, license.id), 1);
}
