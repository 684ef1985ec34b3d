//! Service facade tests: request validation, existence-before-authorization
//! ordering, facility scoping, and review idempotence.

mod common;

use common::Harness;

use latchkey_core::{ChangeId, SyncLogId, UserId};
use latchkey_fms::adapter::ExternalEntity;
use latchkey_fms::service::{ApplyRequest, AuthContext, ReviewRequest};
use latchkey_fms::types::ReviewDecision;

fn admin() -> AuthContext {
    AuthContext::global_admin(UserId::new())
}

async fn seed_sync(harness: &Harness) -> (SyncLogId, Vec<ChangeId>) {
    harness
        .adapter
        .set_tenants(vec![ExternalEntity::new("t-1").with_email("pat@example.com")]);
    let summary = harness
        .service
        .trigger_sync(&admin(), harness.facility_id)
        .await
        .unwrap();
    let ids = harness
        .store
        .changes_for_log(summary.sync_log_id)
        .iter()
        .map(|c| c.id)
        .collect();
    (summary.sync_log_id, ids)
}

#[tokio::test]
async fn review_without_sync_log_id_is_a_validation_error() {
    let harness = Harness::new();
    let err = harness
        .service
        .review_changes(
            &admin(),
            ReviewRequest {
                sync_log_id: None,
                change_ids: vec![ChangeId::new()],
                accepted: true,
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("sync_log_id"));
}

#[tokio::test]
async fn apply_without_change_ids_is_a_validation_error() {
    let harness = Harness::new();
    let (log_id, _) = seed_sync(&harness).await;

    let err = harness
        .service
        .apply_changes(
            &admin(),
            ApplyRequest {
                sync_log_id: Some(log_id),
                change_ids: vec![],
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("change_ids"));
}

#[tokio::test]
async fn validation_runs_before_lookup() {
    let harness = Harness::new();

    // Missing field wins over the unknown id that would otherwise be 404.
    let err = harness
        .service
        .review_changes(
            &admin(),
            ReviewRequest {
                sync_log_id: None,
                change_ids: vec![],
                accepted: true,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("sync_log_id"));
}

#[tokio::test]
async fn unknown_sync_log_is_not_found_for_everyone() {
    let harness = Harness::new();
    let missing = SyncLogId::new();

    let err = harness
        .service
        .pending_changes(&admin(), missing)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let scoped = AuthContext::facility_admin(UserId::new(), [harness.facility_id]);
    let err = harness
        .service
        .pending_changes(&scoped, missing)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn facility_admin_cannot_reach_another_facilitys_log() {
    let harness = Harness::new();
    let (log_id, change_ids) = seed_sync(&harness).await;

    let other_facility = latchkey_core::FacilityId::new();
    let outsider = AuthContext::facility_admin(UserId::new(), [other_facility]);

    let err = harness
        .service
        .review_changes(
            &outsider,
            ReviewRequest {
                sync_log_id: Some(log_id),
                change_ids: change_ids.clone(),
                accepted: true,
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    // The denial must not disclose the owning facility.
    assert!(!err.to_string().contains(&harness.facility_id.to_string()));

    let err = harness
        .service
        .apply_changes(
            &outsider,
            ApplyRequest {
                sync_log_id: Some(log_id),
                change_ids: change_ids.clone(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_forbidden());

    let err = harness
        .service
        .pending_changes(&outsider, log_id)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());

    // Nothing was reviewed through the denied calls.
    assert!(harness
        .store
        .change(change_ids[0])
        .unwrap()
        .is_pending_review());
}

#[tokio::test]
async fn facility_admin_operates_inside_own_facility() {
    let harness = Harness::new();
    let (log_id, change_ids) = seed_sync(&harness).await;

    let scoped = AuthContext::facility_admin(UserId::new(), [harness.facility_id]);
    let outcome = harness
        .service
        .review_changes(
            &scoped,
            ReviewRequest {
                sync_log_id: Some(log_id),
                change_ids,
                accepted: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.reviewed, 1);
    assert_eq!(outcome.failed, 0);
}

#[tokio::test]
async fn global_admin_bypasses_facility_scoping() {
    let harness = Harness::new();
    let (log_id, _) = seed_sync(&harness).await;

    let pending = harness
        .service
        .pending_changes(&admin(), log_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn trigger_sync_outside_accessible_set_is_forbidden() {
    let harness = Harness::new();
    let outsider = AuthContext::facility_admin(UserId::new(), [latchkey_core::FacilityId::new()]);

    let err = harness
        .service
        .trigger_sync(&outsider, harness.facility_id)
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
}

#[tokio::test]
async fn re_review_returns_original_decision() {
    let harness = Harness::new();
    let (log_id, change_ids) = seed_sync(&harness).await;
    let auth = admin();

    let first = harness
        .service
        .review_changes(
            &auth,
            ReviewRequest {
                sync_log_id: Some(log_id),
                change_ids: change_ids.clone(),
                accepted: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.reviewed, 1);
    assert_eq!(first.results[0].decision, Some(ReviewDecision::Accepted));

    // An attempted flip to rejected is a no-op returning the original.
    let second = harness
        .service
        .review_changes(
            &auth,
            ReviewRequest {
                sync_log_id: Some(log_id),
                change_ids,
                accepted: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(second.reviewed, 0);
    assert_eq!(second.already_decided, 1);
    assert_eq!(second.results[0].decision, Some(ReviewDecision::Accepted));
    assert!(second.results[0].already_decided);
}

#[tokio::test]
async fn bulk_review_reports_each_id() {
    let harness = Harness::new();
    let (log_id, mut change_ids) = seed_sync(&harness).await;
    let bogus = ChangeId::new();
    change_ids.push(bogus);

    let outcome = harness
        .service
        .review_changes(
            &admin(),
            ReviewRequest {
                sync_log_id: Some(log_id),
                change_ids,
                accepted: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.reviewed, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.results.len(), 2);
    let failed = outcome
        .results
        .iter()
        .find(|r| r.change_id == bogus)
        .unwrap();
    assert!(failed.error.is_some());

    // Counters on the log reflect the one recorded decision.
    let log = harness.store.log(log_id).unwrap();
    assert_eq!(log.counts.pending, 1);
    assert_eq!(log.counts.rejected, 0);
}

#[tokio::test]
async fn pending_list_shrinks_as_changes_are_reviewed() {
    let harness = Harness::new();
    harness.adapter.set_tenants(vec![
        ExternalEntity::new("t-1").with_email("a@example.com"),
        ExternalEntity::new("t-2").with_email("b@example.com"),
    ]);
    let auth = admin();
    let summary = harness
        .service
        .trigger_sync(&auth, harness.facility_id)
        .await
        .unwrap();
    let change_ids: Vec<_> = harness
        .store
        .changes_for_log(summary.sync_log_id)
        .iter()
        .map(|c| c.id)
        .collect();

    harness
        .service
        .review_changes(
            &auth,
            ReviewRequest {
                sync_log_id: Some(summary.sync_log_id),
                change_ids: vec![change_ids[0]],
                accepted: false,
            },
        )
        .await
        .unwrap();

    let pending = harness
        .service
        .pending_changes(&auth, summary.sync_log_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, change_ids[1]);

    let log = harness.store.log(summary.sync_log_id).unwrap();
    assert_eq!(log.counts.rejected, 1);
    assert_eq!(log.counts.pending, 1);
}
