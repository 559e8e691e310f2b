use std::sync::Arc;
use std::time::Duration;

use authshield_token::{
    AdmissionController, AdmissionPolicy, AuthConfig, ClaimSet, Error, ManualClock,
    MemoryRevocationStore, SigningKey, TokenManager, spawn_admission_sweeper,
};
use tokio_util::sync::CancellationToken;

const START: u64 = 1_700_000_000;

fn manager() -> (TokenManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Duration::from_secs(START)));
    let store = Arc::new(MemoryRevocationStore::new(clock.clone()));
    let config = AuthConfig::new(SigningKey::from("integration-secret-integration-secret"));
    (TokenManager::with_clock(&config, store, clock.clone()), clock)
}

#[tokio::test]
async fn magic_link_token_lifecycle() {
    let (manager, clock) = manager();
    let ttl = Duration::from_secs(15 * 60);

    let token = manager
        .issue_with_ttl(ClaimSet::for_subject("a@example.com"), ttl)
        .unwrap();
    let claims = manager.authenticate(&token).await.unwrap();
    assert_eq!(claims.subject(), Some("a@example.com"));

    manager.revoke(&token).await.unwrap();
    assert!(matches!(manager.authenticate(&token).await, Err(Error::Revoked)));

    // Issued a second later so it is a distinct token, never revoked.
    clock.advance(Duration::from_secs(1));
    let twin = manager
        .issue_with_ttl(ClaimSet::for_subject("a@example.com"), ttl)
        .unwrap();
    assert_ne!(twin, token);
    assert!(manager.authenticate(&twin).await.is_ok());

    clock.advance(ttl + Duration::from_secs(1));
    assert!(matches!(
        manager.authenticate(&twin).await,
        Err(Error::Expired { .. })
    ));
    assert!(matches!(
        manager.authenticate(&token).await,
        Err(Error::Expired { .. })
    ));
}

#[tokio::test]
async fn refresh_chain_preserves_application_claims() {
    let (manager, clock) = manager();
    let original = ClaimSet::for_subject("test@example.com").with("userId", "12345");
    let mut token = manager.issue(original.clone()).unwrap();

    for _ in 0..3 {
        clock.advance(Duration::from_secs(600));
        token = manager.refresh(&token).await.unwrap();
    }

    let claims = manager.authenticate(&token).await.unwrap();
    assert_eq!(claims.without_time_claims(), original);
    assert_eq!(claims.issued_at(), Some(START + 1_800));
}

#[tokio::test]
async fn single_use_refresh_by_explicit_revoke() {
    let (manager, _) = manager();
    let token = manager.issue(ClaimSet::for_subject("a")).unwrap();

    let next = manager.refresh(&token).await.unwrap();
    manager.revoke(&token).await.unwrap();

    assert!(matches!(manager.refresh(&token).await, Err(Error::Revoked)));
    assert!(manager.authenticate(&next).await.is_ok());
}

#[tokio::test]
async fn issuance_window_recovers() {
    let clock = Arc::new(ManualClock::new(Duration::from_secs(START)));
    let store = Arc::new(MemoryRevocationStore::new(clock.clone()));
    let config = AuthConfig::new(SigningKey::from("integration-secret-integration-secret"));
    let admission = AdmissionController::new(
        AdmissionPolicy {
            window: Duration::from_secs(60),
            max_requests: 5,
        },
        clock.clone(),
    );
    let manager = TokenManager::with_clock(&config, store, clock.clone()).with_admission(admission);

    for i in 0..5 {
        let claims = ClaimSet::for_subject(format!("user{i}@example.com"));
        assert!(manager.issue_for_client("203.0.113.7", claims).is_ok());
    }
    assert!(matches!(
        manager.issue_for_client("203.0.113.7", ClaimSet::for_subject("x")),
        Err(Error::RateLimited { .. })
    ));

    clock.advance(Duration::from_secs(60));
    assert!(manager
        .issue_for_client("203.0.113.7", ClaimSet::for_subject("x"))
        .is_ok());
}

#[tokio::test]
async fn shared_admission_controller_is_swept_in_background() {
    let clock = Arc::new(ManualClock::new(Duration::from_secs(START)));
    let store = Arc::new(MemoryRevocationStore::new(clock.clone()));
    let config = AuthConfig::new(SigningKey::from("integration-secret-integration-secret"));
    let admission = Arc::new(AdmissionController::new(config.admission, clock.clone()));
    let manager =
        TokenManager::with_clock(&config, store, clock.clone()).with_admission(admission.clone());

    for n in 0..20 {
        let client = format!("198.51.100.{n}");
        manager
            .issue_for_client(&client, ClaimSet::for_subject("a@example.com"))
            .unwrap();
    }
    assert_eq!(manager.admission().map(AdmissionController::len), Some(20));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_admission_sweeper(admission, Duration::from_millis(10), shutdown.clone());
    clock.advance(config.admission.window);

    for _ in 0..100 {
        if manager.admission().is_some_and(AdmissionController::is_empty) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(manager.admission().map(AdmissionController::len), Some(0));

    shutdown.cancel();
    sweeper.await.unwrap();
}
