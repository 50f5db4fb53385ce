mod common;

use common::Harness;
use fingergate::core::ErrorKind;
use fingergate::device::{ScriptedCapture, ScriptedMatcher};
use fingergate::storage::{AccessLevel, Store};

#[tokio::test(start_paused = true)]
async fn mismatch_is_a_read_failure() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(85)])
            .with_similarities([0.42]),
    );
    harness.store.seed("Maria Silva", "maria", AccessLevel::Operator).await;
    let auth = harness.auth();

    let result = auth.authenticate("maria").await;

    assert!(!result.success);
    assert!(result.user.is_none());
    assert_eq!(result.error, Some(ErrorKind::ReadFailure));
    assert_eq!(result.attempts, 1);
    assert_eq!(auth.attempts_for("maria"), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_user_is_not_an_attempt() {
    let harness = Harness::new(ScriptedMatcher::new().with_captures([ScriptedCapture::Quality(90)]));
    let auth = harness.auth();

    let result = auth.authenticate("ghost").await;

    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::UserNotFound));
    assert_eq!(result.attempts, 0);
    assert_eq!(auth.attempts_for("ghost"), 0);
    assert_eq!(harness.matcher.capture_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn match_grants_access_and_clears_failures() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(60), ScriptedCapture::Quality(88)])
            .with_similarities([0.3, 0.91]),
    );
    let id = harness.store.seed("Joao Souza", "joao", AccessLevel::Supervisor).await;
    let auth = harness.auth();

    assert_eq!(auth.authenticate("joao").await.attempts, 1);

    let result = auth.authenticate("joao").await;
    assert!(result.success);
    assert_eq!(result.error, None);
    assert_eq!(result.user.as_ref().map(|u| &u.id), Some(&id));
    assert_eq!(auth.attempts_for("joao"), 0);

    let stored = harness.store.get_user_by_id(&id).await.unwrap().unwrap();
    assert!(stored.user.last_access.is_some());
}

#[tokio::test(start_paused = true)]
async fn similarity_at_threshold_is_rejected() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(90)])
            .with_similarities([0.7]),
    );
    harness.store.seed("Ana Lima", "ana", AccessLevel::Guest).await;
    let auth = harness.auth();

    let result = auth.authenticate("ana").await;
    assert!(!result.success);
    assert_eq!(result.error, Some(ErrorKind::ReadFailure));
}

#[tokio::test(start_paused = true)]
async fn capture_failures_count_as_attempts() {
    let harness = Harness::new(
        ScriptedMatcher::new().with_captures([ScriptedCapture::Quality(12), ScriptedCapture::Hang]),
    );
    harness.store.seed("Pedro Alves", "pedro", AccessLevel::Operator).await;
    let auth = harness.auth();

    let poor = auth.authenticate("pedro").await;
    assert_eq!(poor.error, Some(ErrorKind::PoorQuality));
    assert_eq!(poor.attempts, 1);

    let timed_out = auth.authenticate("pedro").await;
    assert_eq!(timed_out.error, Some(ErrorKind::Timeout));
    assert_eq!(timed_out.attempts, 2);
    assert_eq!(harness.matcher.compare_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_require_escalation() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(80),
                ScriptedCapture::ReadFailure,
                ScriptedCapture::Quality(80),
            ])
            .with_similarities([0.1, 0.2]),
    );
    harness.store.seed("Lucas Rocha", "lucas", AccessLevel::Operator).await;
    let auth = harness.auth();

    auth.authenticate("lucas").await;
    auth.authenticate("lucas").await;
    assert!(!auth.requires_escalation("lucas"));

    let third = auth.authenticate("lucas").await;
    assert_eq!(third.attempts, 3);
    assert!(auth.requires_escalation("lucas"));
    // counters are per user
    assert!(!auth.requires_escalation("maria"));

    auth.reset_attempts("lucas");
    assert!(!auth.requires_escalation("lucas"));
    assert_eq!(auth.attempts_for("lucas"), 0);
}

#[tokio::test(start_paused = true)]
async fn identify_finds_the_matching_user() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(80), ScriptedCapture::Quality(80)])
            .with_similarities([0.95, 0.95]),
    );
    harness.store.seed("Bia Costa", "bia", AccessLevel::Administrator).await;
    let auth = harness.auth();

    let found = auth.identify().await;
    assert!(found.success);
    assert_eq!(found.user.map(|u| u.username), Some("bia".to_string()));

    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(80)])
            .with_similarities([0.2]),
    );
    harness.store.seed("Bia Costa", "bia", AccessLevel::Administrator).await;
    let auth = harness.auth();

    let missed = auth.identify().await;
    assert!(!missed.success);
    assert_eq!(missed.error, Some(ErrorKind::ReadFailure));
    assert_eq!(missed.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn driver_fault_is_not_counted() {
    let harness = Harness::new(
        ScriptedMatcher::new().with_captures([ScriptedCapture::Internal, ScriptedCapture::ReadFailure]),
    );
    harness.store.seed("Rita Melo", "rita", AccessLevel::Operator).await;
    let auth = harness.auth();

    let fault = auth.authenticate("rita").await;
    assert!(!fault.success);
    assert_eq!(fault.error, Some(ErrorKind::InternalError));
    assert_eq!(fault.attempts, 0);
    assert_eq!(auth.attempts_for("rita"), 0);

    // a real read failure afterwards is the first counted attempt
    let read = auth.authenticate("rita").await;
    assert_eq!(read.error, Some(ErrorKind::ReadFailure));
    assert_eq!(read.attempts, 1);
}
