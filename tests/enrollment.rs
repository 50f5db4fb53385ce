mod common;

use common::Harness;
use fingergate::core::{EnrollmentPhase, ErrorKind, ScanState};
use fingergate::device::{ScriptedCapture, ScriptedMatcher};
use fingergate::storage::{AccessLevel, NewUser, Store};
use fingergate::{classify, FingerprintError};

fn profile(username: &str) -> NewUser {
    NewUser::new("Maria Silva", username, AccessLevel::Operator)
}

#[tokio::test(start_paused = true)]
async fn confirmed_candidate_is_committed_once() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(80), ScriptedCapture::Quality(65)])
            .with_similarities([0.75]),
    );
    let enrollment = harness.enrollment(5);

    let id = enrollment.enroll(profile("maria")).await.unwrap();

    assert_eq!(harness.store.creates(), 1);
    let record = harness.store.get_user_by_username("maria").await.unwrap().unwrap();
    assert_eq!(record.user.id, id);
    // the phase-1 candidate is what gets stored
    assert_eq!(record.template.quality(), 80);
    assert_eq!(enrollment.phase(), EnrollmentPhase::Committed(id));
    assert_eq!(enrollment.session_for("maria").state(), ScanState::Idle);
}

#[tokio::test(start_paused = true)]
async fn mismatch_recaptures_the_candidate() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(90),
                ScriptedCapture::Quality(85),
                ScriptedCapture::Quality(75),
                ScriptedCapture::Quality(72),
            ])
            .with_similarities([0.4, 0.9]),
    );
    let enrollment = harness.enrollment(5);

    enrollment.enroll(profile("joao")).await.unwrap();

    // two full passes: candidate + confirmation each time
    assert_eq!(harness.matcher.capture_calls(), 4);
    assert_eq!(harness.matcher.compare_calls(), 2);
    assert_eq!(harness.store.creates(), 1);

    let record = harness.store.get_user_by_username("joao").await.unwrap().unwrap();
    assert_eq!(record.template.quality(), 75);
}

#[tokio::test(start_paused = true)]
async fn low_quality_candidate_is_retried() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(50),
                ScriptedCapture::Quality(20),
                ScriptedCapture::Quality(81),
                ScriptedCapture::Quality(70),
            ])
            .with_similarities([0.95]),
    );
    let enrollment = harness.enrollment(5);

    enrollment.enroll(profile("ana")).await.unwrap();

    // no compare for candidates that never reached phase 2
    assert_eq!(harness.matcher.compare_calls(), 1);
    assert_eq!(harness.store.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn aborts_after_max_attempts_without_persisting() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(90),
                ScriptedCapture::Quality(90),
                ScriptedCapture::Quality(40),
                ScriptedCapture::ReadFailure,
            ])
            .with_similarities([0.1]),
    );
    let enrollment = harness.enrollment(3);

    let err = enrollment.enroll(profile("pedro")).await.unwrap_err();

    assert!(matches!(err, FingerprintError::EnrollmentAborted { attempts: 3 }));
    assert_eq!(classify(&err), ErrorKind::ReadFailure);
    assert_eq!(enrollment.phase(), EnrollmentPhase::Aborted(ErrorKind::ReadFailure));
    assert_eq!(harness.store.creates(), 0);
    assert!(harness.store.list_users().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn device_loss_aborts_immediately() {
    let harness = Harness::new(
        ScriptedMatcher::new().with_captures([ScriptedCapture::Quality(88), ScriptedCapture::Disconnected]),
    );
    let enrollment = harness.enrollment(5);

    let err = enrollment.enroll(profile("lucas")).await.unwrap_err();

    assert_eq!(classify(&err), ErrorKind::DeviceDisconnected);
    assert_eq!(harness.matcher.capture_calls(), 2);
    assert_eq!(harness.store.creates(), 0);
    assert_eq!(enrollment.session_for("lucas").state(), ScanState::Idle);
}

#[tokio::test(start_paused = true)]
async fn existing_username_is_refused_before_scanning() {
    let harness = Harness::new(ScriptedMatcher::new());
    harness.store.seed("Existing", "taken", AccessLevel::Guest).await;
    let enrollment = harness.enrollment(5);

    let err = enrollment.enroll(profile("taken")).await.unwrap_err();

    assert!(matches!(err, FingerprintError::UsernameTaken(_)));
    assert_eq!(harness.matcher.capture_calls(), 0);
    assert_eq!(harness.store.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn phases_are_published() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(77), ScriptedCapture::Quality(77)])
            .with_similarities([0.8]),
    );
    let enrollment = harness.enrollment(5);
    let mut rx = enrollment.subscribe();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let phase = rx.borrow_and_update().clone();
            let done = matches!(phase, EnrollmentPhase::Committed(_) | EnrollmentPhase::Aborted(_));
            seen.push(phase);
            if done {
                break;
            }
        }
        seen
    });

    enrollment.enroll(profile("bia")).await.unwrap();
    let seen = watcher.await.unwrap();

    assert!(seen.contains(&EnrollmentPhase::Capturing {
        attempt: 1,
        rejected: None
    }));
    assert!(seen.contains(&EnrollmentPhase::Confirming { candidate_quality: 77 }));
    assert!(matches!(seen.last(), Some(EnrollmentPhase::Committed(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_confirmation_scan_restarts_from_candidate() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(80),
                ScriptedCapture::ReadFailure,
                ScriptedCapture::Quality(85),
                ScriptedCapture::Quality(80),
            ])
            .with_similarities([0.9]),
    );
    let enrollment = harness.enrollment(5);

    enrollment.enroll(profile("rita")).await.unwrap();

    // the failed confirmation never reached compare
    assert_eq!(harness.matcher.capture_calls(), 4);
    assert_eq!(harness.matcher.compare_calls(), 1);
    assert_eq!(harness.store.creates(), 1);

    // the first candidate was dropped in favour of the recaptured one
    let record = harness.store.get_user_by_username("rita").await.unwrap().unwrap();
    assert_eq!(record.template.quality(), 85);
}

#[tokio::test(start_paused = true)]
async fn failed_confirmation_scan_counts_one_attempt() {
    let harness = Harness::new(
        ScriptedMatcher::new().with_captures([
            ScriptedCapture::Quality(80),
            ScriptedCapture::ReadFailure,
            ScriptedCapture::Quality(80),
            ScriptedCapture::Hang,
        ]),
    );
    let enrollment = harness.enrollment(2);

    let err = enrollment.enroll(profile("caio")).await.unwrap_err();

    assert!(matches!(err, FingerprintError::EnrollmentAborted { attempts: 2 }));
    assert_eq!(harness.matcher.capture_calls(), 4);
    assert_eq!(harness.store.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_candidates_are_published_with_their_reason() {
    let harness = Harness::new(
        ScriptedMatcher::new()
            .with_captures([
                ScriptedCapture::Quality(50),
                ScriptedCapture::Quality(20),
                ScriptedCapture::Quality(81),
                ScriptedCapture::Quality(70),
            ])
            .with_similarities([0.95]),
    );
    let enrollment = harness.enrollment(5);
    let mut rx = enrollment.subscribe();

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let phase = rx.borrow_and_update().clone();
            let done = matches!(phase, EnrollmentPhase::Committed(_) | EnrollmentPhase::Aborted(_));
            seen.push(phase);
            if done {
                break;
            }
        }
        seen
    });

    enrollment.enroll(profile("duda")).await.unwrap();
    let seen = watcher.await.unwrap();

    // below the enrollment minimum, then below the capture minimum
    assert!(seen.contains(&EnrollmentPhase::Capturing {
        attempt: 2,
        rejected: Some(ErrorKind::PoorQuality)
    }));
    assert!(seen.contains(&EnrollmentPhase::Capturing {
        attempt: 3,
        rejected: Some(ErrorKind::PoorQuality)
    }));
    assert!(seen.contains(&EnrollmentPhase::Confirming { candidate_quality: 81 }));
}
