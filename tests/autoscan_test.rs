//! Auto-scan loop behavior: detection, the confidence gate, the countdown,
//! suppression of unchanged scenes, and how scanning yields to manual
//! capture and session close. All tests run on paused virtual time.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use fieldlens_lib::{
    analysis::Classification,
    camera::CameraState,
    db::ResultStatus,
    session::{OutcomeSource, ScanStatus, SessionPhase},
    testing::{ScriptedAnalyzer, ScriptedReply, ScriptedResponse},
};

use common::{harness_with, synthetic_factory, varying_factory};

#[tokio::test(start_paused = true)]
async fn below_gate_detection_waits_for_the_operator() {
    let harness = harness_with(
        vec![ScriptedAnalyzer::detection(
            "spec-ext",
            Classification::Pass,
            0.60,
        )],
        synthetic_factory(),
    );
    let inspection_id = harness.start_inspection().await;
    let countdown_ticks = harness.count_events("countdown-tick");
    let commits = harness.count_events("result-committed");

    harness
        .controller
        .open_session(inspection_id.clone(), "spec-ext".into())
        .await
        .unwrap();

    let snapshot = harness
        .wait_for("below-gate detection to settle", |s| {
            s.outcome.is_some() && s.phase == SessionPhase::CameraReady
        })
        .await;
    let outcome = snapshot.outcome.unwrap();
    assert_eq!(outcome.spec_id, "spec-ext");
    assert_eq!(outcome.confidence, 0.60);
    assert_eq!(outcome.source, OutcomeSource::AutoScan);

    // The scene has not changed, so later ticks skip the analyzer instead
    // of re-announcing the same detection.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(harness.analyzer.calls().len(), 1);
    assert_eq!(countdown_ticks.load(Ordering::SeqCst), 0);
    assert_eq!(commits.load(Ordering::SeqCst), 0);

    let rows = harness.db.list_results(&inspection_id).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn high_confidence_detection_auto_commits_and_advances() {
    let mut replies = vec![ScriptedAnalyzer::detection(
        "spec-ext",
        Classification::Pass,
        0.92,
    )];
    replies.extend((0..6).map(|_| ScriptedAnalyzer::no_match()));

    let harness = harness_with(replies, synthetic_factory());
    let inspection_id = harness.start_inspection().await;
    let countdown_ticks = harness.count_events("countdown-tick");
    let commits = harness.count_events("result-committed");

    harness
        .controller
        .open_session(inspection_id.clone(), "spec-ext".into())
        .await
        .unwrap();

    let snapshot = harness
        .wait_for("auto-commit to advance the session", |s| {
            s.spec_id.as_deref() == Some("spec-sign") && s.phase == SessionPhase::CameraReady
        })
        .await;
    assert_eq!(snapshot.camera, CameraState::Ready);
    assert!(snapshot.outcome.is_none());

    let rows = harness.db.list_results(&inspection_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].spec_id, "spec-ext");
    assert_eq!(rows[0].status, ResultStatus::Pass);
    let ai = rows[0].ai.clone().expect("auto-commit keeps the ai verdict");
    assert!(ai.analyzed);
    assert_eq!(ai.confidence, Some(0.92));
    assert!(rows[0].evidence_path.is_some());

    assert_eq!(commits.load(Ordering::SeqCst), 1);
    // 3s, 2s, 1s, and the final zero tick.
    assert!(countdown_ticks.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_countdown_dismisses_without_committing() {
    let harness = harness_with(
        vec![ScriptedAnalyzer::detection(
            "spec-ext",
            Classification::Pass,
            0.95,
        )],
        synthetic_factory(),
    );
    let inspection_id = harness.start_inspection().await;
    let commits = harness.count_events("result-committed");

    harness
        .controller
        .open_session(inspection_id.clone(), "spec-ext".into())
        .await
        .unwrap();

    harness
        .wait_for("the detection to arm the countdown", |s| {
            s.phase == SessionPhase::Detected
        })
        .await;
    let snapshot = harness.controller.cancel_auto_advance().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::CameraReady);
    assert!(snapshot.outcome.is_none());

    // Well past where the countdown would have fired, and with the
    // dismissed scene suppressed from re-detection.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(commits.load(Ordering::SeqCst), 0);
    assert_eq!(harness.analyzer.calls().len(), 1);

    let rows = harness.db.list_results(&inspection_id).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scan_analyses_never_overlap() {
    // Every tick sees a new scene and every detect takes a while, so any
    // tick that failed to wait for the previous one would overlap.
    let mut replies: Vec<ScriptedReply> = (0..8)
        .map(|_| ScriptedReply {
            delay: Some(Duration::from_millis(1500)),
            response: ScriptedResponse::NoMatch,
        })
        .collect();
    replies.extend((0..6).map(|_| ScriptedAnalyzer::no_match()));

    let harness = harness_with(replies, varying_factory());
    let inspection_id = harness.start_inspection().await;

    harness
        .controller
        .open_session(inspection_id, "spec-ext".into())
        .await
        .unwrap();

    harness.wait_for_calls(4).await;
    assert_eq!(harness.analyzer.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_capture_preempts_the_scan_analysis() {
    let harness = harness_with(
        vec![
            ScriptedReply {
                delay: Some(Duration::from_secs(3)),
                response: ScriptedResponse::NoMatch,
            },
            ScriptedAnalyzer::verdict(Classification::Pass, 0.9),
        ],
        synthetic_factory(),
    );
    let inspection_id = harness.start_inspection().await;

    harness
        .controller
        .open_session(inspection_id, "spec-ext".into())
        .await
        .unwrap();

    // Capture while the scan's detect call is still in flight.
    harness.wait_for_calls(1).await;
    let snapshot = harness.controller.manual_capture().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Reviewing);
    let outcome = snapshot.outcome.unwrap();
    assert_eq!(outcome.source, OutcomeSource::Manual);
    assert_eq!(outcome.classification, Classification::Pass);

    let calls = harness.analyzer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].mode, "detect");
    assert_eq!(calls[1].mode, "analyzeSpec");
    assert_eq!(calls[1].spec_ids, vec!["spec-ext".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn closing_mid_scan_analysis_stays_silent() {
    let harness = harness_with(
        vec![ScriptedReply {
            delay: Some(Duration::from_secs(3)),
            response: ScriptedResponse::NoMatch,
        }],
        synthetic_factory(),
    );
    let inspection_id = harness.start_inspection().await;
    let errors = harness.count_events("session-error");

    harness
        .controller
        .open_session(inspection_id.clone(), "spec-ext".into())
        .await
        .unwrap();

    harness.wait_for_calls(1).await;
    let snapshot = harness.controller.close_session().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Idle);

    assert_eq!(harness.analyzer.calls().len(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    let rows = harness.db.list_results(&inspection_id).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stuck_scan_tick_recovers_and_rescans() {
    let harness = harness_with(
        vec![
            ScriptedReply {
                delay: None,
                response: ScriptedResponse::HangUntilCancelled,
            },
            ScriptedAnalyzer::no_match(),
        ],
        synthetic_factory(),
    );
    let inspection_id = harness.start_inspection().await;
    let errors = harness.count_events("session-error");

    harness
        .controller
        .open_session(inspection_id.clone(), "spec-ext".into())
        .await
        .unwrap();

    // The first tick's analysis hangs until the watchdog abandons it.
    harness.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    // The next tick scans normally.
    harness.wait_for_calls(2).await;
    let snapshot = harness
        .wait_for("the rescan to settle", |s| {
            s.phase == SessionPhase::CameraReady
        })
        .await;
    assert_eq!(snapshot.scan_status, ScanStatus::Idle);
    assert_eq!(harness.analyzer.calls().len(), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 0);

    let rows = harness.db.list_results(&inspection_id).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_scan_stops_the_loop() {
    let replies = (0..6).map(|_| ScriptedAnalyzer::no_match()).collect();
    let harness = harness_with(replies, varying_factory());
    let inspection_id = harness.start_inspection().await;

    harness
        .controller
        .open_session(inspection_id, "spec-ext".into())
        .await
        .unwrap();

    harness.wait_for_calls(1).await;
    harness.controller.set_auto_scan(false).await.unwrap();
    let settled = harness
        .wait_for("scanning to wind down", |s| {
            s.phase == SessionPhase::CameraReady
        })
        .await;
    assert!(!settled.auto_scan_enabled);
    let calls_when_disabled = harness.analyzer.calls().len();

    // The scene keeps changing, so a live loop would keep analyzing.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(harness.analyzer.calls().len(), calls_when_disabled);

    harness.controller.set_auto_scan(true).await.unwrap();
    harness.wait_for_calls(calls_when_disabled + 1).await;
}
