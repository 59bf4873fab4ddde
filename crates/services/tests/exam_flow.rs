mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Duration;
use tokio::sync::mpsc;

use exam_core::model::{
    AssessmentSettingsDraft, QuestionSetError, QuestionStatus, SubmissionTrigger, TimerRecovery,
    ViolationKind,
};
use exam_core::time::fixed_now;
use services::{
    Clock, ExamSession, FinalizeOutcome, HostSignal, MonitorStatus, Readiness, SessionError,
    SessionEvent, SubmissionError, TimerTick,
};
use storage::repository::{InMemoryStore, KeyValueStore, Storage};

use support::{FakeBackend, FakeCamera, ScriptedFaces, deps, questions, session_id, settings, wait_for};

fn default_settings() -> exam_core::model::AssessmentSettings {
    settings(AssessmentSettingsDraft::new())
}

async fn prepare_at(
    backend: &Arc<FakeBackend>,
    kv: Arc<dyn KeyValueStore>,
    draft: AssessmentSettingsDraft,
    at: chrono::DateTime<chrono::Utc>,
) -> Arc<ExamSession> {
    prepare_with_camera(backend, &FakeCamera::new(), kv, draft, at).await
}

async fn prepare_with_camera(
    backend: &Arc<FakeBackend>,
    camera: &Arc<FakeCamera>,
    kv: Arc<dyn KeyValueStore>,
    draft: AssessmentSettingsDraft,
    at: chrono::DateTime<chrono::Utc>,
) -> Arc<ExamSession> {
    ExamSession::prepare(
        deps(
            backend,
            camera,
            ScriptedFaces::with(1),
            kv,
            settings(draft),
            Clock::fixed(at),
        ),
        session_id(),
    )
    .await
    .expect("prepare session")
}

#[tokio::test]
async fn preparing_session_is_refused() {
    let backend = FakeBackend::new(questions(40));
    *backend.readiness.lock().expect("readiness lock") = Readiness::Preparing;

    let err = ExamSession::prepare(
        deps(
            &backend,
            &FakeCamera::new(),
            ScriptedFaces::with(1),
            Arc::new(InMemoryStore::new()),
            default_settings(),
            Clock::fixed(fixed_now()),
        ),
        session_id(),
    )
    .await
    .err()
    .expect("preparing session should not start");
    assert!(matches!(err, SessionError::Preparing(_)));
}

#[tokio::test]
async fn short_section_is_not_ready() {
    let mut short = questions(40);
    short.retain(|q| !(q.section == 3 && q.id.as_str().ends_with("q39")));
    let backend = FakeBackend::new(short);

    let err = ExamSession::prepare(
        deps(
            &backend,
            &FakeCamera::new(),
            ScriptedFaces::with(1),
            Arc::new(InMemoryStore::new()),
            default_settings(),
            Clock::fixed(fixed_now()),
        ),
        session_id(),
    )
    .await
    .err()
    .expect("short set should be refused");
    assert!(matches!(
        err,
        SessionError::NotReady(QuestionSetError::ShortSection {
            section: 3,
            expected: 40,
            actual: 39,
        })
    ));
}

#[tokio::test]
async fn full_session_submits_once_and_clears_state() {
    let storage = Storage::sqlite("sqlite:file:memdb_exam_flow?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let backend = FakeBackend::new(questions(40));
    let camera = FakeCamera::new();
    let session = ExamSession::prepare(
        deps(
            &backend,
            &camera,
            ScriptedFaces::with(1),
            Arc::clone(&storage.kv),
            default_settings(),
            Clock::fixed(fixed_now()),
        ),
        session_id(),
    )
    .await
    .expect("prepare session");
    session.start().await.expect("start session");
    assert_eq!(session.monitor_status(), MonitorStatus::Active);
    assert_eq!(camera.opened.load(Ordering::SeqCst), 1);

    // answer the first question right, one in section 2, one wrong in section 3
    session.select_option(0).await.expect("answer q1");
    session.toggle_review().await.expect("mark q1");
    session.go_to_section(2).await.expect("section 2");
    session.select_option(0).await.expect("answer section 2");
    session.go_to_section(3).await.expect("section 3");
    session.select_option(2).await.expect("answer section 3");
    session.next().await.expect("next");
    session.toggle_review().await.expect("mark unanswered");

    let counts = session.status_counts().await;
    assert_eq!(counts.answered_and_marked_for_review, 1);
    assert_eq!(counts.marked_for_review, 1);

    let outcome = session.submit().await.expect("submit");
    let FinalizeOutcome::Submitted(submission) = outcome else {
        panic!("first submit should transmit");
    };
    let result = &submission.payload.result;
    assert_eq!(result.total_scored(), 80);
    assert_eq!(result.attempted(), 2);
    assert_eq!(result.correct(), 1);
    assert_eq!(result.wrong(), 1);
    assert_eq!(result.not_attempted(), 78);
    assert_eq!(result.marked_for_review(), 1);
    assert_eq!(result.answered_and_marked_for_review(), 1);
    assert_eq!(submission.payload.answers.len(), 120);
    assert_eq!(submission.payload.trigger, SubmissionTrigger::User);
    assert_eq!(
        submission.receipt.next_url.as_deref(),
        Some("/results/result-1")
    );

    assert_eq!(session.submit().await.expect("second submit"), FinalizeOutcome::AlreadyFinalized);
    assert!(matches!(
        session.select_option(1).await,
        Err(SessionError::Locked)
    ));
    assert_eq!(backend.submissions().len(), 1);
    assert!(camera.released.load(Ordering::SeqCst));
    assert_eq!(session.monitor_status(), MonitorStatus::Stopped);

    let leftover = storage
        .kv
        .keys_with_prefix("exam:session-1:")
        .await
        .expect("scan keys");
    assert!(leftover.is_empty(), "persisted state left behind: {leftover:?}");
}

#[tokio::test]
async fn reload_resumes_progress_and_countdown() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));

    let first = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), fixed_now()).await;
    first.start().await.expect("start");
    first.select_option(3).await.expect("answer");
    first.go_to(5).await.expect("navigate");
    first.report_violation(ViolationKind::TabHidden).await.expect("violation");
    first.teardown().await;
    drop(first);

    let reload_at = fixed_now() + Duration::seconds(5);
    let second = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), reload_at).await;
    assert!(matches!(second.recovery(), TimerRecovery::Resumed { .. }));
    assert_eq!(second.remaining(), Duration::hours(1) - Duration::seconds(5));
    assert_eq!(second.warning_count().await, 1);

    let progress = second.progress().await;
    assert_eq!(progress.current_index(), 5);
    let first_question = progress.progress_at(0).expect("first question");
    assert_eq!(first_question.status(), QuestionStatus::Answered);
    assert_eq!(first_question.selected_option(), Some(3));
    assert_eq!(
        progress.progress_at(1).expect("second question").status(),
        QuestionStatus::NotVisited
    );
}

#[tokio::test]
async fn countdown_that_ran_out_while_away_submits_once() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));

    let first = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), fixed_now()).await;
    first.start().await.expect("start");
    first.select_option(0).await.expect("answer");
    first.teardown().await;
    drop(first);

    let reload_at = fixed_now() + Duration::hours(1) + Duration::seconds(1);
    let second = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), reload_at).await;
    assert!(matches!(second.recovery(), TimerRecovery::Expired { .. }));
    assert_eq!(second.remaining(), Duration::zero());

    second.start().await.expect("expired start");
    second.start().await.expect("second start");
    assert_eq!(second.tick().await.expect("tick"), TimerTick::Idle);

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].trigger, SubmissionTrigger::Timer);
    assert_eq!(submissions[0].result.correct(), 1);
    assert!(kv.keys_with_prefix("exam:session-1:").await.expect("scan").is_empty());
}

#[tokio::test]
async fn timer_and_user_racing_transmit_one_snapshot() {
    let backend = FakeBackend::new(questions(40));
    let session = prepare_at(
        &backend,
        Arc::new(InMemoryStore::new()),
        AssessmentSettingsDraft::new(),
        fixed_now(),
    )
    .await;
    session.start().await.expect("start");

    let (timer, user) = tokio::join!(
        session.finalize(SubmissionTrigger::Timer),
        session.submit(),
    );
    let outcomes = [timer.expect("timer finalize"), user.expect("user finalize")];
    let submitted = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, FinalizeOutcome::Submitted(_)))
        .count();
    assert_eq!(submitted, 1);
    assert_eq!(backend.submissions().len(), 1);
}

#[tokio::test]
async fn warning_limit_submits_only_when_policy_enabled() {
    let backend = FakeBackend::new(questions(40));
    let off = prepare_at(
        &backend,
        Arc::new(InMemoryStore::new()),
        AssessmentSettingsDraft {
            max_warnings: Some(2),
            ..AssessmentSettingsDraft::new()
        },
        fixed_now(),
    )
    .await;
    off.start().await.expect("start");
    for _ in 0..3 {
        off.report_violation(ViolationKind::WindowBlurred)
            .await
            .expect("violation");
    }
    tokio::task::yield_now().await;
    assert!(!off.is_finalized());
    assert_eq!(off.warning_count().await, 3);

    let backend = FakeBackend::new(questions(40));
    let on = prepare_at(
        &backend,
        Arc::new(InMemoryStore::new()),
        AssessmentSettingsDraft {
            max_warnings: Some(2),
            auto_submit_on_max_warnings: Some(true),
            ..AssessmentSettingsDraft::new()
        },
        fixed_now(),
    )
    .await;
    let mut events = on.subscribe();
    on.start().await.expect("start");
    on.report_violation(ViolationKind::NoFace).await.expect("first");
    on.report_violation(ViolationKind::NoFace).await.expect("second");

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Submitted(_))).await;
    let SessionEvent::Submitted(submission) = event else {
        unreachable!();
    };
    assert_eq!(submission.payload.trigger, SubmissionTrigger::MonitorPolicy);
    assert_eq!(submission.payload.warning_count, 2);
    assert_eq!(backend.submissions().len(), 1);
}

#[tokio::test]
async fn restored_warnings_at_the_limit_submit_on_start() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));
    let draft = |auto_submit| AssessmentSettingsDraft {
        max_warnings: Some(2),
        auto_submit_on_max_warnings: Some(auto_submit),
        ..AssessmentSettingsDraft::new()
    };

    let first = prepare_at(&backend, Arc::clone(&kv), draft(false), fixed_now()).await;
    first.start().await.expect("start");
    first.report_violation(ViolationKind::TabHidden).await.expect("first");
    first.report_violation(ViolationKind::TabHidden).await.expect("second");
    first.teardown().await;
    assert!(!first.is_finalized());
    drop(first);

    let resumed = prepare_at(
        &backend,
        Arc::clone(&kv),
        draft(true),
        fixed_now() + Duration::seconds(5),
    )
    .await;
    assert_eq!(resumed.warning_count().await, 2);
    let mut events = resumed.subscribe();
    resumed.start().await.expect("start");

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Submitted(_))).await;
    let SessionEvent::Submitted(submission) = event else {
        unreachable!();
    };
    assert_eq!(submission.payload.trigger, SubmissionTrigger::MonitorPolicy);
    assert_eq!(submission.payload.warning_count, 2);
    assert_eq!(backend.submissions().len(), 1);
}

#[tokio::test]
async fn failed_auto_submit_keeps_state_until_retry() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));
    backend.fail_submissions.store(1, Ordering::SeqCst);
    let session = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), fixed_now()).await;
    session.start().await.expect("start");
    session.select_option(1).await.expect("answer");

    let err = session
        .finalize(SubmissionTrigger::Timer)
        .await
        .err()
        .expect("grader is down");
    assert!(matches!(
        err,
        SessionError::Submission(SubmissionError::AutoSubmitFailed {
            trigger: SubmissionTrigger::Timer,
            ..
        })
    ));
    assert!(matches!(session.select_option(0).await, Err(SessionError::Locked)));
    assert!(!kv.keys_with_prefix("exam:session-1:").await.expect("scan").is_empty());

    let submission = session.retry_submission().await.expect("retry");
    let sent = backend.submissions();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    assert_eq!(submission.payload, sent[0]);
    assert!(kv.keys_with_prefix("exam:session-1:").await.expect("scan").is_empty());
}

#[tokio::test]
async fn reload_after_failed_auto_submit_stays_locked_with_the_same_payload() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));
    backend.fail_submissions.store(1, Ordering::SeqCst);
    let session = prepare_at(&backend, Arc::clone(&kv), AssessmentSettingsDraft::new(), fixed_now()).await;
    session.start().await.expect("start");
    session.select_option(2).await.expect("answer");

    session
        .finalize(SubmissionTrigger::MonitorPolicy)
        .await
        .err()
        .expect("grader is down");
    assert!(kv
        .get("exam:session-1:submission")
        .await
        .expect("read submission")
        .is_some());
    session.teardown().await;
    drop(session);

    let reloaded = prepare_at(
        &backend,
        Arc::clone(&kv),
        AssessmentSettingsDraft::new(),
        fixed_now() + Duration::seconds(10),
    )
    .await;
    reloaded.start().await.expect("start");
    assert!(reloaded.is_finalized());
    assert!(matches!(reloaded.select_option(0).await, Err(SessionError::Locked)));
    assert_eq!(
        reloaded.submit().await.expect("submit"),
        FinalizeOutcome::AlreadyFinalized
    );
    assert_eq!(backend.submissions().len(), 1);

    let submission = reloaded.retry_submission().await.expect("retry");
    let sent = backend.submissions();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        serde_json::to_string(&sent[0]).expect("encode first"),
        serde_json::to_string(&sent[1]).expect("encode retry")
    );
    assert_eq!(submission.payload.trigger, SubmissionTrigger::MonitorPolicy);
    assert!(kv.keys_with_prefix("exam:session-1:").await.expect("scan").is_empty());
}

#[tokio::test]
async fn host_signals_are_debounced_and_teardown_keeps_state() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let backend = FakeBackend::new(questions(40));
    let camera = FakeCamera::new();
    let session = prepare_with_camera(
        &backend,
        &camera,
        Arc::clone(&kv),
        AssessmentSettingsDraft::new(),
        fixed_now(),
    )
    .await;
    let mut events = session.subscribe();
    session.start().await.expect("start");

    let (tx, rx) = mpsc::channel(8);
    session.attach_host_signals(rx);
    tx.send(HostSignal::Visibility { visible: false }).await.expect("send");
    tx.send(HostSignal::Visibility { visible: false }).await.expect("send");
    tx.send(HostSignal::Visibility { visible: true }).await.expect("send");
    tx.send(HostSignal::Focus { focused: false }).await.expect("send");

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Violation(v) if v.kind == ViolationKind::WindowBlurred)
    })
    .await;
    assert_eq!(session.warning_count().await, 2);

    tx.send(HostSignal::BeforeTeardown).await.expect("send");
    tokio::time::timeout(std::time::Duration::from_secs(5), tx.closed())
        .await
        .expect("signal loop exits");
    assert_eq!(session.monitor_status(), MonitorStatus::Stopped);
    assert!(camera.released.load(Ordering::SeqCst));
    assert!(!session.is_finalized());
    assert!(kv
        .get("exam:session-1:timer")
        .await
        .expect("read timer")
        .is_some());
}
