#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;

use exam_core::model::{
    AssessmentSettings, AssessmentSettingsDraft, Frame, Question, QuestionId, SessionId,
};
use services::{
    CameraError, CameraSource, CameraStream, CheatEvent, CheatEventSink, Clock,
    CollaboratorError, DetectorError, ExamDeps, FaceDetector, GradingClient, GradingReceipt,
    QuestionSetLoader, Readiness, SessionEvent, SessionStatusProbe, SubmissionPayload,
};
use storage::repository::KeyValueStore;
use tokio::sync::broadcast;

/// `per_section` questions in each of three sections, first option correct.
pub fn questions(per_section: usize) -> Vec<Question> {
    (1..=3u8)
        .flat_map(|section| {
            (0..per_section).map(move |n| Question {
                id: QuestionId::new(format!("s{section}-q{n}")).expect("question id"),
                section,
                prompt: format!("Question {n} of section {section}"),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_option_index: Some(0),
            })
        })
        .collect()
}

pub fn session_id() -> SessionId {
    SessionId::new("session-1").expect("session id")
}

/// Grading backend fake covering all four collaborator contracts.
pub struct FakeBackend {
    pub readiness: Mutex<Readiness>,
    pub questions: Vec<Question>,
    pub fail_submissions: AtomicUsize,
    pub submissions: Mutex<Vec<SubmissionPayload>>,
    pub cheat_events: Mutex<Vec<CheatEvent>>,
}

impl FakeBackend {
    pub fn new(questions: Vec<Question>) -> Arc<Self> {
        Arc::new(Self {
            readiness: Mutex::new(Readiness::Ready),
            questions,
            fail_submissions: AtomicUsize::new(0),
            submissions: Mutex::new(Vec::new()),
            cheat_events: Mutex::new(Vec::new()),
        })
    }

    pub fn submissions(&self) -> Vec<SubmissionPayload> {
        self.submissions.lock().expect("submissions lock").clone()
    }
}

#[async_trait]
impl SessionStatusProbe for FakeBackend {
    async fn status(&self, _session_id: &SessionId) -> Result<Readiness, CollaboratorError> {
        Ok(*self.readiness.lock().expect("readiness lock"))
    }
}

#[async_trait]
impl QuestionSetLoader for FakeBackend {
    async fn load(&self, _session_id: &SessionId) -> Result<Vec<Question>, CollaboratorError> {
        Ok(self.questions.clone())
    }
}

#[async_trait]
impl GradingClient for FakeBackend {
    async fn submit(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<GradingReceipt, CollaboratorError> {
        self.submissions
            .lock()
            .expect("submissions lock")
            .push(payload.clone());
        tokio::task::yield_now().await;
        let failing = self
            .fail_submissions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Unavailable("grader offline".into()));
        }
        Ok(GradingReceipt {
            result_id: Some("result-1".into()),
            score: None,
            next_url: Some("/results/result-1".into()),
        })
    }
}

#[async_trait]
impl CheatEventSink for FakeBackend {
    async fn record(&self, event: &CheatEvent) -> Result<(), CollaboratorError> {
        self.cheat_events
            .lock()
            .expect("cheat events lock")
            .push(event.clone());
        Ok(())
    }
}

/// Camera that always yields a bright frame; the detector decides faces.
pub struct FakeCamera {
    pub opened: AtomicUsize,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct FakeStream {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            released: Arc::clone(&self.released),
        }))
    }
}

#[async_trait]
impl CameraStream for FakeStream {
    async fn capture(&mut self) -> Result<Frame, CameraError> {
        Frame::solid(4, 4, 150).map_err(|err| CameraError::Other(err.to_string()))
    }

    fn stop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Detector whose face count the test controls.
#[derive(Clone, Default)]
pub struct ScriptedFaces(pub Arc<AtomicUsize>);

impl ScriptedFaces {
    pub fn with(faces: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(faces)))
    }
}

impl FaceDetector for ScriptedFaces {
    fn detect(&self, _frame: &Frame) -> Result<usize, DetectorError> {
        Ok(self.0.load(Ordering::SeqCst))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn settings(draft: AssessmentSettingsDraft) -> AssessmentSettings {
    draft.validate().expect("valid settings")
}

pub fn deps(
    backend: &Arc<FakeBackend>,
    camera: &Arc<FakeCamera>,
    faces: ScriptedFaces,
    kv: Arc<dyn KeyValueStore>,
    settings: AssessmentSettings,
    clock: Clock,
) -> ExamDeps {
    ExamDeps {
        probe: backend.clone(),
        loader: backend.clone(),
        grading: backend.clone(),
        sink: backend.clone(),
        camera: camera.clone(),
        detector: Box::new(faces),
        kv,
        settings,
        clock,
    }
}

/// Wait for the first event matching `pred`, failing after five seconds.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event within timeout")
}
