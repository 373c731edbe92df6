use crate::common::Config;
use crate::core::capabilities::{
    Announcer, EmotionClassifier, ExtractedText, FaceBox, FaceDetector, HandTracker,
    IdentityMatcher, TextExtractor,
};
use crate::core::gesture::{GestureMapper, GestureSignal};
use crate::core::identity::{self, parse_card, CardFields, Identity};
use crate::core::session::{AuthSession, SessionTransition};
use crate::storage::{AttendanceLedger, RecordOutcome};
use chrono::{Local, NaiveDateTime};
use image::DynamicImage;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const AUTH_PROMPT: &str = "Please authenticate to use gesture control";

/// Both clocks a frame is processed against.
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    /// Drives prompt debouncing, the absence grace window and OCR retention.
    pub monotonic: Instant,
    /// Written to the ledger.
    pub wall: NaiveDateTime,
}

impl FrameTime {
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Local::now().naive_local(),
        }
    }
}

/// The sensors the orchestrator reads from.
pub struct Collaborators {
    pub detector: Box<dyn FaceDetector>,
    pub matcher: Box<dyn IdentityMatcher>,
    pub emotion: Box<dyn EmotionClassifier>,
    pub text: Box<dyn TextExtractor>,
    pub hands: Box<dyn HandTracker>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Largest faces first; `None` processes every detected face.
    pub max_faces: Option<usize>,
    pub text_retention: Duration,
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_faces: Some(config.auth.max_faces).filter(|&n| n > 0),
            text_retention: Duration::from_secs(config.ocr.retention_secs),
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self { max_faces: None, text_retention: Duration::from_secs(30) }
    }
}

/// What happened during one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub faces: usize,
    pub authenticated: bool,
    pub new_session: Option<Identity>,
    pub gesture: Option<GestureSignal>,
    pub prompted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Both a name and an id were read.
    Parsed(CardFields),
    Unparsed,
    NoText,
    Failed,
}

impl CaptureOutcome {
    fn message(&self) -> String {
        match self {
            CaptureOutcome::Parsed(card) => {
                format!("Detected {}", card.name.as_deref().unwrap_or_default())
            }
            CaptureOutcome::Unparsed => "Could not parse ID".to_string(),
            CaptureOutcome::NoText => "No text detected".to_string(),
            CaptureOutcome::Failed => "OCR failed".to_string(),
        }
    }
}

struct TextReading {
    text: String,
    captured_at: Instant,
}

/// Drives one frame at a time through identity, attendance and gesture handling.
pub struct FrameOrchestrator {
    sensors: Collaborators,
    session: AuthSession,
    gesture: GestureMapper,
    ledger: AttendanceLedger,
    announcer: Rc<dyn Announcer>,
    options: OrchestratorOptions,
    reading: Option<TextReading>,
    last_capture: Option<CaptureOutcome>,
}

impl FrameOrchestrator {
    pub fn new(
        sensors: Collaborators,
        session: AuthSession,
        gesture: GestureMapper,
        ledger: AttendanceLedger,
        announcer: Rc<dyn Announcer>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            sensors,
            session,
            gesture,
            ledger,
            announcer,
            options,
            reading: None,
            last_capture: None,
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    pub fn gesture_scale(&self) -> f32 {
        self.gesture.scale()
    }

    /// OCR text currently used to refine identities.
    ///
    /// Readings older than the retention period are dropped on the first frame
    /// processed without an authenticated user.
    pub fn current_text(&self) -> Option<&str> {
        self.reading.as_ref().map(|r| r.text.as_str())
    }

    pub fn process_frame(&mut self, frame: &DynamicImage, at: FrameTime) -> FrameReport {
        let snapshot = self.session.snapshot();
        // A reading outlives its retention while the session it refined is still active.
        if !snapshot.authenticated {
            self.expire_text(at.monotonic);
        }

        let mut report = FrameReport::default();
        let mut prompt_requested = false;

        match self.sensors.detector.detect(frame) {
            Ok(mut faces) if !faces.is_empty() => {
                report.faces = faces.len();
                faces.sort_by(|a, b| b.area().total_cmp(&a.area()));
                if let Some(max) = self.options.max_faces {
                    faces.truncate(max);
                }
                for face in &faces {
                    if let Some(identity) = self.process_face(frame, face, at) {
                        report.new_session = Some(identity);
                    }
                }
            }
            Ok(_) => {
                self.session.observe_absence(at.monotonic);
                prompt_requested = true;
            }
            Err(e) => {
                tracing::error!("Face detection failed: {}", e);
                self.session.force_unauthenticated("face detector failed");
            }
        }

        let hands = if snapshot.authenticated {
            self.sensors.hands.track(frame).unwrap_or_else(|e| {
                tracing::warn!("Hand tracking failed: {}", e);
                Vec::new()
            })
        } else {
            prompt_requested = true;
            Vec::new()
        };
        report.gesture = self.gesture.map(&snapshot, &hands, frame.width(), frame.height());

        if prompt_requested && self.session.poll_prompt(at.monotonic) {
            tracing::warn!("Gesture control blocked: no authenticated user");
            self.announcer.say(AUTH_PROMPT);
            report.prompted = true;
        }

        report.authenticated = self.session.is_authenticated();
        report
    }

    /// Read an ID card from `frame` and keep the text for identity resolution.
    ///
    /// Text with neither a name nor an id leaves the previous reading in place.
    pub fn capture_text(&mut self, frame: &DynamicImage, at: FrameTime) -> CaptureOutcome {
        let outcome = match self.sensors.text.extract(frame) {
            Ok(ExtractedText::Text(text)) => {
                let card = parse_card(&text);
                if card.name.is_some() || card.external_id.is_some() {
                    self.reading = Some(TextReading { text, captured_at: at.monotonic });
                }
                if card.is_complete() {
                    CaptureOutcome::Parsed(card)
                } else {
                    CaptureOutcome::Unparsed
                }
            }
            Ok(ExtractedText::NoText) => CaptureOutcome::NoText,
            Err(e) => {
                tracing::error!("OCR failed: {}", e);
                CaptureOutcome::Failed
            }
        };

        if self.last_capture.as_ref() != Some(&outcome) {
            self.announcer.say(&outcome.message());
            self.last_capture = Some(outcome.clone());
        }
        outcome
    }

    pub fn clear_text(&mut self) {
        self.reading = None;
        self.last_capture = None;
    }

    fn expire_text(&mut self, now: Instant) {
        let expired = self.reading.as_ref().is_some_and(|r| {
            now.saturating_duration_since(r.captured_at) > self.options.text_retention
        });
        if expired {
            tracing::debug!("OCR reading expired");
            self.clear_text();
        }
    }

    fn process_face(&mut self, frame: &DynamicImage, face: &FaceBox, at: FrameTime) -> Option<Identity> {
        let crop = face.crop(frame);
        let face_match = match self.sensors.matcher.match_face(&crop) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Identity matching failed: {}", e);
                self.session.force_unauthenticated("identity matcher failed");
                return None;
            }
        };

        let resolved = identity::resolve(face_match.as_ref(), self.current_text().unwrap_or(""));
        match self.session.observe(resolved, at.monotonic) {
            SessionTransition::NewSession(identity) => {
                self.log_attendance(&identity, &crop, at.wall);
                Some(identity)
            }
            _ => None,
        }
    }

    fn log_attendance(&mut self, identity: &Identity, face: &DynamicImage, wall: NaiveDateTime) {
        let emotion = match self.sensors.emotion.classify(face) {
            Ok(emotion) => emotion,
            Err(e) => {
                tracing::error!("Emotion classification failed for {}: {}", identity, e);
                self.session.abort_session("emotion classifier failed");
                return;
            }
        };

        match self.ledger.record(identity, &emotion, wall) {
            Ok(RecordOutcome::Written(record)) => {
                self.announcer.say(&format!("{} marked present", record.name));
            }
            Ok(RecordOutcome::Duplicate) => {}
            Err(e) => tracing::error!("Attendance for {} not saved: {}", identity, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::GestureConfig;
    use crate::common::{KioskError, Result};
    use crate::core::capabilities::{DisabledControl, HandLandmarks, IdentityMatch, NoHands};
    use crate::core::session::AbsencePolicy;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scene {
        faces: Vec<Option<&'static str>>,
        pending: VecDeque<Option<&'static str>>,
        detector_fails: bool,
        classifier_fails: bool,
        text: Option<Result<ExtractedText>>,
    }

    type SharedScene = Rc<RefCell<Scene>>;

    struct Detector(SharedScene);

    impl FaceDetector for Detector {
        fn detect(&self, _frame: &DynamicImage) -> Result<Vec<FaceBox>> {
            let mut scene = self.0.borrow_mut();
            if scene.detector_fails {
                return Err(KioskError::Model("detector offline".into()));
            }
            scene.pending = scene.faces.iter().copied().collect();
            Ok((0..scene.faces.len())
                .map(|i| {
                    let x = 20.0 * i as f32;
                    FaceBox { x1: x, y1: 0.0, x2: x + 100.0 - 10.0 * i as f32, y2: 100.0, confidence: 0.9 }
                })
                .collect())
        }
    }

    struct Matcher(SharedScene);

    impl IdentityMatcher for Matcher {
        fn match_face(&self, _face: &DynamicImage) -> Result<Option<IdentityMatch>> {
            let label = self.0.borrow_mut().pending.pop_front().flatten();
            Ok(label.map(|l| IdentityMatch::new(l, 0.9)))
        }
    }

    struct Emotion(SharedScene);

    impl EmotionClassifier for Emotion {
        fn classify(&self, _face: &DynamicImage) -> Result<String> {
            if self.0.borrow().classifier_fails {
                return Err(KioskError::Model("classifier offline".into()));
            }
            Ok("happy".into())
        }
    }

    struct Text(SharedScene);

    impl TextExtractor for Text {
        fn extract(&self, _image: &DynamicImage) -> Result<ExtractedText> {
            self.0.borrow_mut().text.take().unwrap_or(Ok(ExtractedText::NoText))
        }
    }

    #[derive(Default)]
    struct Spoken(RefCell<Vec<String>>);

    impl Announcer for Spoken {
        fn say(&self, text: &str) {
            self.0.borrow_mut().push(text.to_string());
        }
    }

    struct Harness {
        orchestrator: FrameOrchestrator,
        scene: SharedScene,
        spoken: Rc<Spoken>,
        _dir: tempfile::TempDir,
        t0: Instant,
        frame: DynamicImage,
    }

    impl Harness {
        fn new(options: OrchestratorOptions) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let scene = SharedScene::default();
            let spoken = Rc::new(Spoken::default());
            let sensors = Collaborators {
                detector: Box::new(Detector(scene.clone())),
                matcher: Box::new(Matcher(scene.clone())),
                emotion: Box::new(Emotion(scene.clone())),
                text: Box::new(Text(scene.clone())),
                hands: Box::new(NoHands),
            };
            let gesture = GestureMapper::new(
                GestureConfig::default(),
                Box::new(DisabledControl("volume")),
                Box::new(DisabledControl("brightness")),
            );
            let ledger = AttendanceLedger::open(dir.path().join("attendance.csv")).unwrap();
            let orchestrator = FrameOrchestrator::new(
                sensors,
                AuthSession::new(AbsencePolicy::Immediate, Duration::from_secs(5)),
                gesture,
                ledger,
                spoken.clone(),
                options,
            );
            Self {
                orchestrator,
                scene,
                spoken,
                _dir: dir,
                t0: Instant::now(),
                frame: DynamicImage::new_rgb8(320, 240),
            }
        }

        fn at(&self, ms: u64) -> FrameTime {
            FrameTime { monotonic: self.t0 + Duration::from_millis(ms), wall: Local::now().naive_local() }
        }

        fn frame(&mut self, ms: u64, faces: &[Option<&'static str>]) -> FrameReport {
            self.scene.borrow_mut().faces = faces.to_vec();
            let at = self.at(ms);
            self.orchestrator.process_frame(&self.frame, at)
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken.0.borrow().clone()
        }
    }

    #[test]
    fn detector_failure_drops_authentication() {
        let mut h = Harness::new(OrchestratorOptions::default());
        assert!(h.frame(0, &[Some("alice")]).authenticated);
        h.scene.borrow_mut().detector_fails = true;
        let report = h.frame(33, &[Some("alice")]);
        assert!(!report.authenticated);
        assert_eq!(h.orchestrator.ledger().len(), 1);
    }

    #[test]
    fn classifier_failure_skips_ledger_and_retries() {
        let mut h = Harness::new(OrchestratorOptions::default());
        h.scene.borrow_mut().classifier_fails = true;
        let report = h.frame(0, &[Some("alice")]);
        assert!(!report.authenticated);
        assert!(h.orchestrator.ledger().is_empty());

        h.scene.borrow_mut().classifier_fails = false;
        let report = h.frame(33, &[Some("alice")]);
        assert!(report.new_session.is_some());
        assert_eq!(h.orchestrator.ledger().len(), 1);
        assert_eq!(h.spoken().last().map(String::as_str), Some("alice marked present"));
    }

    #[test]
    fn zero_max_faces_processes_everyone() {
        let mut config = Config::default();
        assert_eq!(OrchestratorOptions::from_config(&config).max_faces, Some(1));
        config.auth.max_faces = 0;
        assert_eq!(OrchestratorOptions::from_config(&config).max_faces, None);
    }

    #[test]
    fn max_faces_keeps_largest() {
        let mut h = Harness::new(OrchestratorOptions { max_faces: Some(1), ..Default::default() });
        let report = h.frame(0, &[Some("big"), Some("small")]);
        assert_eq!(report.faces, 2);
        assert_eq!(report.new_session.map(|i| i.name), Some("big".to_string()));
        assert_eq!(h.orchestrator.ledger().len(), 1);
    }

    #[test]
    fn empty_frames_prompt_once_per_interval() {
        let mut h = Harness::new(OrchestratorOptions::default());
        let prompts = (0..200u64).filter(|i| h.frame(i * 33, &[]).prompted).count();
        assert_eq!(prompts, 2);
        assert!(h.spoken().iter().all(|s| s == AUTH_PROMPT));
    }

    #[test]
    fn capture_announces_only_on_change() {
        let mut h = Harness::new(OrchestratorOptions::default());
        for _ in 0..3 {
            h.scene.borrow_mut().text = Some(Ok(ExtractedText::Text("Name: Alice ID 00123456".into())));
            let at = h.at(0);
            let outcome = h.orchestrator.capture_text(&h.frame, at);
            assert!(matches!(outcome, CaptureOutcome::Parsed(_)));
        }
        let at = h.at(10);
        assert_eq!(h.orchestrator.capture_text(&h.frame, at), CaptureOutcome::NoText);
        h.scene.borrow_mut().text = Some(Err(KioskError::Device("no tesseract".into())));
        let at = h.at(20);
        assert_eq!(h.orchestrator.capture_text(&h.frame, at), CaptureOutcome::Failed);

        assert_eq!(h.spoken(), vec!["Detected Alice", "No text detected", "OCR failed"]);
        assert_eq!(h.orchestrator.current_text(), Some("Name: Alice ID 00123456"));
    }

    #[test]
    fn reading_refines_identity_until_it_expires() {
        let options = OrchestratorOptions { text_retention: Duration::from_secs(30), ..Default::default() };
        let mut h = Harness::new(options);
        h.scene.borrow_mut().text = Some(Ok(ExtractedText::Text("name: Alice Smith id 00123456".into())));
        let at = h.at(0);
        h.orchestrator.capture_text(&h.frame, at);

        let report = h.frame(1_000, &[Some("alice")]);
        let identity = report.new_session.unwrap();
        assert_eq!(identity.name, "Alice Smith");
        assert_eq!(identity.external_id, "00123456");

        h.frame(2_000, &[]);
        let report = h.frame(31_000, &[Some("alice")]);
        assert_eq!(h.orchestrator.current_text(), None);
        assert_eq!(report.new_session.map(|i| i.external_id), Some("unknown".to_string()));
    }

    #[test]
    fn reading_is_kept_while_its_session_lasts() {
        let mut h = Harness::new(OrchestratorOptions::default());
        h.frame(0, &[Some("alice")]);
        h.scene.borrow_mut().text = Some(Ok(ExtractedText::Text("Name: Alice Smith ID 00123456".into())));
        let at = h.at(100);
        h.orchestrator.capture_text(&h.frame, at);

        for i in 0..1_100u64 {
            h.frame(200 + i * 33, &[Some("alice")]);
        }
        assert!(h.orchestrator.current_text().is_some());
        let names: Vec<_> = h.orchestrator.ledger().records().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["alice", "Alice Smith"]);

        h.frame(40_000, &[]);
        h.frame(40_033, &[]);
        assert_eq!(h.orchestrator.current_text(), None);
    }

    #[test]
    fn garbage_text_keeps_previous_reading() {
        let mut h = Harness::new(OrchestratorOptions::default());
        h.scene.borrow_mut().text = Some(Ok(ExtractedText::Text("ID 123456789".into())));
        let at = h.at(0);
        assert_eq!(h.orchestrator.capture_text(&h.frame, at), CaptureOutcome::Unparsed);
        h.scene.borrow_mut().text = Some(Ok(ExtractedText::Text("~~ !! ~~".into())));
        let at = h.at(5);
        h.orchestrator.capture_text(&h.frame, at);
        assert_eq!(h.orchestrator.current_text(), Some("ID 123456789"));
        assert_eq!(h.spoken(), vec!["Could not parse ID"]);

        h.orchestrator.clear_text();
        assert_eq!(h.orchestrator.current_text(), None);
    }

    #[test]
    fn hands_are_ignored_until_the_next_frame_after_login() {
        let mut h = Harness::new(OrchestratorOptions::default());
        h.orchestrator.sensors.hands = Box::new(OneHand);
        let first = h.frame(0, &[Some("alice")]);
        assert!(first.authenticated);
        assert_eq!(first.gesture, None);
        let second = h.frame(33, &[Some("alice")]);
        assert_eq!(second.gesture.map(|g| g.volume), Some(50));
    }

    struct OneHand;

    impl HandTracker for OneHand {
        fn track(&self, _frame: &DynamicImage) -> Result<Vec<HandLandmarks>> {
            Ok(vec![HandLandmarks::new(vec![
                crate::core::capabilities::Landmark::new(0.5, 0.5);
                HandLandmarks::COUNT
            ])])
        }
    }
}
