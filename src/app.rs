use crate::camera::{Camera, CameraSession};
use crate::cli::{self, KioskCommand, RawModeGuard};
use crate::common::{Config, DevMode, KioskError, Result};
use crate::core::capabilities::{
    Announcer, EmotionClassifier, FaceBox, FaceDetector, HandTracker, IdentityMatch,
    IdentityMatcher, NoHands,
};
use crate::core::{AuthSession, Collaborators, FrameOrchestrator, FrameTime, GestureMapper, OrchestratorOptions};
use crate::devices;
use crate::service::QueuedAnnouncer;
use crate::storage::{AttendanceLedger, Gallery};
use crate::vision::{
    FaceEmbedder, FerPlusClassifier, GalleryMatcher, OnnxHandTracker, TesseractExtractor,
    YoloFaceDetector,
};
use image::DynamicImage;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

const KEY_HELP: &str = "[SPACE] OCR  |  [E] Emotion Stats  |  [ESC] Exit  |  [P] Toggle Simple View";
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The running kiosk: camera plus everything driven by its frames.
pub struct Kiosk {
    camera: Camera,
    state: KioskState,
}

struct KioskState {
    config: Config,
    orchestrator: FrameOrchestrator,
    announcer: Rc<QueuedAnnouncer>,
    analytics_path: PathBuf,
    ocr_on: bool,
    simple_view: bool,
    last_ocr: Option<Instant>,
}

impl Kiosk {
    pub fn new(config: Config, dev_mode: &DevMode) -> Result<Self> {
        let camera = Camera::open(&config.camera)?;
        let announcer = Rc::new(QueuedAnnouncer::from_config(&config.announcer)?);

        let sensors = build_sensors(&config, dev_mode);
        let gesture = GestureMapper::new(
            config.gesture.clone(),
            devices::volume_control(&config.devices),
            devices::brightness_control(&config.devices),
        );
        let ledger = AttendanceLedger::open(dev_mode.ledger_path(&config))?;
        let session = AuthSession::new(config.auth.policy(), config.auth.prompt_interval());

        let speaker: Rc<dyn Announcer> = announcer.clone();
        let orchestrator = FrameOrchestrator::new(
            sensors,
            session,
            gesture,
            ledger,
            speaker,
            OrchestratorOptions::from_config(&config),
        );

        let state = KioskState {
            analytics_path: dev_mode.analytics_path(&config),
            config,
            orchestrator,
            announcer,
            ocr_on: false,
            simple_view: false,
            last_ocr: None,
        };
        Ok(Self { camera, state })
    }

    pub fn run(mut self) -> Result<()> {
        let result = self.run_loop();
        self.state.shutdown();
        result
    }

    fn run_loop(&mut self) -> Result<()> {
        let mut stream = self.camera.start_session()?;
        let _raw_mode = match RawModeGuard::enable() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Keyboard commands unavailable: {}", e);
                None
            }
        };
        println!("{}\r", KEY_HELP);

        loop {
            match cli::poll_command() {
                Ok(Some(command)) => {
                    if self.state.handle_command(command).is_break() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Key poll failed: {}", e),
            }

            if let Some(raw) = next_frame(&mut stream) {
                self.state.process(&raw);
            }
        }

        println!("\r");
        Ok(())
    }
}

impl KioskState {
    fn process(&mut self, raw: &DynamicImage) {
        let mirrored = self.config.camera.mirror.then(|| raw.fliph());
        let view = mirrored.as_ref().unwrap_or(raw);

        let at = FrameTime::now();
        let report = self.orchestrator.process_frame(view, at);

        let interval = Duration::from_millis(self.config.ocr.interval_ms);
        let due = self.last_ocr.map_or(true, |t| at.monotonic.duration_since(t) >= interval);
        if self.ocr_on && due {
            // Text is read from the unmirrored frame.
            self.orchestrator.capture_text(raw, at);
            self.last_ocr = Some(at.monotonic);
        }

        let identity = self.orchestrator.session().snapshot().identity.map(|i| i.name);
        let line = cli::status_line(&report, identity.as_deref(), self.ocr_on, self.simple_view);
        if let Err(e) = cli::render_status(&line) {
            tracing::debug!("Status render failed: {}", e);
        }
    }

    fn handle_command(&mut self, command: KioskCommand) -> ControlFlow<()> {
        match command {
            KioskCommand::ToggleOcr => {
                self.ocr_on = !self.ocr_on;
                if self.ocr_on {
                    self.orchestrator.clear_text();
                    self.last_ocr = None;
                }
                tracing::info!("OCR capture {}", if self.ocr_on { "on" } else { "off" });
            }
            KioskCommand::ExportAnalytics => {
                if self.export_analytics() {
                    self.announcer.say("Emotion chart generated");
                }
            }
            KioskCommand::ToggleSimpleView => {
                self.simple_view = !self.simple_view;
                tracing::info!(
                    "Pipeline mode: {}",
                    if self.simple_view { "Simplified" } else { "Full" }
                );
            }
            KioskCommand::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn export_analytics(&self) -> bool {
        match cli::export_analytics(self.orchestrator.ledger(), &self.analytics_path) {
            Ok(Some(export)) => {
                tracing::info!(
                    "Emotion analytics for {} records written to {}",
                    export.total,
                    export.chart.display()
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Analytics export failed: {}", e);
                false
            }
        }
    }

    fn shutdown(self) {
        if self.config.analytics.export_on_shutdown {
            self.export_analytics();
        }
        self.announcer.say("System shutting down");

        let Self { orchestrator, announcer, .. } = self;
        drop(orchestrator);
        match Rc::try_unwrap(announcer) {
            Ok(mut announcer) => announcer.shutdown(),
            Err(_) => tracing::warn!("Announcer still shared at shutdown"),
        }
    }
}

fn next_frame(stream: &mut CameraSession<'_>) -> Option<DynamicImage> {
    match stream.capture_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("Skipping frame: {}", e);
            std::thread::sleep(CAPTURE_RETRY_DELAY);
            None
        }
    }
}

/// Stand-in for a model that failed to load; every call reports the failure.
struct Unavailable(String);

impl Unavailable {
    fn error(&self) -> KioskError {
        KioskError::Model(self.0.clone())
    }
}

impl FaceDetector for Unavailable {
    fn detect(&self, _frame: &DynamicImage) -> Result<Vec<FaceBox>> {
        Err(self.error())
    }
}

impl IdentityMatcher for Unavailable {
    fn match_face(&self, _face: &DynamicImage) -> Result<Option<IdentityMatch>> {
        Err(self.error())
    }
}

impl EmotionClassifier for Unavailable {
    fn classify(&self, _face: &DynamicImage) -> Result<String> {
        Err(self.error())
    }
}

fn unavailable(what: &str, e: KioskError) -> Unavailable {
    tracing::error!("{} unavailable: {}", what, e);
    Unavailable(format!("{} unavailable", what))
}

fn build_sensors(config: &Config, dev_mode: &DevMode) -> Collaborators {
    let detector = YoloFaceDetector::new(config);
    let matcher: Box<dyn IdentityMatcher> = match (&detector, FaceEmbedder::new(config)) {
        (Ok(detector), Ok(embedder)) => {
            let cache = dev_mode.gallery_cache_path(config);
            let gallery = Gallery::build(&config.gallery.dataset_dir, &cache, |photo| {
                embedder.embed_reference(detector, photo)
            })
            .unwrap_or_else(|e| {
                tracing::error!("Gallery not loaded: {}", e);
                Gallery::default()
            });
            Box::new(GalleryMatcher::new(embedder, gallery, config.recognizer.similarity_threshold))
        }
        (_, Err(e)) => Box::new(unavailable("Face recognizer", e)),
        (Err(_), Ok(_)) => Box::new(Unavailable("Face recognizer needs the detector".into())),
    };
    let detector: Box<dyn FaceDetector> = match detector {
        Ok(detector) => Box::new(detector),
        Err(e) => Box::new(unavailable("Face detector", e)),
    };
    let emotion: Box<dyn EmotionClassifier> = match FerPlusClassifier::new(config) {
        Ok(classifier) => Box::new(classifier),
        Err(e) => Box::new(unavailable("Emotion classifier", e)),
    };

    Collaborators {
        detector,
        matcher,
        emotion,
        text: Box::new(TesseractExtractor::new(&config.ocr)),
        hands: hand_tracker(config),
    }
}

fn hand_tracker(config: &Config) -> Box<dyn HandTracker> {
    if !config.models.hand_path.exists() {
        tracing::info!(
            "No hand model at {}; gesture control disabled",
            config.models.hand_path.display()
        );
        return Box::new(NoHands);
    }
    match OnnxHandTracker::new(config) {
        Ok(tracker) => Box::new(tracker),
        Err(e) => {
            tracing::warn!("Hand tracking disabled: {}", e);
            Box::new(NoHands)
        }
    }
}
