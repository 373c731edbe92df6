pub mod capabilities;
pub mod gesture;
pub mod identity;
pub mod orchestrator;
pub mod session;

pub use gesture::{GestureMapper, GestureSignal};
pub use identity::{parse_card, resolve, CardFields, Identity, IdentitySource, UNKNOWN_ID};
pub use orchestrator::{
    CaptureOutcome, Collaborators, FrameOrchestrator, FrameReport, FrameTime, OrchestratorOptions,
};
pub use session::{AbsencePolicy, AuthSession, SessionSnapshot, SessionTransition};
