pub mod announcer;

pub use announcer::{CommandSpeech, LogSpeech, QueuedAnnouncer, SpeechBackend};
