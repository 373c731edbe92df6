use crate::common::config::AnnouncerConfig;
use crate::common::{KioskError, Result};
use crate::core::capabilities::Announcer;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

/// Something that can actually voice a message. Runs on the announcer thread.
pub trait SpeechBackend: Send + 'static {
    fn speak(&mut self, text: &str) -> Result<()>;
}

/// Speaks through an external TTS program, passing the text as the last argument.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
}

impl CommandSpeech {
    pub fn new(config: &AnnouncerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

impl SpeechBackend for CommandSpeech {
    fn speak(&mut self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| KioskError::Device(format!("Failed to run {}: {}", self.program, e)))?;
        if !status.success() {
            return Err(KioskError::Device(format!("{} exited with {}", self.program, status)));
        }
        Ok(())
    }
}

/// Writes announcements to the log only.
pub struct LogSpeech;

impl SpeechBackend for LogSpeech {
    fn speak(&mut self, text: &str) -> Result<()> {
        tracing::info!("🔊 {}", text);
        Ok(())
    }
}

/// Non-blocking announcer backed by a bounded queue and one worker thread.
///
/// When the queue is full the newest message is dropped.
pub struct QueuedAnnouncer {
    sender: Option<SyncSender<String>>,
    worker: Option<JoinHandle<()>>,
    dropped: AtomicUsize,
}

impl QueuedAnnouncer {
    pub fn new<B: SpeechBackend>(backend: B, capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<String>(capacity.max(1));
        let worker = thread::Builder::new()
            .name("announcer".into())
            .spawn(move || run_worker(backend, receiver))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Announcer for the configured TTS program, or log-only when speech is disabled.
    pub fn from_config(config: &AnnouncerConfig) -> Result<Self> {
        if config.enabled {
            Self::new(CommandSpeech::new(config), config.queue_capacity)
        } else {
            Self::new(LogSpeech, config.queue_capacity)
        }
    }

    /// Messages refused because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Speak everything already queued, then stop the worker.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Announcer thread panicked");
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::info!("Announcer stopped; {} messages were dropped", dropped);
        }
    }
}

impl Announcer for QueuedAnnouncer {
    fn say(&self, text: &str) {
        let Some(sender) = &self.sender else {
            tracing::debug!("Announcer stopped, ignoring: {}", text);
            return;
        };
        match sender.try_send(text.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Announcement queue full, dropping: {}", msg);
            }
            Err(TrySendError::Disconnected(msg)) => {
                tracing::warn!("Announcer thread gone, dropping: {}", msg);
            }
        }
    }
}

impl Drop for QueuedAnnouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<B: SpeechBackend>(mut backend: B, receiver: Receiver<String>) {
    for text in receiver {
        if let Err(e) = backend.speak(&text) {
            tracing::warn!("Text-to-speech error: {}", e);
        }
    }
    tracing::debug!("Announcer worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechBackend for Recording {
        fn speak(&mut self, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Reports each message as started, then blocks until the gate closes.
    struct Gated {
        inner: Recording,
        started: mpsc::Sender<()>,
        gate: Receiver<()>,
    }

    impl SpeechBackend for Gated {
        fn speak(&mut self, text: &str) -> Result<()> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            self.inner.speak(text)
        }
    }

    struct Failing;

    impl SpeechBackend for Failing {
        fn speak(&mut self, _text: &str) -> Result<()> {
            Err(KioskError::Device("no audio".into()))
        }
    }

    #[test]
    fn shutdown_drains_queue_in_order() {
        let backend = Recording::default();
        let mut announcer = QueuedAnnouncer::new(backend.clone(), 8).unwrap();
        announcer.say("one");
        announcer.say("two");
        announcer.shutdown();
        assert_eq!(*backend.spoken.lock().unwrap(), vec!["one", "two"]);

        announcer.say("after shutdown");
        assert_eq!(backend.spoken.lock().unwrap().len(), 2);
    }

    #[test]
    fn full_queue_drops_newest() {
        let recording = Recording::default();
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let backend = Gated { inner: recording.clone(), started: started_tx, gate: gate_rx };
        let mut announcer = QueuedAnnouncer::new(backend, 1).unwrap();

        announcer.say("a");
        started_rx.recv().unwrap();
        announcer.say("b");
        announcer.say("c");
        assert_eq!(announcer.dropped(), 1);

        drop(gate_tx);
        announcer.shutdown();
        assert_eq!(*recording.spoken.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn backend_failures_are_swallowed() {
        let mut announcer = QueuedAnnouncer::new(Failing, 2).unwrap();
        announcer.say("nobody hears this");
        announcer.shutdown();
        assert_eq!(announcer.dropped(), 0);
    }
}
