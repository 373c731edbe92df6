use crate::core::identity::Identity;
use std::time::{Duration, Instant};

pub const DEFAULT_PROMPT_INTERVAL: Duration = Duration::from_secs(5);

/// What happens to an authenticated session on frames without any face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsencePolicy {
    /// Drop authentication on the first frame with zero faces.
    Immediate,
    /// Keep authentication until no face has been seen for longer than the window.
    GraceWindow(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    /// A different identity than the previous one authenticated. Log attendance.
    NewSession(Identity),
    /// The previous identity came back after a miss. No attendance write.
    Resumed(Identity),
    /// Authentication was dropped.
    Lost,
    Unchanged,
}

/// Read-only view of the session taken once per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub identity: Option<Identity>,
}

impl SessionSnapshot {
    pub fn unauthenticated() -> Self {
        Self { authenticated: false, identity: None }
    }
}

#[derive(Debug)]
pub struct AuthSession {
    authenticated: bool,
    current_identity: Option<Identity>,
    last_prompt: Option<Instant>,
    last_seen: Option<Instant>,
    policy: AbsencePolicy,
    prompt_interval: Duration,
}

impl AuthSession {
    pub fn new(policy: AbsencePolicy, prompt_interval: Duration) -> Self {
        Self {
            authenticated: false,
            current_identity: None,
            last_prompt: None,
            last_seen: None,
            policy,
            prompt_interval,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The identity of the current session, or of the last one if it was dropped.
    pub fn current_identity(&self) -> Option<&Identity> {
        self.current_identity.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            authenticated: self.authenticated,
            identity: if self.authenticated { self.current_identity.clone() } else { None },
        }
    }

    /// Feed the resolver's verdict for one detected face.
    pub fn observe(&mut self, resolved: Option<Identity>, now: Instant) -> SessionTransition {
        self.last_seen = Some(now);

        let Some(identity) = resolved else {
            return self.drop_authentication("no match");
        };

        if self.current_identity.as_ref() == Some(&identity) {
            if self.authenticated {
                return SessionTransition::Unchanged;
            }
            tracing::info!("Session resumed for {}", identity);
            self.authenticated = true;
            return SessionTransition::Resumed(identity);
        }

        tracing::info!("New session for {}", identity);
        self.authenticated = true;
        self.current_identity = Some(identity.clone());
        SessionTransition::NewSession(identity)
    }

    /// Apply the absence policy for a frame in which no face was detected.
    pub fn observe_absence(&mut self, now: Instant) -> SessionTransition {
        if !self.authenticated {
            return SessionTransition::Unchanged;
        }

        match self.policy {
            AbsencePolicy::Immediate => self.drop_authentication("face left the frame"),
            AbsencePolicy::GraceWindow(window) => {
                let expired = self
                    .last_seen
                    .map_or(true, |seen| now.saturating_duration_since(seen) > window);
                if expired {
                    self.drop_authentication("face absent beyond grace window")
                } else {
                    SessionTransition::Unchanged
                }
            }
        }
    }

    /// Drop authentication after a collaborator failure.
    pub fn force_unauthenticated(&mut self, reason: &str) -> SessionTransition {
        self.drop_authentication(reason)
    }

    /// Drop authentication and forget the identity, so that the next match
    /// starts a new session instead of resuming this one.
    pub fn abort_session(&mut self, reason: &str) -> SessionTransition {
        let transition = self.drop_authentication(reason);
        self.current_identity = None;
        transition
    }

    /// Whether the "please authenticate" prompt should be emitted now.
    ///
    /// Fires only while unauthenticated and at most once per prompt interval.
    pub fn poll_prompt(&mut self, now: Instant) -> bool {
        if self.authenticated {
            return false;
        }
        let due = self
            .last_prompt
            .map_or(true, |last| now.saturating_duration_since(last) > self.prompt_interval);
        if due {
            self.last_prompt = Some(now);
        }
        due
    }

    fn drop_authentication(&mut self, reason: &str) -> SessionTransition {
        if !self.authenticated {
            return SessionTransition::Unchanged;
        }
        tracing::info!("Authentication dropped: {}", reason);
        self.authenticated = false;
        SessionTransition::Lost
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new(AbsencePolicy::Immediate, DEFAULT_PROMPT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::{IdentitySource, UNKNOWN_ID};

    fn person(name: &str) -> Identity {
        Identity::new(name, UNKNOWN_ID, IdentitySource::FaceMatch)
    }

    fn new_sessions(session: &mut AuthSession, stream: &[Option<&str>]) -> usize {
        let t0 = Instant::now();
        stream
            .iter()
            .enumerate()
            .map(|(i, name)| {
                session.observe(name.map(person), t0 + Duration::from_millis(33 * i as u64))
            })
            .filter(|t| matches!(t, SessionTransition::NewSession(_)))
            .count()
    }

    #[test]
    fn new_sessions_follow_run_length_of_identities() {
        let mut session = AuthSession::default();
        let stream = [Some("a"), Some("a"), Some("b"), Some("b"), Some("a"), Some("c"), Some("c")];
        assert_eq!(new_sessions(&mut session, &stream), 4);
        assert_eq!(session.current_identity(), Some(&person("c")));
    }

    #[test]
    fn returning_after_no_match_resumes_without_new_session() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();

        assert!(matches!(session.observe(Some(person("a")), t0), SessionTransition::NewSession(_)));
        assert_eq!(session.observe(None, t0), SessionTransition::Lost);
        assert!(!session.is_authenticated());
        assert_eq!(session.snapshot(), SessionSnapshot::unauthenticated());

        assert_eq!(
            session.observe(Some(person("a")), t0),
            SessionTransition::Resumed(person("a"))
        );
        assert!(session.is_authenticated());
        assert_eq!(new_sessions(&mut session, &[Some("a"), None, Some("a")]), 0);
    }

    #[test]
    fn immediate_policy_drops_on_first_empty_frame() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();
        session.observe(Some(person("a")), t0);
        assert_eq!(session.observe_absence(t0 + Duration::from_millis(33)), SessionTransition::Lost);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn grace_window_tolerates_short_misses() {
        let window = Duration::from_millis(500);
        let mut session = AuthSession::new(AbsencePolicy::GraceWindow(window), DEFAULT_PROMPT_INTERVAL);
        let t0 = Instant::now();
        session.observe(Some(person("a")), t0);

        assert_eq!(session.observe_absence(t0 + Duration::from_millis(400)), SessionTransition::Unchanged);
        assert!(session.is_authenticated());
        assert_eq!(session.observe_absence(t0 + Duration::from_millis(501)), SessionTransition::Lost);
    }

    #[test]
    fn prompt_is_debounced() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();

        let prompts = (0..300)
            .filter(|i| session.poll_prompt(t0 + Duration::from_millis(33 * i)))
            .count();
        // 0..~9.9s at 30fps: one at t=0 and one just after 5s
        assert_eq!(prompts, 2);
    }

    #[test]
    fn prompt_never_fires_twice_within_interval() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();
        let mut fired = Vec::new();
        for ms in (0..20_000u64).step_by(7) {
            let t = t0 + Duration::from_millis(ms);
            if session.poll_prompt(t) {
                fired.push(ms);
            }
        }
        assert!(fired.windows(2).all(|w| w[1] - w[0] > 5000));
    }

    #[test]
    fn no_prompt_while_authenticated() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();
        session.observe(Some(person("a")), t0);
        assert!(!session.poll_prompt(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn forced_failure_keeps_identity_for_dedup() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();
        session.observe(Some(person("a")), t0);
        assert_eq!(session.force_unauthenticated("matcher crashed"), SessionTransition::Lost);
        assert_eq!(session.current_identity(), Some(&person("a")));
        assert_eq!(session.force_unauthenticated("again"), SessionTransition::Unchanged);
    }

    #[test]
    fn aborted_session_starts_over() {
        let mut session = AuthSession::default();
        let t0 = Instant::now();
        session.observe(Some(person("a")), t0);
        assert_eq!(session.abort_session("classifier failed"), SessionTransition::Lost);
        assert_eq!(session.current_identity(), None);
        assert_eq!(
            session.observe(Some(person("a")), t0),
            SessionTransition::NewSession(person("a"))
        );
    }
}
