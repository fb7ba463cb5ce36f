//! Session lifecycle driven by inactivity timeout and host lifecycle signals.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::{clock::Clock, model::Action};

#[derive(Debug)]
struct SessionState {
    /// `None` while no session is started (or after it was ended).
    session_id: Option<String>,
    last_active_at: DateTime<Utc>,
}

/// Produces the session id attached to data submissions.
///
/// A session expires when more than `timeout` passes between two activities. Expiry is checked
/// with strict `>`, so activity exactly at the boundary still resumes the session.
///
/// All transitions go through a single mutex, so lifecycle signals and submissions from different
/// threads never lose an update.
pub struct SessionController {
    timeout: TimeDelta,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl SessionController {
    /// Create a controller in the unstarted state. `timeout` is fixed for the controller lifetime.
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> SessionController {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let now = clock.now();
        SessionController {
            timeout,
            clock,
            state: Mutex::new(SessionState {
                session_id: None,
                last_active_at: now,
            }),
        }
    }

    /// Return the current session, starting a new one if none is active or the previous one has
    /// expired.
    ///
    /// Each call counts as activity and extends the session.
    pub fn start_or_resume(&self) -> (String, Action) {
        let now = self.clock.now();
        let mut state = self.lock();

        match &state.session_id {
            Some(session_id) if !self.is_expired(&state, now) => {
                let session_id = session_id.clone();
                state.last_active_at = now;
                log::debug!(target: "jentis", session_id = session_id.as_str(); "resuming session");
                (session_id, Action::Update)
            }
            _ => {
                let session_id = Uuid::new_v4().to_string();
                state.session_id = Some(session_id.clone());
                state.last_active_at = now;
                log::info!(target: "jentis", session_id = session_id.as_str(); "new session started");
                (session_id, Action::New)
            }
        }
    }

    /// The host process is being suspended. The session is kept, but the inactivity period starts
    /// now.
    pub fn notify_background(&self) {
        let now = self.clock.now();
        self.lock().last_active_at = now;
        log::debug!(target: "jentis", "app entered background");
    }

    /// The host process resumed. Drops the session if it expired while in background.
    pub fn notify_foreground(&self) {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.session_id.is_some() && self.is_expired(&state, now) {
            log::info!(target: "jentis", "session expired while in background");
            state.session_id = None;
        } else {
            log::debug!(target: "jentis", "app entered foreground, resuming session");
        }
    }

    /// End the current session unconditionally.
    pub fn end(&self) {
        if let Some(session_id) = self.lock().session_id.take() {
            log::info!(target: "jentis", session_id = session_id.as_str(); "session ended");
        }
    }

    /// Current session id without counting as activity.
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    fn is_expired(&self, state: &SessionState, now: DateTime<Utc>) -> bool {
        now - state.last_active_at > self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Session state stays consistent even if a holder panicked: every write is a single
        // assignment.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::TimeDelta;

    use super::SessionController;
    use crate::{clock::ManualClock, model::Action};

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn controller() -> (Arc<ManualClock>, SessionController) {
        let clock = Arc::new(ManualClock::new());
        let controller = SessionController::new(TIMEOUT, clock.clone());
        (clock, controller)
    }

    #[test]
    fn first_call_starts_session() {
        let (_clock, controller) = controller();
        assert_eq!(controller.session_id(), None);

        let (session_id, action) = controller.start_or_resume();

        assert_eq!(action, Action::New);
        assert_eq!(controller.session_id(), Some(session_id));
    }

    #[test]
    fn timeout_boundary_is_still_active() {
        let (clock, controller) = controller();
        let (first, _) = controller.start_or_resume();

        clock.advance(TimeDelta::seconds(60));
        assert_eq!(controller.start_or_resume(), (first.clone(), Action::Update));

        clock.advance(TimeDelta::seconds(60) + TimeDelta::milliseconds(1));
        let (second, action) = controller.start_or_resume();
        assert_eq!(action, Action::New);
        assert_ne!(first, second);
    }

    #[test]
    fn activity_slides_expiry() {
        let (clock, controller) = controller();
        let (first, _) = controller.start_or_resume();

        for _ in 0..5 {
            clock.advance(TimeDelta::seconds(45));
            assert_eq!(controller.start_or_resume(), (first.clone(), Action::Update));
        }
    }

    #[test]
    fn foreground_after_timeout_drops_session() {
        let (clock, controller) = controller();
        let (first, _) = controller.start_or_resume();

        controller.notify_background();
        clock.advance(TimeDelta::seconds(61));
        controller.notify_foreground();

        assert_eq!(controller.session_id(), None);
        let (second, action) = controller.start_or_resume();
        assert_eq!(action, Action::New);
        assert_ne!(first, second);
    }

    #[test]
    fn foreground_within_timeout_keeps_session() {
        let (clock, controller) = controller();
        let (first, _) = controller.start_or_resume();

        clock.advance(TimeDelta::seconds(50));
        controller.notify_background();
        clock.advance(TimeDelta::seconds(50));
        controller.notify_foreground();

        assert_eq!(controller.start_or_resume(), (first, Action::Update));
    }

    #[test]
    fn end_discards_session() {
        let (_clock, controller) = controller();
        let (first, _) = controller.start_or_resume();

        controller.end();

        assert_eq!(controller.session_id(), None);
        let (second, action) = controller.start_or_resume();
        assert_eq!(action, Action::New);
        assert_ne!(first, second);
    }
}
