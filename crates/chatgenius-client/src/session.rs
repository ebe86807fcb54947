use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatgenius_backend::{Backend, BackendError};
use chatgenius_types::events::{AuthHandler, SubscriptionHandle};
use chatgenius_types::models::{Session, User};

/// Which top-level view to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Login,
    Chat,
}

/// Holds the current session and the single auth-state subscription that
/// keeps it up to date.
#[derive(Debug, Default)]
pub struct SessionGate {
    session: Option<Session>,
    subscription: Option<SubscriptionHandle>,
    // set once any auth change lands; the initial lookup is older than it
    heard_change: bool,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user().map(|u| u.id)
    }

    pub fn screen(&self) -> Screen {
        match self.session {
            Some(_) => Screen::Chat,
            None => Screen::Login,
        }
    }

    /// Register the auth-state subscription. Calling it again while mounted
    /// keeps the existing subscription.
    pub fn mount(&mut self, backend: &dyn Backend, handler: AuthHandler) -> Result<(), BackendError> {
        if self.subscription.is_some() {
            debug!("Session gate already mounted");
            return Ok(());
        }
        let handle = backend.on_auth_state_change(handler)?;
        debug!("Auth subscription {} registered", handle.id());
        self.subscription = Some(handle);
        Ok(())
    }

    /// Apply the result of the initial session lookup. Ignored when an auth
    /// change has already been applied.
    pub fn apply_initial(&mut self, session: Option<Session>) {
        if self.heard_change {
            debug!("Initial session lookup superseded by an auth change");
            return;
        }
        self.set(session);
    }

    /// Apply the session carried by an auth-state change.
    pub fn apply(&mut self, session: Option<Session>) {
        self.heard_change = true;
        self.set(session);
    }

    fn set(&mut self, session: Option<Session>) {
        let session = session.filter(|s| {
            let expired = s.is_expired(Utc::now());
            if expired {
                warn!("Ignoring expired session for {}", s.user.username);
            }
            !expired
        });

        match (&self.session, &session) {
            (None, Some(next)) => info!("Session started for {}", next.user.username),
            (Some(prev), None) => info!("Session ended for {}", prev.user.username),
            (Some(prev), Some(next)) if prev.user.id != next.user.id => {
                info!("Session switched from {} to {}", prev.user.username, next.user.username)
            }
            _ => {}
        }
        self.session = session;
    }

    /// Release the auth-state subscription.
    pub fn unmount(&mut self, backend: &dyn Backend) {
        if let Some(handle) = self.subscription.take() {
            backend.unsubscribe(handle);
            debug!("Auth subscription {} released", handle.id());
        }
    }
}
