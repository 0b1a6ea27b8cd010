//! Current actor session.
//!
//! Identity and role come from the authentication provider and are trusted
//! as given. The session's ID token signs backend requests and is zeroized
//! when replaced or signed out.

use std::fmt;
use std::sync::Mutex;

use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::events::{EventBus, PosEvent};
use crate::models::ActorRole;
use crate::storage;

/// Identity of the authenticated actor, without credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub uid: String,
    pub display_name: String,
    pub role: ActorRole,
}

#[derive(Clone)]
pub struct Actor {
    pub identity: ActorIdentity,
    pub id_token: Zeroizing<String>,
}

impl Actor {
    pub fn new(uid: &str, display_name: &str, role: ActorRole, id_token: &str) -> Self {
        Self {
            identity: ActorIdentity {
                uid: uid.to_string(),
                display_name: display_name.to_string(),
                role,
            },
            id_token: Zeroizing::new(id_token.to_string()),
        }
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("identity", &self.identity)
            .field("id_token", &"<redacted>")
            .finish()
    }
}

pub struct AuthState {
    session: Mutex<Option<Actor>>,
    events: EventBus,
}

impl AuthState {
    pub fn new(events: EventBus) -> Self {
        Self {
            session: Mutex::new(None),
            events,
        }
    }

    pub fn sign_in(&self, actor: Actor) {
        let identity = actor.identity.clone();
        match self.session.lock() {
            Ok(mut guard) => *guard = Some(actor),
            Err(e) => {
                warn!("auth session lock poisoned: {e}");
                return;
            }
        }
        info!(uid = %identity.uid, role = identity.role.as_str(), "Actor signed in");
        self.events.emit(PosEvent::ActorSignedIn {
            uid: identity.uid,
            role: identity.role,
        });
    }

    pub fn sign_out(&self) {
        let previous = match self.session.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                warn!("auth session lock poisoned: {e}");
                return;
            }
        };
        if let Some(actor) = previous {
            info!(uid = %actor.identity.uid, "Actor signed out");
            self.events.emit(PosEvent::ActorSignedOut);
        }
    }

    /// Replace the ID token of the current session after a provider refresh.
    pub fn refresh_token(&self, id_token: &str) -> bool {
        match self.session.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(actor) => {
                    actor.id_token = Zeroizing::new(id_token.to_string());
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn current(&self) -> Option<ActorIdentity> {
        self.session
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|a| a.identity.clone()))
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    pub fn id_token(&self) -> Option<Zeroizing<String>> {
        self.session
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|a| a.id_token.clone()))
    }

    /// Persist the current session to the OS credential store.
    pub fn remember_session(&self) -> Result<(), String> {
        let actor = self
            .session
            .lock()
            .map_err(|e| e.to_string())?
            .clone()
            .ok_or("No active session")?;
        storage::save_session(&actor)
    }

    /// Sign out and drop the remembered session from the credential store.
    pub fn forget_session(&self) -> Result<(), String> {
        self.sign_out();
        storage::clear_session()
    }

    /// Restore a session saved with [`AuthState::remember_session`].
    pub fn restore_session(&self) -> bool {
        match storage::load_session() {
            Some(actor) => {
                self.sign_in(actor);
                true
            }
            None => false,
        }
    }
}
