//! Authenticated session: the identity, the bearer credential, and the epoch
//! that ties in-flight work to the session that started it.
//!
//! Every login or logout bumps the epoch and cancels the previous session's
//! [`CancellationToken`].  Work is issued with a [`SessionTicket`] taken at
//! the moment the command is handled; the ticket's epoch is checked before
//! the request goes out and again before its result touches shared state, so
//! nothing issued before a logout can surface after it.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tunedeck_proto::model::Identity;
use tunedeck_proto::state::{PersistentSession, SessionFile};

use crate::backend::Backend;
use crate::error::AuthError;

struct SessionSlot {
    epoch: u64,
    token: Option<String>,
    identity: Option<Identity>,
    cancel: CancellationToken,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            epoch: 0,
            token: None,
            identity: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Shared credential attachment point.  Outbound calls carry a
/// [`SessionTicket`] taken from it.
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<SessionSlot>>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.read();
        f.debug_struct("SessionContext")
            .field("epoch", &slot.epoch)
            .field("identity", &slot.identity)
            .field("has_token", &slot.token.is_some())
            .finish()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The credential as of right now.
    pub fn bearer(&self) -> Option<String> {
        self.inner.read().token.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.read().identity.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.inner.read().epoch == epoch
    }

    /// Token cancelled when the current session ends.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.read().cancel.clone()
    }

    /// Snapshot of the current session, taken in one read.
    pub fn ticket(&self) -> SessionTicket {
        let slot = self.inner.read();
        SessionTicket {
            epoch: slot.epoch,
            token: slot.token.clone(),
            identity: slot.identity.clone(),
            cancel: slot.cancel.clone(),
        }
    }

    /// Install a credential unconditionally.  Returns the new epoch.
    pub(crate) fn attach(&self, token: String, identity: Identity) -> u64 {
        let mut slot = self.inner.write();
        Self::rotate(&mut slot);
        slot.token = Some(token);
        slot.identity = Some(identity);
        slot.epoch
    }

    /// Install a credential only if nothing changed since `expected_epoch`.
    pub(crate) fn attach_if_current(
        &self,
        expected_epoch: u64,
        token: String,
        identity: Identity,
    ) -> Option<u64> {
        let mut slot = self.inner.write();
        if slot.epoch != expected_epoch {
            return None;
        }
        Self::rotate(&mut slot);
        slot.token = Some(token);
        slot.identity = Some(identity);
        Some(slot.epoch)
    }

    /// Drop the credential.  Returns the new epoch.
    pub(crate) fn clear(&self) -> u64 {
        let mut slot = self.inner.write();
        Self::rotate(&mut slot);
        slot.token = None;
        slot.identity = None;
        slot.epoch
    }

    fn rotate(slot: &mut SessionSlot) {
        slot.cancel.cancel();
        slot.cancel = CancellationToken::new();
        slot.epoch += 1;
    }
}

/// The session a piece of work was issued under.
///
/// Taken by the issuer before the work is spawned.  Requests carry this
/// ticket's credential; once the session moves on, the ticket is stale and
/// its cancellation token has fired.
#[derive(Clone)]
pub struct SessionTicket {
    epoch: u64,
    token: Option<String>,
    identity: Option<Identity>,
    cancel: CancellationToken,
}

impl fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTicket")
            .field("epoch", &self.epoch)
            .field("identity", &self.identity)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl SessionTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Login/logout front for the [`SessionContext`].
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn Backend>,
    context: SessionContext,
    file: Option<SessionFile>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn Backend>, context: SessionContext) -> Self {
        Self {
            backend,
            context,
            file: None,
        }
    }

    /// Persist the credential to `file` on login and remove it on logout.
    pub fn with_persistence(mut self, file: SessionFile) -> Self {
        self.file = Some(file);
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.context.identity()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        self.login_from(&self.context.ticket(), username, password)
            .await
    }

    /// Log in, replacing the session `ticket` was taken from.  If the
    /// session has changed since, the result is `Superseded`.
    pub async fn login_from(
        &self,
        ticket: &SessionTicket,
        username: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let epoch = ticket.epoch();
        info!("session: login as '{}'", username);

        let resp = match self.backend.login(username, password).await {
            Ok(r) => r,
            Err(e) => {
                warn!("session: login failed: {}", e);
                return Err(e.into());
            }
        };

        let identity = Identity {
            id: resp.user_id,
            username: resp.username.unwrap_or_else(|| username.to_string()),
            is_admin: resp.is_admin,
        };

        if self
            .context
            .attach_if_current(epoch, resp.token.clone(), identity.clone())
            .is_none()
        {
            warn!("session: login for '{}' superseded while in flight", username);
            return Err(AuthError::Superseded);
        }

        info!(
            "session: logged in as '{}' (id={}, admin={})",
            identity.username, identity.id, identity.is_admin
        );
        self.persist(resp.token, &identity);
        Ok(identity)
    }

    /// Create an account.  Does not log in; the session is left untouched.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AuthError::Rejected(
                "username, email and password are required".to_string(),
            ));
        }
        info!("session: registering '{}'", username);

        if let Err(e) = self.backend.register(username, email, password).await {
            warn!("session: registration of '{}' failed: {}", username, e);
            return Err(e.into());
        }
        info!("session: account '{}' created", username);
        Ok(())
    }

    pub fn logout(&self) {
        let had_identity = self.context.identity().is_some();
        let epoch = self.context.clear();
        info!("session: logout (had_identity={}, epoch={})", had_identity, epoch);
        if let Some(file) = &self.file {
            if let Err(e) = file.clear() {
                warn!("session: failed to remove {}: {}", file.path().display(), e);
            }
        }
    }

    /// Re-attach a credential stored by a previous run.
    pub fn restore(&self) -> Option<Identity> {
        let stored = self.file.as_ref()?.load()?;
        info!(
            "session: restored credential for '{}'",
            stored.identity.username
        );
        self.context.attach(stored.token, stored.identity.clone());
        Some(stored.identity)
    }

    fn persist(&self, token: String, identity: &Identity) {
        let Some(file) = &self.file else {
            return;
        };
        let stored = PersistentSession {
            token,
            identity: identity.clone(),
        };
        if let Err(e) = file.save(&stored) {
            warn!("session: failed to persist credential: {}", e);
        }
    }
}
