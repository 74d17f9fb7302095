use std::sync::Arc;
use tracing::{debug, info, warn};
use tunedeck_proto::model::View;

use crate::backend::Backend;
use crate::catalog::{CatalogSync, RefreshOutcome};
use crate::error::{FavoriteError, SyncError};
use crate::session::{SessionContext, SessionTicket};

/// Result of a successful toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub item_id: i64,
    /// Present when the toggle was issued from the favorites view.
    pub refresh: Option<Result<RefreshOutcome, SyncError>>,
}

/// Toggles favorite membership.  Only the favorites view is refreshed
/// afterwards; other views keep showing what they showed.
#[derive(Clone)]
pub struct FavoritesManager {
    backend: Arc<dyn Backend>,
    session: SessionContext,
    catalog: CatalogSync,
}

impl FavoritesManager {
    pub fn new(backend: Arc<dyn Backend>, session: SessionContext, catalog: CatalogSync) -> Self {
        Self {
            backend,
            session,
            catalog,
        }
    }

    /// Toggle `item_id` for the user `ticket` belongs to.  `issued_on` is the
    /// view that was active when the toggle was requested; the favorites list
    /// is refreshed only when that was the favorites view.
    pub async fn toggle(
        &self,
        item_id: i64,
        ticket: &SessionTicket,
        issued_on: View,
    ) -> Result<ToggleOutcome, FavoriteError> {
        let Some(user_id) = ticket.identity().map(|who| who.id) else {
            return Err(FavoriteError::Unauthenticated);
        };
        let epoch = ticket.epoch();
        if !self.session.is_current(epoch) {
            return Err(FavoriteError::Cancelled);
        }
        debug!("favorites: toggle item {} for user {}", item_id, user_id);

        let result = tokio::select! {
            biased;
            _ = ticket.cancellation().cancelled() => return Err(FavoriteError::Cancelled),
            r = self.backend.toggle_favorite(ticket, user_id, item_id) => r,
        };
        if let Err(e) = result {
            warn!("favorites: toggle item {} failed: {}", item_id, e);
            return Err(e.into());
        }
        if !self.session.is_current(epoch) {
            return Err(FavoriteError::Cancelled);
        }
        info!("favorites: toggled item {}", item_id);

        let refresh = if issued_on == View::Favorites {
            Some(self.catalog.refresh(View::Favorites, ticket).await)
        } else {
            None
        };
        Ok(ToggleOutcome { item_id, refresh })
    }
}
