//! CatalogSync: fetches and caches the list behind each view.
//!
//! Refreshes may overlap (manual refresh, view switch, the delayed refresh
//! after an admin submit).  Each `refresh` takes the next sequence number for
//! its view before going to the network; when the response comes back it is
//! applied only if that number is still the highest issued for the view.
//! Anything older is dropped, so completion order never decides what is shown.
//!
//! ```text
//!   refresh(music) #1 ──────────────────────────► response #1  (dropped: #2 issued)
//!   refresh(music) #2 ──────────► response #2  (applied)
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunedeck_proto::model::{Catalog, CatalogView, Identity, View};

use crate::backend::Backend;
use crate::error::SyncError;
use crate::session::{SessionContext, SessionTicket};

/// Where the list for a view comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEndpoint {
    AllTracks,
    Favorites { user_id: i64 },
}

impl CatalogEndpoint {
    /// `Ok(None)` when there is nothing to fetch: the admin view, or the
    /// music view with nobody logged in.
    pub fn for_view(view: View, identity: Option<&Identity>) -> Result<Option<Self>, SyncError> {
        match view {
            View::Music => Ok(identity.map(|_| Self::AllTracks)),
            View::Favorites => identity
                .map(|i| Some(Self::Favorites { user_id: i.id }))
                .ok_or(SyncError::Unauthenticated),
            View::Admin => Ok(None),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::AllTracks => "/tracks".to_string(),
            Self::Favorites { user_id } => format!("/favorites/{}", user_id),
        }
    }
}

/// What happened to one `refresh` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The response replaced the catalog of the view.
    Applied { seq: u64, items: usize },
    /// A later refresh for the same view was issued; this response was dropped.
    Superseded { seq: u64, latest: u64 },
    /// Nothing to fetch for the view.
    Skipped,
    /// The session the refresh was issued under has ended.
    Cancelled,
}

/// A refresh that ran in the background, reported back to the owner loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub view: View,
    pub result: Result<RefreshOutcome, SyncError>,
}

#[derive(Debug, Default)]
struct ViewSlot {
    /// Highest sequence number handed out.
    issued: u64,
    /// Sequence number of the catalog currently held.
    applied: u64,
    catalog: Option<Catalog>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    active: View,
    slots: HashMap<View, ViewSlot>,
}

#[derive(Clone)]
pub struct CatalogSync {
    backend: Arc<dyn Backend>,
    session: SessionContext,
    inner: Arc<Mutex<CatalogInner>>,
    cache_counter: Arc<AtomicU64>,
}

impl CatalogSync {
    pub fn new(backend: Arc<dyn Backend>, session: SessionContext) -> Self {
        Self {
            backend,
            session,
            inner: Arc::new(Mutex::new(CatalogInner::default())),
            cache_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn active_view(&self) -> View {
        self.inner.lock().active
    }

    pub fn select_view(&self, view: View) {
        let mut inner = self.inner.lock();
        if inner.active != view {
            debug!("catalog: active view {} → {}", inner.active, view);
            inner.active = view;
        }
    }

    /// Last applied catalog of `view`.
    pub fn catalog(&self, view: View) -> Option<Catalog> {
        self.inner
            .lock()
            .slots
            .get(&view)
            .and_then(|slot| slot.catalog.clone())
    }

    /// The active view with its catalog.
    pub fn rendered(&self) -> CatalogView {
        let inner = self.inner.lock();
        CatalogView {
            view: inner.active,
            catalog: inner
                .slots
                .get(&inner.active)
                .and_then(|slot| slot.catalog.clone()),
        }
    }

    /// Drop every cached catalog.  Sequence counters keep counting so that
    /// responses issued before the reset still lose.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.values_mut() {
            slot.catalog = None;
        }
        inner.active = View::default();
        debug!("catalog: reset");
    }

    /// Fetch `view` on behalf of the session `ticket` was taken from.  A stale
    /// ticket sends nothing.
    pub async fn refresh(
        &self,
        view: View,
        ticket: &SessionTicket,
    ) -> Result<RefreshOutcome, SyncError> {
        let Some(endpoint) = CatalogEndpoint::for_view(view, ticket.identity())? else {
            return Ok(RefreshOutcome::Skipped);
        };

        let epoch = ticket.epoch();
        if !self.session.is_current(epoch) {
            debug!("catalog: refresh {} not sent, session changed", view);
            return Ok(RefreshOutcome::Cancelled);
        }
        let seq = {
            let mut inner = self.inner.lock();
            let slot = inner.slots.entry(view).or_default();
            slot.issued += 1;
            slot.issued
        };
        let cache_token = self.next_cache_token();
        debug!(
            "catalog: refresh {} #{} → {} (t={})",
            view,
            seq,
            endpoint.path(),
            cache_token
        );

        let result = tokio::select! {
            biased;
            _ = ticket.cancellation().cancelled() => {
                debug!("catalog: refresh {} #{} cancelled by session end", view, seq);
                return Ok(RefreshOutcome::Cancelled);
            }
            r = self.backend.fetch_catalog(ticket, &endpoint, &cache_token) => r,
        };

        let mut inner = self.inner.lock();
        if !self.session.is_current(epoch) {
            debug!("catalog: refresh {} #{} dropped, session changed", view, seq);
            return Ok(RefreshOutcome::Cancelled);
        }
        let slot = inner.slots.entry(view).or_default();
        if seq < slot.issued {
            debug!(
                "catalog: refresh {} #{} superseded by #{}",
                view, seq, slot.issued
            );
            return Ok(RefreshOutcome::Superseded {
                seq,
                latest: slot.issued,
            });
        }

        match result {
            Ok(items) => {
                let catalog = Catalog::from_items(items);
                let count = catalog.len();
                slot.catalog = Some(catalog);
                slot.applied = seq;
                info!("catalog: {} #{} applied ({} items)", view, seq, count);
                Ok(RefreshOutcome::Applied { seq, items: count })
            }
            Err(e) => {
                warn!(
                    "catalog: refresh {} #{} failed, keeping #{}: {}",
                    view, seq, slot.applied, e
                );
                Err(e.into())
            }
        }
    }

    /// Unique per call: wall-clock millis plus a process-local counter.
    fn next_cache_token(&self) -> String {
        let n = self.cache_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", Utc::now().timestamp_millis(), n)
    }
}
