//! Admin upload flow: send the file, then register it as a catalog entry.
//!
//! ```text
//!   Empty ─select─► FileSelected ─upload─► Uploading ─ok─► Uploaded ─submit─► Submitting ─ok─► Committed
//!                        ▲                     │               ▲                  │
//!                        └─────── fail ────────┘               └────── fail ──────┘
//! ```
//!
//! A commit triggers an immediate music refresh and a second one after the
//! grace delay, for backends whose list lags behind the write.  The delayed
//! refresh belongs to the pipeline: `teardown` and logout both cancel it.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunedeck_proto::model::{UploadPhase, View};
use tunedeck_proto::protocol::UploadStatus;
use tunedeck_proto::wire::NewTrack;

use crate::backend::{Backend, SelectedFile};
use crate::catalog::{CatalogSync, RefreshOutcome, RefreshReport};
use crate::error::{SyncError, UploadError};
use crate::session::{SessionContext, SessionTicket};

/// Uncommitted form contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadDraft {
    pub selected_file: Option<SelectedFile>,
    pub uploaded_path: Option<String>,
    pub title: String,
    pub creator_name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Id of the new catalog entry.
    pub id: i64,
    /// The immediate music refresh.
    pub refresh: Result<RefreshOutcome, SyncError>,
}

#[derive(Default)]
struct UploadInner {
    phase: UploadPhase,
    draft: UploadDraft,
    last_error: Option<UploadError>,
    torn_down: bool,
    delayed: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct UploadPipeline {
    backend: Arc<dyn Backend>,
    session: SessionContext,
    catalog: CatalogSync,
    grace: Duration,
    inner: Arc<Mutex<UploadInner>>,
    teardown: CancellationToken,
    notify: Option<mpsc::Sender<RefreshReport>>,
}

impl UploadPipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: SessionContext,
        catalog: CatalogSync,
        grace: Duration,
    ) -> Self {
        Self {
            backend,
            session,
            catalog,
            grace,
            inner: Arc::new(Mutex::new(UploadInner::default())),
            teardown: CancellationToken::new(),
            notify: None,
        }
    }

    /// Report the outcome of each delayed refresh on `tx`.
    pub fn with_refresh_notifier(mut self, tx: mpsc::Sender<RefreshReport>) -> Self {
        self.notify = Some(tx);
        self
    }

    pub fn phase(&self) -> UploadPhase {
        self.inner.lock().phase
    }

    pub fn draft(&self) -> UploadDraft {
        self.inner.lock().draft.clone()
    }

    pub fn last_error(&self) -> Option<UploadError> {
        self.inner.lock().last_error.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.lock().torn_down
    }

    pub fn status(&self) -> UploadStatus {
        let inner = self.inner.lock();
        UploadStatus {
            phase: inner.phase,
            file_name: inner
                .draft
                .selected_file
                .as_ref()
                .map(|f| f.file_name.clone()),
            uploaded_path: inner.draft.uploaded_path.clone(),
            title: inner.draft.title.clone(),
            creator_name: inner.draft.creator_name.clone(),
            category: inner.draft.category.clone(),
            last_error: inner.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn check_idle(inner: &UploadInner) -> Result<(), UploadError> {
        if inner.torn_down {
            return Err(UploadError::TornDown);
        }
        if inner.phase.is_busy() {
            return Err(UploadError::Busy);
        }
        Ok(())
    }

    /// Choose the file to upload.  Forgets any earlier upload.
    pub fn select_file(&self, file: SelectedFile) -> Result<(), UploadError> {
        let mut inner = self.inner.lock();
        Self::check_idle(&inner)?;
        debug!("upload: selected {}", file.path.display());
        inner.draft.selected_file = Some(file);
        inner.draft.uploaded_path = None;
        inner.last_error = None;
        inner.phase = UploadPhase::FileSelected;
        Ok(())
    }

    pub fn set_details(
        &self,
        title: &str,
        creator_name: &str,
        category: &str,
    ) -> Result<(), UploadError> {
        let mut inner = self.inner.lock();
        Self::check_idle(&inner)?;
        inner.draft.title = title.to_string();
        inner.draft.creator_name = creator_name.to_string();
        inner.draft.category = category.to_string();
        Ok(())
    }

    /// Phase 1: send the selected file.  Returns the server-side path.
    pub async fn upload(&self) -> Result<String, UploadError> {
        let (file, ticket) = {
            let mut inner = self.inner.lock();
            Self::check_idle(&inner)?;
            let file = inner
                .draft
                .selected_file
                .clone()
                .ok_or(UploadError::NoFile)?;
            inner.phase = UploadPhase::Uploading;
            (file, self.session.ticket())
        };
        info!("upload: sending {}", file.file_name);

        let result = match self
            .guarded(&ticket, self.backend.upload_file(&ticket, &file))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.abandon(UploadPhase::FileSelected);
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        if inner.torn_down {
            return Err(UploadError::TornDown);
        }
        if !self.session.is_current(ticket.epoch()) {
            inner.phase = UploadPhase::FileSelected;
            return Err(UploadError::Cancelled);
        }
        match result {
            Ok(path) => {
                info!("upload: {} stored as {}", file.file_name, path);
                inner.draft.uploaded_path = Some(path.clone());
                inner.last_error = None;
                inner.phase = UploadPhase::Uploaded;
                Ok(path)
            }
            Err(e) => {
                warn!("upload: sending {} failed: {}", file.file_name, e);
                let err = UploadError::Transport(e.to_string());
                inner.last_error = Some(err.clone());
                inner.phase = UploadPhase::FileSelected;
                Err(err)
            }
        }
    }

    /// Phase 2: register the uploaded file as a catalog entry.
    pub async fn submit(&self) -> Result<SubmitOutcome, UploadError> {
        let (track, ticket) = {
            let mut inner = self.inner.lock();
            Self::check_idle(&inner)?;
            let file_path = match (&inner.draft.uploaded_path, inner.phase) {
                (Some(path), UploadPhase::Uploaded) => path.clone(),
                _ => return Err(UploadError::NoFile),
            };
            let draft = &inner.draft;
            if draft.title.trim().is_empty() || draft.creator_name.trim().is_empty() {
                return Err(UploadError::MissingDetails);
            }
            let track = NewTrack {
                title: draft.title.trim().to_string(),
                artist: draft.creator_name.trim().to_string(),
                category: draft.category.trim().to_string(),
                file_path,
            };
            inner.phase = UploadPhase::Submitting;
            (track, self.session.ticket())
        };
        info!("upload: registering '{}'", track.title);

        let result = match self
            .guarded(&ticket, self.backend.create_track(&ticket, &track))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.abandon(UploadPhase::Uploaded);
                return Err(e);
            }
        };

        let id = {
            let mut inner = self.inner.lock();
            if inner.torn_down {
                return Err(UploadError::TornDown);
            }
            if !self.session.is_current(ticket.epoch()) {
                inner.phase = UploadPhase::Uploaded;
                return Err(UploadError::Cancelled);
            }
            match result {
                Ok(id) => {
                    inner.draft = UploadDraft::default();
                    inner.last_error = None;
                    inner.phase = UploadPhase::Committed;
                    id
                }
                Err(e) => {
                    warn!("upload: registering '{}' failed: {}", track.title, e);
                    let err = UploadError::Registration(e.to_string());
                    inner.last_error = Some(err.clone());
                    inner.phase = UploadPhase::Uploaded;
                    return Err(err);
                }
            }
        };
        info!("upload: '{}' committed as item {}", track.title, id);

        let refresh = self.catalog.refresh(View::Music, &ticket).await;
        self.schedule_delayed_refresh(ticket);
        Ok(SubmitOutcome { id, refresh })
    }

    /// Close the form: cancel the delayed refresh and drop the draft.  Every
    /// later call fails with `TornDown`.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        if inner.torn_down {
            return;
        }
        inner.torn_down = true;
        inner.phase = UploadPhase::Empty;
        inner.draft = UploadDraft::default();
        inner.last_error = None;
        if let Some(task) = inner.delayed.take() {
            task.abort();
        }
        self.teardown.cancel();
        debug!("upload: torn down");
    }

    async fn guarded<T>(
        &self,
        ticket: &SessionTicket,
        fut: impl Future<Output = T>,
    ) -> Result<T, UploadError> {
        tokio::select! {
            biased;
            _ = self.teardown.cancelled() => Err(UploadError::TornDown),
            _ = ticket.cancellation().cancelled() => Err(UploadError::Cancelled),
            r = fut => Ok(r),
        }
    }

    /// Return to `phase` after an interrupted step, unless torn down.
    fn abandon(&self, phase: UploadPhase) {
        let mut inner = self.inner.lock();
        if !inner.torn_down {
            inner.phase = phase;
        }
    }

    fn schedule_delayed_refresh(&self, ticket: SessionTicket) {
        let mut inner = self.inner.lock();
        if inner.torn_down || !self.session.is_current(ticket.epoch()) {
            return;
        }

        let catalog = self.catalog.clone();
        let teardown = self.teardown.clone();
        let notify = self.notify.clone();
        let grace = self.grace;

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = teardown.cancelled() => {
                    debug!("upload: delayed refresh cancelled by teardown");
                    return;
                }
                _ = ticket.cancellation().cancelled() => {
                    debug!("upload: delayed refresh cancelled by session end");
                    return;
                }
            }
            debug!("upload: delayed music refresh after {:?}", grace);
            let result = catalog.refresh(View::Music, &ticket).await;
            if let Some(tx) = notify {
                let _ = tx
                    .send(RefreshReport {
                        view: View::Music,
                        result,
                    })
                    .await;
            }
        });
        if let Some(previous) = inner.delayed.replace(task) {
            previous.abort();
        }
    }
}
