/// ClientCore: single-owner event loop for all mutable client state.
///
/// Front ends send `CoreEvent::Command`s; network round-trips run as spawned
/// tasks that report back with their own `CoreEvent` variant, so every state
/// change happens on this loop.  After each change the loop broadcasts a
/// `Broadcast::State` snapshot with a bumped `rev`; failures go out as
/// `Broadcast::Error`.
///
/// Logout is handled synchronously in one turn: the credential is dropped,
/// the catalog reset, playback stopped and the admin pipeline torn down
/// before the next event is read.  Work that was in flight finds its epoch
/// stale and reports `Cancelled`/`Superseded`, which the loop ignores.
use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tunedeck_proto::config::Config;
use tunedeck_proto::model::{Identity, View};
use tunedeck_proto::protocol::{Broadcast, ClientState, Command, ErrorKind};
use tunedeck_proto::state::SessionFile;

use crate::backend::{Backend, SelectedFile};
use crate::catalog::{CatalogSync, RefreshOutcome, RefreshReport};
use crate::error::{AuthError, FavoriteError, UploadError};
use crate::favorites::{FavoritesManager, ToggleOutcome};
use crate::playback::{AudioSink, PlaybackController, SinkEvent, StreamLocator};
use crate::session::{SessionContext, SessionStore};
use crate::upload::{SubmitOutcome, UploadPipeline};

/// All inputs into the ClientCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from a front end.
    Command(Command),
    LoginDone(Result<Identity, AuthError>),
    /// Carries the username that was registered.
    RegisterDone(Result<String, AuthError>),
    Refreshed(RefreshReport),
    FavoriteDone(Result<ToggleOutcome, FavoriteError>),
    UploadDone(Result<String, UploadError>),
    SubmitDone(Result<SubmitOutcome, UploadError>),
    /// Asynchronous report from the audio sink.
    Sink(SinkEvent),
    Shutdown,
}

pub struct ClientCore {
    config: Config,
    backend: Arc<dyn Backend>,
    session: SessionStore,
    catalog: CatalogSync,
    favorites: FavoritesManager,
    playback: PlaybackController,
    /// Present while the admin view is open.
    upload: Option<UploadPipeline>,
    event_tx: mpsc::Sender<CoreEvent>,
    refresh_tx: mpsc::Sender<RefreshReport>,
    refresh_rx: Option<mpsc::Receiver<RefreshReport>>,
    broadcast_tx: broadcast::Sender<Broadcast>,
    rev: u64,
}

impl ClientCore {
    pub fn new(
        config: Config,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn AudioSink>,
        broadcast_tx: broadcast::Sender<Broadcast>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        let context = SessionContext::new();
        let mut session = SessionStore::new(backend.clone(), context.clone());
        if config.session.persist {
            session = session.with_persistence(SessionFile::new(config.session.session_file.clone()));
        }
        let catalog = CatalogSync::new(backend.clone(), context.clone());
        let favorites = FavoritesManager::new(backend.clone(), context, catalog.clone());
        let playback = PlaybackController::new(sink, StreamLocator::new(config.backend.base()))
            .stream_without_file_path(config.playback.stream_without_file_path);
        let (refresh_tx, refresh_rx) = mpsc::channel(16);

        Self {
            config,
            backend,
            session,
            catalog,
            favorites,
            playback,
            upload: None,
            event_tx,
            refresh_tx,
            refresh_rx: Some(refresh_rx),
            broadcast_tx,
            rev: 0,
        }
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("ClientCore: starting event loop");

        if let Some(mut refresh_rx) = self.refresh_rx.take() {
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(report) = refresh_rx.recv().await {
                    if tx.send(CoreEvent::Refreshed(report)).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(identity) = self.session.restore() {
            self.log(format!("restored session for {}", identity.username));
            self.spawn_refresh(self.catalog.active_view());
        }
        self.broadcast_state();

        loop {
            match event_rx.recv().await {
                None => {
                    info!("ClientCore: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("ClientCore: shutdown requested");
                    break;
                }
                Some(event) => self.handle_event(event).await,
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Command(cmd) => {
                debug!("ClientCore: command {}", command_name(&cmd));
                self.handle_command(cmd).await;
            }
            CoreEvent::LoginDone(result) => self.on_login(result),
            CoreEvent::RegisterDone(result) => self.on_register(result),
            CoreEvent::Refreshed(report) => self.on_refreshed(report),
            CoreEvent::FavoriteDone(result) => self.on_favorite(result),
            CoreEvent::UploadDone(result) => self.on_upload(result),
            CoreEvent::SubmitDone(result) => self.on_submit(result),
            CoreEvent::Sink(event) => {
                if let Some(e) = self.playback.on_sink_event(event).await {
                    self.notify_error(ErrorKind::Playback, e);
                }
                self.broadcast_state();
            }
            CoreEvent::Shutdown => {}
        }
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Login { username, password } => {
                self.log(format!("logging in as {}", username));
                let session = self.session.clone();
                let ticket = self.session.context().ticket();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = session.login_from(&ticket, &username, &password).await;
                    let _ = tx.send(CoreEvent::LoginDone(result)).await;
                });
            }
            Command::Register {
                username,
                email,
                password,
            } => {
                self.log(format!("registering {}", username));
                let session = self.session.clone();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = session
                        .register(&username, &email, &password)
                        .await
                        .map(|()| username);
                    let _ = tx.send(CoreEvent::RegisterDone(result)).await;
                });
            }
            Command::Logout => self.logout().await,
            Command::SelectView { view } => self.select_view(view),
            Command::Refresh => self.spawn_refresh(self.catalog.active_view()),
            Command::ToggleFavorite { item_id } => {
                let ticket = self.session.context().ticket();
                if ticket.identity().is_none() {
                    self.notify_error(ErrorKind::Favorite, FavoriteError::Unauthenticated);
                    return;
                }
                let issued_on = self.catalog.active_view();
                let favorites = self.favorites.clone();
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = favorites.toggle(item_id, &ticket, issued_on).await;
                    let _ = tx.send(CoreEvent::FavoriteDone(result)).await;
                });
            }
            Command::Play { item_id } => self.play(item_id).await,
            Command::Stop => {
                self.playback.stop().await;
                self.broadcast_state();
            }
            Command::SelectFile { path } => {
                let result = self
                    .pipeline()
                    .and_then(|p| p.select_file(SelectedFile::from_path(path)));
                self.after_draft_edit(result);
            }
            Command::SetDetails {
                title,
                creator_name,
                category,
            } => {
                let result = self
                    .pipeline()
                    .and_then(|p| p.set_details(&title, &creator_name, &category));
                self.after_draft_edit(result);
            }
            Command::Upload => {
                let pipeline = match self.pipeline() {
                    Ok(p) => p,
                    Err(e) => return self.notify_error(ErrorKind::Upload, e),
                };
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.upload().await;
                    let _ = tx.send(CoreEvent::UploadDone(result)).await;
                });
            }
            Command::Submit => {
                let pipeline = match self.pipeline() {
                    Ok(p) => p,
                    Err(e) => return self.notify_error(ErrorKind::Upload, e),
                };
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = pipeline.submit().await;
                    let _ = tx.send(CoreEvent::SubmitDone(result)).await;
                });
            }
            Command::GetState => self.broadcast_state(),
        }
    }

    async fn logout(&mut self) {
        self.session.logout();
        self.catalog.reset();
        self.playback.stop().await;
        if let Some(pipeline) = self.upload.take() {
            pipeline.teardown();
        }
        self.log("logged out".to_string());
        self.broadcast_state();
    }

    fn select_view(&mut self, view: View) {
        if view == View::Admin
            && !self
                .session
                .current_identity()
                .is_some_and(|i| i.is_admin)
        {
            self.notify_error(ErrorKind::Auth, "the admin view needs an admin account");
            return;
        }

        let previous = self.catalog.active_view();
        if previous == View::Admin && view != View::Admin {
            if let Some(pipeline) = self.upload.take() {
                pipeline.teardown();
            }
        }
        if view == View::Admin && self.upload.is_none() {
            self.upload = Some(
                UploadPipeline::new(
                    self.backend.clone(),
                    self.session.context().clone(),
                    self.catalog.clone(),
                    self.config.sync.grace_delay(),
                )
                .with_refresh_notifier(self.refresh_tx.clone()),
            );
        }

        self.catalog.select_view(view);
        self.broadcast_state();
        self.spawn_refresh(view);
    }

    async fn play(&mut self, item_id: i64) {
        let item = self
            .catalog
            .rendered()
            .catalog
            .and_then(|c| c.get(item_id).cloned());
        let Some(item) = item else {
            self.notify_error(
                ErrorKind::Playback,
                format!("item {} is not in the current list", item_id),
            );
            return;
        };

        match self.playback.play(&item).await {
            Ok(Some(_)) => {}
            Ok(None) => self.log(format!("'{}' has no file to play", item.title)),
            Err(e) => self.notify_error(ErrorKind::Playback, e),
        }
        self.broadcast_state();
    }

    fn pipeline(&self) -> Result<UploadPipeline, UploadError> {
        self.upload.clone().ok_or(UploadError::TornDown)
    }

    fn after_draft_edit(&mut self, result: Result<(), UploadError>) {
        if let Err(e) = result {
            self.notify_error(ErrorKind::Upload, e);
        }
        self.broadcast_state();
    }

    /// The ticket is taken here, not in the task, so a logout queued right
    /// behind this command still cancels the fetch.
    fn spawn_refresh(&self, view: View) {
        let catalog = self.catalog.clone();
        let ticket = self.session.context().ticket();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = catalog.refresh(view, &ticket).await;
            let _ = tx
                .send(CoreEvent::Refreshed(RefreshReport { view, result }))
                .await;
        });
    }

    // ── completion handlers ───────────────────────────────────────────────────

    fn on_login(&mut self, result: Result<Identity, AuthError>) {
        match result {
            Ok(identity) => {
                self.log(format!("logged in as {}", identity.username));
                self.broadcast_state();
                self.spawn_refresh(self.catalog.active_view());
            }
            Err(AuthError::Superseded) => debug!("ClientCore: stale login result dropped"),
            Err(e) => self.notify_error(ErrorKind::Auth, e),
        }
    }

    fn on_register(&mut self, result: Result<String, AuthError>) {
        match result {
            Ok(username) => self.log(format!("account {} created, log in to continue", username)),
            Err(e) => self.notify_error(ErrorKind::Auth, e),
        }
    }

    fn on_refreshed(&mut self, report: RefreshReport) {
        match report.result {
            Ok(RefreshOutcome::Applied { .. }) => self.broadcast_state(),
            Ok(outcome) => debug!("ClientCore: refresh {} → {:?}", report.view, outcome),
            Err(e) => self.notify_error(ErrorKind::Sync, e),
        }
    }

    fn on_favorite(&mut self, result: Result<ToggleOutcome, FavoriteError>) {
        match result {
            Ok(outcome) => {
                self.log(format!("favorite toggled for item {}", outcome.item_id));
                if let Some(Err(e)) = outcome.refresh {
                    self.notify_error(ErrorKind::Sync, e);
                }
                self.broadcast_state();
            }
            Err(FavoriteError::Cancelled) => debug!("ClientCore: favorite toggle dropped"),
            Err(e) => self.notify_error(ErrorKind::Favorite, e),
        }
    }

    fn on_upload(&mut self, result: Result<String, UploadError>) {
        match result {
            Ok(path) => self.log(format!("uploaded as {}", path)),
            Err(UploadError::TornDown | UploadError::Cancelled) => {
                debug!("ClientCore: upload result dropped");
                return;
            }
            Err(e) => self.notify_error(ErrorKind::Upload, e),
        }
        self.broadcast_state();
    }

    fn on_submit(&mut self, result: Result<SubmitOutcome, UploadError>) {
        match result {
            Ok(outcome) => {
                self.log(format!("registered item {}", outcome.id));
                if let Err(e) = outcome.refresh {
                    self.notify_error(ErrorKind::Sync, e);
                }
            }
            Err(UploadError::TornDown | UploadError::Cancelled) => {
                debug!("ClientCore: submit result dropped");
                return;
            }
            Err(e) => self.notify_error(ErrorKind::Upload, e),
        }
        self.broadcast_state();
    }

    // ── broadcasts ────────────────────────────────────────────────────────────

    fn snapshot(&mut self) -> ClientState {
        self.rev += 1;
        let rendered = self.catalog.rendered();
        ClientState {
            rev: self.rev,
            identity: self.session.current_identity(),
            active_view: rendered.view,
            catalog: rendered.catalog.map(|c| c.items().to_vec()),
            playback: self.playback.session().cloned(),
            playback_status: self.playback.status(),
            upload: self
                .upload
                .as_ref()
                .map(|p| p.status())
                .unwrap_or_default(),
        }
    }

    fn broadcast_state(&mut self) {
        let data = self.snapshot();
        let _ = self.broadcast_tx.send(Broadcast::State { data });
    }

    fn notify_error(&self, kind: ErrorKind, message: impl Display) {
        let message = message.to_string();
        warn!("ClientCore: {} error: {}", kind.label(), message);
        let _ = self.broadcast_tx.send(Broadcast::Error { kind, message });
    }

    fn log(&self, message: String) {
        info!("ClientCore: {}", message);
        let _ = self.broadcast_tx.send(Broadcast::Log { message });
    }

    async fn cleanup(&mut self) {
        self.playback.stop().await;
        if let Some(pipeline) = self.upload.take() {
            pipeline.teardown();
        }
        if self.broadcast_tx.receiver_count() == 0 {
            error!("ClientCore: exiting with no listeners attached");
        }
    }
}

/// Command name without its payload, so passwords never reach the log.
fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::Login { .. } => "Login",
        Command::Register { .. } => "Register",
        Command::Logout => "Logout",
        Command::SelectView { .. } => "SelectView",
        Command::Refresh => "Refresh",
        Command::ToggleFavorite { .. } => "ToggleFavorite",
        Command::Play { .. } => "Play",
        Command::Stop => "Stop",
        Command::SelectFile { .. } => "SelectFile",
        Command::SetDetails { .. } => "SetDetails",
        Command::Upload => "Upload",
        Command::Submit => "Submit",
        Command::GetState => "GetState",
    }
}

/// Feed sink reports into the core loop.
pub fn forward_sink_events(
    mut rx: mpsc::Receiver<SinkEvent>,
    tx: mpsc::Sender<CoreEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if tx.send(CoreEvent::Sink(event)).await.is_err() {
                break;
            }
        }
    })
}
