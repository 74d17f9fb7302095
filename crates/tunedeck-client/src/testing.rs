//! In-memory backend and audio sink for unit tests.
//!
//! Any backend operation can be parked: the call records itself, then waits
//! until the test releases it (or answers it with a canned result).  That
//! lets tests decide the completion order of overlapping requests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{oneshot, Notify};
use tunedeck_proto::model::{ContentItem, ContentKind};
use tunedeck_proto::wire::{LoginResponse, NewTrack};

use crate::backend::{Backend, SelectedFile};
use crate::catalog::CatalogEndpoint;
use crate::error::{BackendError, PlaybackError};
use crate::playback::AudioSink;
use crate::session::SessionTicket;

pub(crate) fn item(id: i64, title: &str) -> ContentItem {
    ContentItem {
        id,
        title: title.to_string(),
        creator_name: "Various".to_string(),
        category: None,
        file_path: Some(format!("tracks/{}.mp3", id)),
        kind: ContentKind::Track,
    }
}

fn demo_item(id: i64, title: &str, creator: &str, category: &str, kind: ContentKind) -> ContentItem {
    ContentItem {
        id,
        title: title.to_string(),
        creator_name: creator.to_string(),
        category: Some(category.to_string()),
        file_path: Some(format!("{}s/{}.mp3", kind.as_str(), id)),
        kind,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Login {
        username: String,
    },
    Register {
        username: String,
        email: String,
    },
    FetchCatalog {
        endpoint: CatalogEndpoint,
        cache_token: String,
        bearer: Option<String>,
    },
    ToggleFavorite {
        user_id: i64,
        item_id: i64,
        bearer: Option<String>,
    },
    Upload {
        file_name: String,
        bearer: Option<String>,
    },
    CreateTrack {
        track: NewTrack,
        bearer: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Login,
    Register,
    Fetch,
    Toggle,
    Upload,
    Create,
}

enum Reply {
    Proceed,
    Items(Vec<ContentItem>),
    Fail(BackendError),
}

/// A backend call held until the test lets it go.
pub(crate) struct Parked {
    pub call: Call,
    tx: oneshot::Sender<Reply>,
}

impl Parked {
    /// Let the call run against the mock's current data.
    pub fn release(self) {
        let _ = self.tx.send(Reply::Proceed);
    }

    /// Answer a catalog fetch with `items`.
    pub fn respond(self, items: Vec<ContentItem>) {
        let _ = self.tx.send(Reply::Items(items));
    }

    pub fn fail(self, error: BackendError) {
        let _ = self.tx.send(Reply::Fail(error));
    }
}

struct MockUser {
    id: i64,
    username: String,
    email: String,
    password: String,
    is_admin: bool,
}

#[derive(Default)]
struct MockState {
    users: Vec<MockUser>,
    tracks: Vec<ContentItem>,
    /// Created tracks not yet visible, with the number of `/tracks` fetches
    /// that still miss them.
    pending: Vec<(ContentItem, usize)>,
    favorites: HashMap<i64, Vec<i64>>,
    next_id: i64,
    next_upload: u64,
    visibility_lag: usize,
    calls: Vec<Call>,
    parking: Vec<Op>,
    parked: HashMap<Op, Vec<Parked>>,
    failures: HashMap<Op, BackendError>,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    state: Mutex<MockState>,
    parked_changed: Notify,
}

impl MockBackend {
    /// Two users (`admin/admin123` is id 1 and admin, `alice/alice` is id 2),
    /// eight catalog entries, item 8 without a file path, and
    /// user 1's favorites `[2, 7]`.
    pub fn with_demo_data() -> Self {
        let mock = Self::default();
        {
            let mut st = mock.state.lock();
            st.users = vec![
                MockUser {
                    id: 1,
                    username: "admin".to_string(),
                    email: "admin@example.com".to_string(),
                    password: "admin123".to_string(),
                    is_admin: true,
                },
                MockUser {
                    id: 2,
                    username: "alice".to_string(),
                    email: "alice@example.com".to_string(),
                    password: "alice".to_string(),
                    is_admin: false,
                },
            ];
            let mut tracks = vec![
                demo_item(1, "Blue Monday", "New Order", "Synth", ContentKind::Track),
                demo_item(2, "Teardrop", "Massive Attack", "Trip-Hop", ContentKind::Track),
                demo_item(3, "Windowlicker", "Aphex Twin", "Electronic", ContentKind::Track),
                demo_item(4, "Archangel", "Burial", "Dubstep", ContentKind::Track),
                demo_item(5, "Hyperballad", "Bjork", "Pop", ContentKind::Track),
                demo_item(6, "Late Night Radio", "DJ Kilo", "Talk", ContentKind::Podcast),
                demo_item(7, "Strobe", "deadmau5", "House", ContentKind::Track),
                demo_item(8, "Morning Talk", "Ann Host", "Talk", ContentKind::Podcast),
            ];
            tracks[7].file_path = None;
            st.tracks = tracks;
            st.favorites.insert(1, vec![2, 7]);
            st.favorites.insert(2, vec![5]);
            st.next_id = 100;
        }
        mock
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| {
                matches!(
                    (op, c),
                    (Op::Login, Call::Login { .. })
                        | (Op::Register, Call::Register { .. })
                        | (Op::Fetch, Call::FetchCatalog { .. })
                        | (Op::Toggle, Call::ToggleFavorite { .. })
                        | (Op::Upload, Call::Upload { .. })
                        | (Op::Create, Call::CreateTrack { .. })
                )
            })
            .count()
    }

    pub fn catalog_fetches(&self) -> usize {
        self.count(Op::Fetch)
    }

    pub fn track_count(&self) -> usize {
        self.state.lock().tracks.len()
    }

    pub fn favorites_of(&self, user_id: i64) -> Vec<i64> {
        self.state
            .lock()
            .favorites
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Newly created tracks stay out of the next `fetches` `/tracks` responses.
    pub fn hide_new_tracks_for(&self, fetches: usize) {
        self.state.lock().visibility_lag = fetches;
    }

    pub fn park(&self, op: Op) {
        self.state.lock().parking.push(op);
    }

    pub fn unpark(&self, op: Op) {
        self.state.lock().parking.retain(|o| *o != op);
    }

    /// Every call of `op` fails with `error` until cleared.
    pub fn fail_with(&self, op: Op, error: BackendError) {
        self.state.lock().failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: Op) {
        self.state.lock().failures.remove(&op);
    }

    pub fn park_logins(&self) {
        self.park(Op::Login);
    }

    pub fn park_catalog_fetches(&self) {
        self.park(Op::Fetch);
    }

    pub fn fail_logins_with_network_error(&self) {
        self.fail_with(Op::Login, BackendError::Network("connection refused".to_string()));
    }

    pub fn fail_catalog_with(&self, error: BackendError) {
        self.fail_with(Op::Fetch, error);
    }

    /// Wait until at least `n` calls of `op` are parked and take them, in
    /// call order.
    pub async fn wait_parked(&self, op: Op, n: usize) -> Vec<Parked> {
        loop {
            let changed = self.parked_changed.notified();
            {
                let mut st = self.state.lock();
                let queue = st.parked.entry(op).or_default();
                if queue.len() >= n {
                    return queue.drain(..).collect();
                }
            }
            changed.await;
        }
    }

    pub async fn wait_parked_logins(&self, n: usize) -> Vec<Parked> {
        self.wait_parked(Op::Login, n).await
    }

    pub async fn wait_parked_fetches(&self, n: usize) -> Vec<Parked> {
        self.wait_parked(Op::Fetch, n).await
    }

    /// Record `call`, fail it if configured, and hold it while `op` is parked.
    async fn enter(&self, op: Op, call: Call) -> Reply {
        let rx = {
            let mut st = self.state.lock();
            st.calls.push(call.clone());
            if let Some(e) = st.failures.get(&op) {
                return Reply::Fail(e.clone());
            }
            if !st.parking.contains(&op) {
                return Reply::Proceed;
            }
            let (tx, rx) = oneshot::channel();
            st.parked.entry(op).or_default().push(Parked { call, tx });
            rx
        };
        self.parked_changed.notify_waiters();
        rx.await.unwrap_or(Reply::Proceed)
    }

    fn require_bearer(ticket: &SessionTicket) -> Result<&str, BackendError> {
        ticket
            .bearer()
            .ok_or_else(|| BackendError::Unauthorized("missing token".to_string()))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, BackendError> {
        let call = Call::Login {
            username: username.to_string(),
        };
        if let Reply::Fail(e) = self.enter(Op::Login, call).await {
            return Err(e);
        }
        let st = self.state.lock();
        st.users
            .iter()
            .find(|u| u.username == username && u.password == password)
            .map(|u| LoginResponse {
                token: format!("token-{}", u.username),
                user_id: u.id,
                username: Some(u.username.clone()),
                is_admin: u.is_admin,
            })
            .ok_or_else(|| BackendError::Unauthorized("Invalid credentials".to_string()))
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), BackendError> {
        let call = Call::Register {
            username: username.to_string(),
            email: email.to_string(),
        };
        if let Reply::Fail(e) = self.enter(Op::Register, call).await {
            return Err(e);
        }
        let mut st = self.state.lock();
        let taken = |message: &str| BackendError::Status {
            status: 400,
            message: message.to_string(),
        };
        if st.users.iter().any(|u| u.username == username) {
            return Err(taken("Username already exists"));
        }
        if st.users.iter().any(|u| u.email == email) {
            return Err(taken("Email already exists"));
        }
        let id = st.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        st.users.push(MockUser {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            is_admin: false,
        });
        Ok(())
    }

    async fn fetch_catalog(
        &self,
        ticket: &SessionTicket,
        endpoint: &CatalogEndpoint,
        cache_token: &str,
    ) -> Result<Vec<ContentItem>, BackendError> {
        let call = Call::FetchCatalog {
            endpoint: endpoint.clone(),
            cache_token: cache_token.to_string(),
            bearer: ticket.bearer().map(str::to_string),
        };
        match self.enter(Op::Fetch, call).await {
            Reply::Fail(e) => return Err(e),
            Reply::Items(items) => return Ok(items),
            Reply::Proceed => {}
        }

        let mut st = self.state.lock();
        match endpoint {
            CatalogEndpoint::AllTracks => {
                let mut visible = Vec::new();
                for (track, remaining) in st.pending.iter_mut() {
                    if *remaining == 0 {
                        visible.push(track.id);
                    } else {
                        *remaining -= 1;
                    }
                }
                let (ready, waiting): (Vec<_>, Vec<_>) = st
                    .pending
                    .drain(..)
                    .partition(|(track, _)| visible.contains(&track.id));
                st.pending = waiting;
                st.tracks.extend(ready.into_iter().map(|(track, _)| track));
                Ok(st.tracks.clone())
            }
            CatalogEndpoint::Favorites { user_id } => {
                let ids = st.favorites.get(user_id).cloned().unwrap_or_default();
                Ok(st
                    .tracks
                    .iter()
                    .filter(|t| ids.contains(&t.id))
                    .cloned()
                    .collect())
            }
        }
    }

    async fn toggle_favorite(
        &self,
        ticket: &SessionTicket,
        user_id: i64,
        item_id: i64,
    ) -> Result<(), BackendError> {
        let call = Call::ToggleFavorite {
            user_id,
            item_id,
            bearer: ticket.bearer().map(str::to_string),
        };
        if let Reply::Fail(e) = self.enter(Op::Toggle, call).await {
            return Err(e);
        }
        Self::require_bearer(ticket)?;
        let mut st = self.state.lock();
        let favs = st.favorites.entry(user_id).or_default();
        if let Some(pos) = favs.iter().position(|id| *id == item_id) {
            favs.remove(pos);
        } else {
            favs.push(item_id);
        }
        Ok(())
    }

    async fn upload_file(
        &self,
        ticket: &SessionTicket,
        file: &SelectedFile,
    ) -> Result<String, BackendError> {
        let call = Call::Upload {
            file_name: file.file_name.clone(),
            bearer: ticket.bearer().map(str::to_string),
        };
        if let Reply::Fail(e) = self.enter(Op::Upload, call).await {
            return Err(e);
        }
        Self::require_bearer(ticket)?;
        let mut st = self.state.lock();
        st.next_upload += 1;
        Ok(format!("uploads/{}-{}", st.next_upload, file.file_name))
    }

    async fn create_track(
        &self,
        ticket: &SessionTicket,
        track: &NewTrack,
    ) -> Result<i64, BackendError> {
        let call = Call::CreateTrack {
            track: track.clone(),
            bearer: ticket.bearer().map(str::to_string),
        };
        if let Reply::Fail(e) = self.enter(Op::Create, call).await {
            return Err(e);
        }
        Self::require_bearer(ticket)?;
        let mut st = self.state.lock();
        let id = st.next_id;
        st.next_id += 1;
        let item = ContentItem {
            id,
            title: track.title.clone(),
            creator_name: track.artist.clone(),
            category: Some(track.category.clone()).filter(|c| !c.is_empty()),
            file_path: Some(track.file_path.clone()),
            kind: ContentKind::Track,
        };
        let lag = st.visibility_lag;
        if lag == 0 {
            st.tracks.push(item);
        } else {
            st.pending.push((item, lag));
        }
        Ok(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkCall {
    Load { url: String, generation: u64 },
    Start { generation: u64 },
    Release { generation: u64 },
}

/// Audio sink that records what it was asked to do.
#[derive(Default)]
pub(crate) struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    /// Generation of the source currently held.
    held: Mutex<Option<u64>>,
    fail_next_load: Mutex<Option<PlaybackError>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn held(&self) -> Option<u64> {
        *self.held.lock()
    }

    pub fn fail_next_load(&self, error: PlaybackError) {
        *self.fail_next_load.lock() = Some(error);
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn load(&self, url: &str, generation: u64) -> Result<(), PlaybackError> {
        self.calls.lock().push(SinkCall::Load {
            url: url.to_string(),
            generation,
        });
        if let Some(e) = self.fail_next_load.lock().take() {
            return Err(e);
        }
        *self.held.lock() = Some(generation);
        Ok(())
    }

    async fn start(&self, generation: u64) -> Result<(), PlaybackError> {
        self.calls.lock().push(SinkCall::Start { generation });
        Ok(())
    }

    async fn release(&self, generation: u64) {
        self.calls.lock().push(SinkCall::Release { generation });
        let mut held = self.held.lock();
        if *held == Some(generation) {
            *held = None;
        }
    }
}
