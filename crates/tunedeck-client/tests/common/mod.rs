#![allow(dead_code)]

//! In-process media backend for integration tests.

use async_trait::async_trait;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tunedeck_client::error::PlaybackError;
use tunedeck_client::playback::AudioSink;
use tunedeck_proto::model::ContentKind;
use tunedeck_proto::wire::{FavoriteToggleRequest, LoginRequest, NewTrack, RegisterRequest, WireItem};

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    /// `t` query parameter of every list request.
    pub cache_tokens: Vec<String>,
    pub cache_control: Vec<Option<String>>,
    /// Authorization header of every authenticated request.
    pub bearers: Vec<Option<String>>,
    /// (file name, size) of every upload.
    pub uploads: Vec<(String, usize)>,
    pub created: Vec<NewTrack>,
}

struct Account {
    id: i64,
    username: String,
    email: String,
    password: String,
    is_admin: bool,
}

impl Account {
    fn new(id: i64, username: &str, password: &str, is_admin: bool) -> Self {
        Self {
            id,
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: password.to_string(),
            is_admin,
        }
    }
}

struct Inner {
    accounts: Vec<Account>,
    tracks: Vec<WireItem>,
    /// Created rows and the number of `/tracks` responses that still miss them.
    pending: Vec<(WireItem, usize)>,
    favorites: HashMap<i64, Vec<i64>>,
    next_id: i64,
    lag: usize,
    recorded: Recorded,
}

#[derive(Clone)]
pub struct FakeBackend {
    pub base_url: String,
    inner: Arc<Mutex<Inner>>,
}

fn row(id: i64, title: &str, creator: &str, category: &str, kind: ContentKind) -> WireItem {
    let (artist, host) = match kind {
        ContentKind::Track => (Some(creator.to_string()), None),
        ContentKind::Podcast => (None, Some(creator.to_string())),
    };
    WireItem {
        id,
        title: title.to_string(),
        artist,
        host,
        category: Some(category.to_string()),
        file_path: Some(format!("{}s/{}.mp3", kind.as_str(), id)),
        kind: None,
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// `Ok(user_id)` for a known bearer token.
fn authorize(inner: &mut Inner, headers: &HeaderMap) -> Result<i64, Response> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    inner.recorded.bearers.push(auth.clone());
    let username = auth.as_deref().and_then(|a| a.strip_prefix("Bearer fake-"));
    inner
        .accounts
        .iter()
        .find(|a| Some(a.username.as_str()) == username)
        .map(|a| a.id)
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Missing or invalid token"))
}

impl FakeBackend {
    /// Starts on an ephemeral port.  Same users and rows as the demo data:
    /// `admin/admin123` (id 1), `alice/alice` (id 2), eight rows, item 8
    /// without a file, user 1 favorites `[2, 7]`.
    pub async fn start() -> Self {
        let mut tracks = vec![
            row(1, "Blue Monday", "New Order", "Synth", ContentKind::Track),
            row(2, "Teardrop", "Massive Attack", "Trip-Hop", ContentKind::Track),
            row(3, "Windowlicker", "Aphex Twin", "Electronic", ContentKind::Track),
            row(4, "Archangel", "Burial", "Dubstep", ContentKind::Track),
            row(5, "Hyperballad", "Bjork", "Pop", ContentKind::Track),
            row(6, "Late Night Radio", "DJ Kilo", "Talk", ContentKind::Podcast),
            row(7, "Strobe", "deadmau5", "House", ContentKind::Track),
            row(8, "Morning Talk", "Ann Host", "Talk", ContentKind::Podcast),
        ];
        tracks[7].file_path = None;

        let inner = Arc::new(Mutex::new(Inner {
            accounts: vec![
                Account::new(1, "admin", "admin123", true),
                Account::new(2, "alice", "alice", false),
            ],
            tracks,
            pending: Vec::new(),
            favorites: HashMap::from([(1, vec![2, 7]), (2, vec![5])]),
            next_id: 100,
            lag: 0,
            recorded: Recorded::default(),
        }));

        let app = Router::new()
            .route("/login", post(login))
            .route("/register", post(register))
            .route("/tracks", get(list_tracks))
            .route("/favorites/:user_id", get(list_favorites).post(toggle_favorite))
            .route("/admin/upload", post(upload))
            .route("/admin/tracks", post(create_track))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            inner,
        }
    }

    /// New rows stay out of the next `fetches` `/tracks` responses.
    pub fn set_visibility_lag(&self, fetches: usize) {
        self.inner.lock().lag = fetches;
    }

    pub fn recorded(&self) -> Recorded {
        self.inner.lock().recorded.clone()
    }

    pub fn favorites_of(&self, user_id: i64) -> Vec<i64> {
        self.inner
            .lock()
            .favorites
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Only admin logins echo the username back.
async fn login(State(inner): State<Arc<Mutex<Inner>>>, Json(req): Json<LoginRequest>) -> Response {
    let inner = inner.lock();
    let Some(account) = inner
        .accounts
        .iter()
        .find(|a| a.username == req.username && a.password == req.password)
    else {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    };
    let token = format!("fake-{}", account.username);
    if account.is_admin {
        Json(json!({
            "token": token, "user_id": account.id,
            "username": account.username, "is_admin": true
        }))
        .into_response()
    } else {
        Json(json!({ "token": token, "user_id": account.id, "is_admin": false })).into_response()
    }
}

async fn register(
    State(inner): State<Arc<Mutex<Inner>>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let mut inner = inner.lock();
    if inner.accounts.iter().any(|a| a.username == req.username) {
        return error(StatusCode::BAD_REQUEST, "Username already exists");
    }
    if inner.accounts.iter().any(|a| a.email == req.email) {
        return error(StatusCode::BAD_REQUEST, "Email already exists");
    }
    let id = inner.accounts.iter().map(|a| a.id).max().unwrap_or(0) + 1;
    inner.accounts.push(Account {
        id,
        username: req.username,
        email: req.email,
        password: req.password,
        is_admin: false,
    });
    (
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    )
        .into_response()
}

fn record_list_request(inner: &mut Inner, headers: &HeaderMap, query: &HashMap<String, String>) {
    inner
        .recorded
        .cache_tokens
        .push(query.get("t").cloned().unwrap_or_default());
    inner.recorded.cache_control.push(
        headers
            .get("cache-control")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
}

async fn list_tracks(
    State(inner): State<Arc<Mutex<Inner>>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = inner.lock();
    record_list_request(&mut inner, &headers, &query);
    if let Err(resp) = authorize(&mut inner, &headers) {
        return resp;
    }

    let mut ready = Vec::new();
    let mut waiting = Vec::new();
    for (row, remaining) in inner.pending.drain(..) {
        if remaining == 0 {
            ready.push(row);
        } else {
            waiting.push((row, remaining - 1));
        }
    }
    inner.pending = waiting;
    inner.tracks.extend(ready);
    Json(inner.tracks.clone()).into_response()
}

async fn list_favorites(
    State(inner): State<Arc<Mutex<Inner>>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = inner.lock();
    record_list_request(&mut inner, &headers, &query);
    if let Err(resp) = authorize(&mut inner, &headers) {
        return resp;
    }
    let ids = inner.favorites.get(&user_id).cloned().unwrap_or_default();
    let rows: Vec<WireItem> = inner
        .tracks
        .iter()
        .filter(|t| ids.contains(&t.id))
        .cloned()
        .collect();
    Json(rows).into_response()
}

async fn toggle_favorite(
    State(inner): State<Arc<Mutex<Inner>>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<FavoriteToggleRequest>,
) -> Response {
    let mut inner = inner.lock();
    if let Err(resp) = authorize(&mut inner, &headers) {
        return resp;
    }
    if !inner.tracks.iter().any(|t| t.id == req.track_id) {
        return error(StatusCode::NOT_FOUND, "Track not found");
    }
    let favs = inner.favorites.entry(user_id).or_default();
    if let Some(pos) = favs.iter().position(|id| *id == req.track_id) {
        favs.remove(pos);
    } else {
        favs.push(req.track_id);
    }
    Json(json!({ "message": "ok" })).into_response()
}

async fn upload(
    State(inner): State<Arc<Mutex<Inner>>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let user = authorize(&mut inner.lock(), &headers);
    match user {
        Err(resp) => return resp,
        Ok(id) if id != 1 => return error(StatusCode::FORBIDDEN, "Admin only"),
        Ok(_) => {}
    }

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.bin").to_string();
        let Ok(bytes) = field.bytes().await else {
            return error(StatusCode::BAD_REQUEST, "Unreadable upload");
        };
        inner.lock().recorded.uploads.push((name.clone(), bytes.len()));
        return Json(json!({ "file_path": format!("uploads/{}", name) })).into_response();
    }
    error(StatusCode::BAD_REQUEST, "No file part")
}

async fn create_track(
    State(inner): State<Arc<Mutex<Inner>>>,
    headers: HeaderMap,
    Json(track): Json<NewTrack>,
) -> Response {
    let mut inner = inner.lock();
    if let Err(resp) = authorize(&mut inner, &headers) {
        return resp;
    }
    if track.title.is_empty() || track.artist.is_empty() || track.file_path.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Missing required fields");
    }
    inner.recorded.created.push(track.clone());

    let id = inner.next_id;
    inner.next_id += 1;
    let row = WireItem {
        id,
        title: track.title,
        artist: Some(track.artist),
        host: None,
        category: Some(track.category),
        file_path: Some(track.file_path),
        kind: Some(ContentKind::Track),
    };
    let lag = inner.lag;
    if lag == 0 {
        inner.tracks.push(row);
    } else {
        inner.pending.push((row, lag));
    }
    (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
}

/// Sink that accepts everything and plays nothing.
#[derive(Default)]
pub struct SilentSink;

#[async_trait]
impl AudioSink for SilentSink {
    async fn load(&self, _url: &str, _generation: u64) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn start(&self, _generation: u64) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn release(&self, _generation: u64) {}
}
