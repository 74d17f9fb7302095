//! PlaybackController: the single playback slot.
//!
//! ```text
//!   Idle ──play──► Loaded ──start──► Playing ──ended──► Loaded
//!     ▲                                 │
//!     └────────── stop / failure ───────┘
//! ```
//!
//! Every `play` takes a new generation.  The sink tags its asynchronous
//! events with the generation they belong to, so a failure or end-of-file
//! from a source that was already replaced is ignored.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunedeck_proto::model::{ContentItem, PlaybackSession, PlaybackStatus};

use crate::error::PlaybackError;

/// Audio transport.  `release` must free whatever `load` acquired for the
/// same generation and must not fail.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn load(&self, url: &str, generation: u64) -> Result<(), PlaybackError>;
    async fn start(&self, generation: u64) -> Result<(), PlaybackError>;
    async fn release(&self, generation: u64);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEventKind {
    Failed(String),
    Ended,
}

/// Asynchronous report from the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub generation: u64,
    pub kind: SinkEventKind,
}

/// Builds stream URLs: `{base}/stream/{track|podcast}/{id}`.
#[derive(Debug, Clone)]
pub struct StreamLocator {
    base_url: String,
}

impl StreamLocator {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, item: &ContentItem) -> String {
        format!("{}/stream/{}/{}", self.base_url, item.kind.as_str(), item.id)
    }
}

pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    locator: StreamLocator,
    stream_without_file_path: bool,
    session: Option<PlaybackSession>,
    status: PlaybackStatus,
    generation: u64,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>, locator: StreamLocator) -> Self {
        Self {
            sink,
            locator,
            stream_without_file_path: false,
            session: None,
            status: PlaybackStatus::Idle,
            generation: 0,
        }
    }

    /// Allow playing items that carry no file path.
    pub fn stream_without_file_path(mut self, allow: bool) -> Self {
        self.stream_without_file_path = allow;
        self
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playable(&self, item: &ContentItem) -> bool {
        self.stream_without_file_path || item.file_path.is_some()
    }

    /// Replace the current session with one for `item`.  `Ok(None)` when the
    /// item is not playable.
    pub async fn play(
        &mut self,
        item: &ContentItem,
    ) -> Result<Option<PlaybackSession>, PlaybackError> {
        if !self.is_playable(item) {
            debug!("playback: item {} has no file path, ignoring play", item.id);
            return Ok(None);
        }

        self.release_current().await;

        self.generation += 1;
        let generation = self.generation;
        let url = self.locator.url_for(item);
        info!("playback: #{} load {} ({})", generation, item.title, url);

        if let Err(e) = self.sink.load(&url, generation).await {
            warn!("playback: #{} load failed: {}", generation, e);
            self.sink.release(generation).await;
            return Err(e);
        }
        self.session = Some(PlaybackSession {
            item_id: item.id,
            source_url: url,
            is_playing: false,
            generation,
        });
        self.status = PlaybackStatus::Loaded;

        if let Err(e) = self.sink.start(generation).await {
            warn!("playback: #{} start failed: {}", generation, e);
            self.release_current().await;
            return Err(e);
        }
        if let Some(session) = self.session.as_mut() {
            session.is_playing = true;
        }
        self.status = PlaybackStatus::Playing;
        Ok(self.session.clone())
    }

    pub async fn stop(&mut self) {
        if self.session.is_some() {
            info!("playback: stop");
        }
        self.release_current().await;
    }

    /// Apply an asynchronous sink report.  Returns the error to surface, if any.
    pub async fn on_sink_event(&mut self, event: SinkEvent) -> Option<PlaybackError> {
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(event.generation) {
            debug!(
                "playback: ignoring {:?} for #{} (current {:?})",
                event.kind, event.generation, current
            );
            return None;
        }

        match event.kind {
            SinkEventKind::Failed(reason) => {
                warn!("playback: #{} transport failed: {}", event.generation, reason);
                self.release_current().await;
                Some(PlaybackError::Unreachable(reason))
            }
            SinkEventKind::Ended => {
                debug!("playback: #{} ended", event.generation);
                if let Some(session) = self.session.as_mut() {
                    session.is_playing = false;
                }
                self.status = PlaybackStatus::Loaded;
                None
            }
        }
    }

    async fn release_current(&mut self) {
        if let Some(session) = self.session.take() {
            self.sink.release(session.generation).await;
        }
        self.status = PlaybackStatus::Idle;
    }
}
