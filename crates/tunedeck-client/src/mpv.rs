/// mpv-backed [`AudioSink`], driven over mpv's JSON IPC.
///
/// ```text
///   MpvSink::load()  ── spawns mpv --idle on first use
///         │
///         ├── writer_task    ← MpvRequest via mpsc, serialised → socket
///         ├── reader_task    ← JSON lines from socket
///         │                      ├── response (has request_id) → matched oneshot::Sender
///         │                      └── event                     → event channel
///         └── forward_events ← end-file events → SinkEvent tagged with generation
/// ```
///
/// `loadfile` answers with the playlist entry id of the new file; the sink
/// remembers which generation owns each entry so that an `end-file` arriving
/// after the source was replaced is reported against the old generation, and
/// one for an entry already released is dropped.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use tunedeck_proto::platform;

use crate::error::PlaybackError;
use crate::playback::{AudioSink, SinkEvent, SinkEventKind};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.raw.get("playlist_entry_id")?.as_i64()
    }

    /// `end-file` with reason `eof` or `error`.  `stop`, `quit` and `redirect`
    /// are caused by our own commands and map to nothing.
    pub fn end_file_kind(&self) -> Option<SinkEventKind> {
        if self.event_name()? != "end-file" {
            return None;
        }
        match self.raw.get("reason").and_then(|r| r.as_str()) {
            Some("eof") => Some(SinkEventKind::Ended),
            Some("error") => {
                let reason = self
                    .raw
                    .get("file_error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("playback error");
                Some(SinkEventKind::Failed(reason.to_string()))
            }
            _ => None,
        }
    }
}

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    /// Start reader/writer tasks over any duplex byte stream.
    pub fn from_stream<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

        MpvHandle { tx: cmd_tx }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }
}

#[derive(Default)]
struct Connection {
    process: Option<tokio::process::Child>,
    handle: Option<MpvHandle>,
}

impl Connection {
    fn alive(&mut self) -> bool {
        let Some(handle) = &self.handle else {
            return false;
        };
        if handle.is_closed() {
            return false;
        }
        match self.process.as_mut().map(|p| p.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                warn!("mpv: process exited ({})", status);
                false
            }
            Some(Err(e)) => {
                warn!("mpv: process check failed: {}", e);
                false
            }
            None => false,
        }
    }
}

/// Which generation loaded each live playlist entry.
#[derive(Debug, Default)]
struct EntryOwners {
    owners: HashMap<i64, u64>,
    /// Highest entry id recorded since the process started.  mpv hands out
    /// increasing ids, so an unknown id at or below this one was released.
    newest: i64,
}

/// Generation an end-file for `entry` belongs to, if any.
enum EntryOwner {
    Live(u64),
    /// The `loadfile` reply is still on its way; the entry is the newest load.
    Pending,
    Released,
}

impl EntryOwners {
    fn record(&mut self, entry: i64, generation: u64) {
        self.owners.insert(entry, generation);
        self.newest = self.newest.max(entry);
    }

    fn release(&mut self, generation: u64) {
        self.owners.retain(|_, g| *g != generation);
    }

    fn take(&mut self, entry: i64) -> EntryOwner {
        match self.owners.remove(&entry) {
            Some(generation) => EntryOwner::Live(generation),
            None if entry > self.newest => EntryOwner::Pending,
            None => EntryOwner::Released,
        }
    }
}

pub struct MpvSink {
    socket_name: String,
    volume: f32,
    conn: Mutex<Connection>,
    entries: Arc<parking_lot::Mutex<EntryOwners>>,
    current: Arc<AtomicU64>,
    events: mpsc::Sender<SinkEvent>,
}

impl MpvSink {
    /// `events` receives end-of-file and failure reports.
    pub fn new(volume: f32, events: mpsc::Sender<SinkEvent>) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            volume,
            conn: Mutex::new(Connection::default()),
            entries: Arc::new(parking_lot::Mutex::new(EntryOwners::default())),
            current: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    async fn handle(&self) -> Result<MpvHandle, PlaybackError> {
        let mut conn = self.conn.lock().await;
        if conn.alive() {
            if let Some(handle) = &conn.handle {
                return Ok(handle.clone());
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (process, handle) = self
            .spawn(event_tx)
            .await
            .map_err(|e| PlaybackError::Unreachable(format!("mpv: {:#}", e)))?;
        // entry ids restart with the process
        *self.entries.lock() = EntryOwners::default();
        tokio::spawn(forward_events(
            event_rx,
            self.entries.clone(),
            self.current.clone(),
            self.events.clone(),
        ));

        conn.process = Some(process);
        conn.handle = Some(handle.clone());
        Ok(handle)
    }

    fn command(&self) -> anyhow::Result<tokio::process::Command> {
        let binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        let mut cmd = tokio::process::Command::new(binary);
        cmd.arg("--no-video")
            .arg("--idle=yes")
            .arg(platform::mpv_socket_arg(&self.socket_name))
            .arg("--quiet")
            .arg(format!(
                "--volume={}",
                (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .stdout(std::process::Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }

    #[cfg(unix)]
    async fn spawn(
        &self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<(tokio::process::Child, MpvHandle)> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        let data_dir = platform::data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let stderr_path = data_dir.join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;

        let child = self.command()?.stderr(stderr_file).spawn()?;
        info!("mpv: spawned pid {:?}, stderr → {:?}", child.id(), stderr_path);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok((child, MpvHandle::from_stream(stream, event_tx)))
    }

    #[cfg(windows)]
    async fn spawn(
        &self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<(tokio::process::Child, MpvHandle)> {
        let child = self
            .command()?
            .stderr(std::process::Stdio::null())
            .spawn()?;
        info!("mpv: spawned pid {:?}", child.id());

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok((child, MpvHandle::from_stream(client, event_tx)));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

#[async_trait]
impl AudioSink for MpvSink {
    async fn load(&self, url: &str, generation: u64) -> Result<(), PlaybackError> {
        let handle = self.handle().await?;
        self.current.store(generation, Ordering::SeqCst);

        handle
            .send(json!(["set_property", "pause", true]))
            .await
            .map_err(|e| PlaybackError::Unreachable(format!("mpv: {:#}", e)))?;
        let resp = handle
            .send(json!(["loadfile", url, "replace"]))
            .await
            .map_err(|e| PlaybackError::InvalidSource(format!("{}: {:#}", url, e)))?;

        if let Some(entry) = resp["data"]["playlist_entry_id"].as_i64() {
            self.entries.lock().record(entry, generation);
        }
        debug!("mpv: #{} loaded {}", generation, url);
        Ok(())
    }

    async fn start(&self, generation: u64) -> Result<(), PlaybackError> {
        if self.current.load(Ordering::SeqCst) != generation {
            return Ok(());
        }
        let handle = self.handle().await?;
        handle
            .send(json!(["set_property", "pause", false]))
            .await
            .map_err(|e| PlaybackError::Unreachable(format!("mpv: {:#}", e)))?;
        Ok(())
    }

    async fn release(&self, generation: u64) {
        self.entries.lock().release(generation);
        if self.current.load(Ordering::SeqCst) != generation {
            return;
        }
        let handle = self.conn.lock().await.handle.clone();
        if let Some(handle) = handle {
            if let Err(e) = handle.send(json!(["stop"])).await {
                warn!("mpv: stop for #{} failed: {}", generation, e);
            }
        }
    }
}

async fn forward_events(
    mut rx: mpsc::Receiver<MpvEvent>,
    entries: Arc<parking_lot::Mutex<EntryOwners>>,
    current: Arc<AtomicU64>,
    tx: mpsc::Sender<SinkEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(kind) = event.end_file_kind() else {
            continue;
        };
        let generation = match event.playlist_entry_id() {
            None => current.load(Ordering::SeqCst),
            Some(id) => {
                let owner = entries.lock().take(id);
                match owner {
                    EntryOwner::Live(generation) => generation,
                    EntryOwner::Pending => current.load(Ordering::SeqCst),
                    EntryOwner::Released => {
                        debug!("mpv: end-file for released entry {} dropped", id);
                        continue;
                    }
                }
            }
        };
        if tx.send(SinkEvent { generation, kind }).await.is_err() {
            break;
        }
    }
    debug!("mpv: event forwarder exiting");
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // registered before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
