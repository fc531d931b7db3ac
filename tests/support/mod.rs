//! In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hubbridge::audit::AuditStore;
use hubbridge::error::{Error, Result};
use hubbridge::hub::transport::{Socket, Transport};
use hubbridge::model::Payload;
use hubbridge::model::audit::*;
use hubbridge::model::job::{EnqueueResult, JobId, JobKind};
use hubbridge::scheduler::SchedulerHook;
use hubbridge::subtitles::SubtitleIndexer;
use hubbridge::sync::SyncActions;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Scripted server. Negotiation always succeeds unless `refuse` is set;
/// each `open` hands out the next socket queued with [`FakeTransport::push_socket`].
pub struct FakeTransport {
    refuse: AtomicBool,
    start_reply: Mutex<Value>,
    sockets: Mutex<VecDeque<FakeSocket>>,
    requests: Mutex<Vec<Url>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            refuse: AtomicBool::new(false),
            start_reply: Mutex::new(json!({"Response": "started"})),
            sockets: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    /// Make every HTTP request fail as if the server were down.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_start_reply(&self, reply: Value) {
        *self.start_reply.lock().unwrap() = reply;
    }

    pub fn push_socket(&self) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.sockets.lock().unwrap().push_back(FakeSocket {
            frames: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        SocketHandle {
            frames: Mutex::new(Some(tx)),
            sent,
            closed,
        }
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, url: &Url) -> Result<()> {
        self.requests.lock().unwrap().push(url.clone());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_json(&self, url: &Url) -> Result<Value> {
        self.record(url)?;
        if url.path().ends_with("/start") {
            return Ok(self.start_reply.lock().unwrap().clone());
        }
        Ok(json!({"ConnectionToken": "tok-legacy", "TryWebSockets": true}))
    }

    async fn post_json(&self, url: &Url) -> Result<Value> {
        self.record(url)?;
        Ok(json!({"connectionToken": "tok-modern", "negotiateVersion": 1}))
    }

    async fn open(&self, url: &Url) -> Result<Box<dyn Socket>> {
        self.record(url)?;
        match self.sockets.lock().unwrap().pop_front() {
            Some(socket) => Ok(Box::new(socket)),
            None => Err(Error::Transport("no socket available".into())),
        }
    }
}

struct FakeSocket {
    frames: mpsc::UnboundedReceiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The test's end of a [`FakeSocket`].
pub struct SocketHandle {
    frames: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl SocketHandle {
    /// Queue a frame for the client to read.
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = self.frames.lock().unwrap().as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    /// Drop the server side. Buffered frames are still delivered first.
    pub fn hang_up(&self) {
        self.frames.lock().unwrap().take();
    }

    /// Frames the client sent.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Sync actions and scheduler hook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UpdateSeries,
    SyncEpisodes,
    UpdateMovies,
    OneSeries(Payload),
    OneEpisode(Payload),
    Movie(Payload),
}

#[derive(Default)]
pub struct RecordingActions {
    calls: Mutex<Vec<Call>>,
    fail_series: AtomicBool,
    movie_delay: Option<Duration>,
}

impl RecordingActions {
    /// `update_one_series` records the call, then fails.
    pub fn failing_series() -> Self {
        let actions = Self::default();
        actions.fail_series.store(true, Ordering::SeqCst);
        actions
    }

    /// Movie actions take `delay` before they are recorded.
    pub fn slow_movies(delay: Duration) -> Self {
        Self {
            movie_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` calls have been recorded.
    pub async fn wait_for(&self, n: usize) -> Vec<Call> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {n} calls, got {:?}", self.calls()))
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn movie_pause(&self) {
        if let Some(delay) = self.movie_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SyncActions for RecordingActions {
    async fn update_series(&self) -> Result<()> {
        self.push(Call::UpdateSeries);
        Ok(())
    }

    async fn sync_episodes(&self) -> Result<()> {
        self.push(Call::SyncEpisodes);
        Ok(())
    }

    async fn update_movies(&self) -> Result<()> {
        self.movie_pause().await;
        self.push(Call::UpdateMovies);
        Ok(())
    }

    async fn update_one_series(&self, payload: &Payload) -> Result<()> {
        self.push(Call::OneSeries(payload.clone()));
        if self.fail_series.load(Ordering::SeqCst) {
            return Err(Error::Other("series sync failed".into()));
        }
        Ok(())
    }

    async fn sync_one_episode(&self, payload: &Payload) -> Result<()> {
        self.push(Call::OneEpisode(payload.clone()));
        Ok(())
    }

    async fn movie_changed(&self, payload: &Payload) -> Result<()> {
        self.movie_pause().await;
        self.push(Call::Movie(payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHook {
    jobs: Mutex<Vec<(JobKind, String)>>,
}

impl RecordingHook {
    pub fn kinds(&self) -> Vec<JobKind> {
        self.jobs.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn sources(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|(_, source)| source.clone()).collect()
    }
}

impl SchedulerHook for RecordingHook {
    fn enqueue(&self, kind: JobKind, source: &str) -> EnqueueResult {
        self.jobs.lock().unwrap().push((kind, source.to_string()));
        EnqueueResult::Created(JobId::new())
    }
}

// ---------------------------------------------------------------------------
// Audit store and indexer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditStore {
    history: Mutex<Vec<NewHistory>>,
    blacklist: Mutex<Vec<NewBlacklist>>,
    broken: AtomicBool,
}

impl MemoryAuditStore {
    /// Every write fails.
    pub fn broken() -> Self {
        let store = Self::default();
        store.broken.store(true, Ordering::SeqCst);
        store
    }

    pub fn history(&self) -> Vec<NewHistory> {
        self.history.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Other("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_history(&self, entry: &NewHistory) -> Result<i64> {
        self.check()?;
        let mut history = self.history.lock().unwrap();
        history.push(entry.clone());
        Ok(history.len() as i64)
    }

    async fn insert_blacklist(&self, entry: &NewBlacklist) -> Result<()> {
        self.check()?;
        self.blacklist.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn delete_blacklist(&self, kind: MediaKind, provider: &str, subs_id: &str) -> Result<u64> {
        self.check()?;
        let mut blacklist = self.blacklist.lock().unwrap();
        let before = blacklist.len();
        blacklist.retain(|e| !(e.media.kind() == kind && e.provider == provider && e.subs_id == subs_id));
        Ok((before - blacklist.len()) as u64)
    }

    async fn delete_all_blacklist(&self, kind: MediaKind) -> Result<u64> {
        self.check()?;
        let mut blacklist = self.blacklist.lock().unwrap();
        let before = blacklist.len();
        blacklist.retain(|e| e.media.kind() != kind);
        Ok((before - blacklist.len()) as u64)
    }

    async fn blacklist(&self, kind: MediaKind) -> Result<Vec<BlacklistEntry>> {
        Ok(self
            .blacklist
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.media.kind() == kind)
            .map(|e| BlacklistEntry {
                media: e.media,
                timestamp: Utc::now(),
                provider: e.provider.clone(),
                subs_id: e.subs_id.clone(),
                language: Some(e.language.clone()),
            })
            .collect())
    }

    async fn recent_history(&self, kind: MediaKind, limit: i64) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, e)| e.media().kind() == kind)
            .take(limit as usize)
            .map(|(i, e)| HistoryEntry {
                id: i as i64 + 1,
                media: e.media(),
                action: e.action().code(),
                timestamp: Utc::now(),
                description: e.description().to_string(),
                video_path: e.video().map(str::to_string),
                language: e.language_tag().map(str::to_string),
                provider: None,
                score: None,
                subs_id: None,
                subtitles_path: e.subtitles().map(str::to_string),
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCall {
    pub kind: MediaKind,
    pub server_path: String,
    pub local_path: String,
}

#[derive(Default)]
pub struct RecordingIndexer {
    calls: Mutex<Vec<IndexCall>>,
}

impl RecordingIndexer {
    pub fn calls(&self) -> Vec<IndexCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, kind: MediaKind, server_path: &str, local_path: &str) {
        self.calls.lock().unwrap().push(IndexCall {
            kind,
            server_path: server_path.to_string(),
            local_path: local_path.to_string(),
        });
    }
}

#[async_trait]
impl SubtitleIndexer for RecordingIndexer {
    async fn store_subtitles(&self, server_path: &str, local_path: &str) -> Result<()> {
        self.push(MediaKind::Series, server_path, local_path);
        Ok(())
    }

    async fn store_subtitles_movie(&self, server_path: &str, local_path: &str) -> Result<()> {
        self.push(MediaKind::Movie, server_path, local_path);
        Ok(())
    }
}
