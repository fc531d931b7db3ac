//! Bridge: owns both hub adapters, their dispatch tasks and the scheduler.
//!
//! Each configured server gets two tasks. One drives the adapter, the other
//! drains its event channel through the dispatcher, so events from one
//! server are handled in arrival order and the two servers never wait on
//! each other. On shutdown the adapters close their sockets and drop their
//! senders; the dispatch tasks finish whatever is already queued, then the
//! scheduler stops after its current job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};
use crate::hub::dispatch::Dispatcher;
use crate::hub::legacy::LegacyHub;
use crate::hub::modern::{ModernHub, ReconnectPolicy};
use crate::hub::transport::{HttpTransport, Transport};
use crate::hub::{ConnectResult, wait_for_shutdown};
use crate::model::job::JobKind;
use crate::scheduler::{Scheduler, SchedulerHook};
use crate::sync::SyncActions;

/// Events buffered between an adapter and its dispatch task.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub series: Option<ServerConfig>,
    pub movie: Option<ServerConfig>,
    /// Wait between restarts of a dark series hub. `None` = leave it dark.
    pub series_retry: Option<Duration>,
    /// Queue a full movie resync on every movie hub (re)connect.
    pub movie_resync_on_connect: bool,
    pub reconnect: ReconnectPolicy,
    pub channel_capacity: usize,
}

impl BridgeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            series: config.series.clone(),
            movie: config.movie.clone(),
            series_retry: config.series_retry,
            movie_resync_on_connect: config.movie_resync_on_connect,
            reconnect: ReconnectPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// One transport per server.
pub struct Transports {
    pub series: Arc<dyn Transport>,
    pub movie: Arc<dyn Transport>,
}

impl Transports {
    /// Real network transports. The movie server runs self-signed
    /// certificates, so its transport skips verification.
    pub fn http() -> Result<Self> {
        Ok(Self {
            series: Arc::new(HttpTransport::new(true)?),
            movie: Arc::new(HttpTransport::new(false)?),
        })
    }
}

pub struct Bridge {
    config: Arc<BridgeConfig>,
    transports: Arc<Transports>,
    actions: Arc<dyn SyncActions>,
    scheduler: Arc<Scheduler>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Clone for Bridge {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            transports: Arc::clone(&self.transports),
            actions: Arc::clone(&self.actions),
            scheduler: Arc::clone(&self.scheduler),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Bridge {
    pub fn new(config: BridgeConfig, transports: Transports, actions: Arc<dyn SyncActions>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            transports: Arc::new(transports),
            actions,
            scheduler: Arc::new(Scheduler::new()),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Signal the bridge to shut down.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        let dispatcher = Dispatcher::new(Arc::clone(&self.actions));
        let mut shutdown = self.shutdown.subscribe();

        let scheduler = Arc::clone(&self.scheduler);
        let actions = Arc::clone(&self.actions);
        let worker = tokio::spawn(async move { scheduler.run(actions).await });

        let mut adapters = JoinSet::new();
        if let Some(server) = self.config.series.clone() {
            adapters.spawn(self.clone().run_series(server, dispatcher.clone()));
        }
        if let Some(server) = self.config.movie.clone() {
            adapters.spawn(self.clone().run_movie(server, dispatcher.clone()));
        }
        if adapters.is_empty() {
            warn!("no media server configured, nothing to bridge");
        }
        info!(adapters = adapters.len(), "bridge started");

        wait_for_shutdown(&mut shutdown).await;
        info!("bridge shutting down");

        while let Some(joined) = adapters.join_next().await {
            if let Err(e) = joined {
                error!("bridge task failed: {e}");
            }
        }
        self.scheduler.shutdown();
        worker
            .await
            .map_err(|e| Error::Other(format!("scheduler task failed: {e}")))??;

        info!("bridge stopped");
        Ok(())
    }

    /// The series hub only ever tries once per start, so the bridge restarts
    /// it every `series_retry` until it connects, and again after it drops.
    async fn run_series(self, server: ServerConfig, dispatcher: Dispatcher) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let drain = tokio::spawn(async move { dispatcher.drain("series", rx).await });

        let mut hub = LegacyHub::new(
            server.base_url,
            server.api_key,
            Arc::clone(&self.transports.series),
            self.scheduler.clone(),
            tx,
        );
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let started = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                started = hub.start() => started,
            };
            match started {
                ConnectResult::Connected => hub.run(&mut shutdown).await,
                ConnectResult::Failed { reason } => {
                    info!(server = "series", %reason, "series hub not available");
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let Some(retry) = self.config.series_retry else {
                info!(server = "series", "series hub retry disabled, staying dark");
                break;
            };
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(retry) => {}
            }
        }

        drop(hub);
        let _ = drain.await;
    }

    async fn run_movie(self, server: ServerConfig, dispatcher: Dispatcher) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let drain = tokio::spawn(async move { dispatcher.drain("movie", rx).await });

        let mut hub = ModernHub::new(
            server.base_url,
            server.api_key,
            Arc::clone(&self.transports.movie),
            tx,
        )
        .with_policy(self.config.reconnect.clone());
        if self.config.movie_resync_on_connect {
            // Merged by the scheduler while one is already pending.
            let scheduler = Arc::clone(&self.scheduler);
            hub = hub.on_open(move || {
                scheduler.enqueue(JobKind::FullMovieSync, "movie-hub/connected");
            });
        }

        hub.run(self.shutdown.subscribe()).await;
        let _ = drain.await;
    }
}
