mod support;

use std::sync::Arc;
use std::time::Duration;

use hubbridge::bridge::{Bridge, BridgeConfig, Transports};
use hubbridge::config::ServerConfig;
use hubbridge::error::Result;
use hubbridge::hub::modern::ReconnectPolicy;
use secrecy::SecretString;
use serde_json::json;
use support::{Call, FakeTransport, RecordingActions};
use tokio::task::JoinHandle;
use url::Url;

const INIT_FRAME: &str = r#"{"C":"s-0,1","S":1,"M":[]}"#;
const RS: char = '\u{1e}';

struct Fixture {
    bridge: Bridge,
    series: Arc<FakeTransport>,
    movie: Arc<FakeTransport>,
    actions: Arc<RecordingActions>,
}

fn server(url: &str) -> ServerConfig {
    ServerConfig {
        base_url: Url::parse(url).unwrap(),
        api_key: SecretString::from("key"),
    }
}

fn config() -> BridgeConfig {
    BridgeConfig {
        series: None,
        movie: None,
        series_retry: Some(Duration::from_millis(20)),
        movie_resync_on_connect: false,
        reconnect: ReconnectPolicy {
            keep_alive_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_millis(10),
            ..ReconnectPolicy::default()
        },
        channel_capacity: 16,
    }
}

fn with_series(mut config: BridgeConfig) -> BridgeConfig {
    config.series = Some(server("http://series.lan:8989/sonarr"));
    config
}

fn with_movie(mut config: BridgeConfig) -> BridgeConfig {
    config.movie = Some(server("https://movies.lan/radarr"));
    config
}

fn fixture(config: BridgeConfig, actions: RecordingActions) -> Fixture {
    let series = Arc::new(FakeTransport::default());
    let movie = Arc::new(FakeTransport::default());
    let actions = Arc::new(actions);
    let bridge = Bridge::new(
        config,
        Transports {
            series: series.clone(),
            movie: movie.clone(),
        },
        actions.clone(),
    );
    Fixture {
        bridge,
        series,
        movie,
        actions,
    }
}

/// Runs on its own task, which also proves the bridge future is `Send`.
fn spawn(bridge: &Bridge) -> JoinHandle<Result<()>> {
    let bridge = bridge.clone();
    tokio::spawn(async move { bridge.run().await })
}

async fn stop(bridge: &Bridge, running: JoinHandle<Result<()>>) {
    bridge.shutdown();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("bridge should stop promptly")
        .unwrap()
        .unwrap();
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn movie_record(id: i64) -> String {
    let record = json!({
        "type": 1,
        "target": "receiveMessage",
        "arguments": [{"name": "movie", "body": {"action": "updated", "resource": {"id": id}}}]
    });
    format!("{record}{RS}")
}

fn count(calls: &[Call], wanted: &Call) -> usize {
    calls.iter().filter(|c| *c == wanted).count()
}

#[tokio::test]
async fn series_hub_is_restarted_after_a_refused_start() {
    let f = fixture(with_series(config()), RecordingActions::default());
    f.series.refuse(true);
    let running = spawn(&f.bridge);

    eventually("a second start attempt", || f.series.requests().len() >= 2).await;

    let socket = f.series.push_socket();
    socket.push(INIT_FRAME);
    f.series.refuse(false);

    let calls = f.actions.wait_for(2).await;
    assert_eq!(calls[..2], [Call::UpdateSeries, Call::SyncEpisodes]);

    let series = json!({"body": {"action": "updated", "resource": {"id": 7}}});
    socket.push(
        json!({"C": "d-1", "M": [{"H": "MessageHub", "M": "series", "A": [series]}]}).to_string(),
    );
    let calls = f.actions.wait_for(3).await;
    assert!(matches!(calls[2], Call::OneSeries(_)));

    stop(&f.bridge, running).await;
    assert!(socket.was_closed());
}

#[tokio::test]
async fn series_hub_without_retry_stays_dark() {
    let mut config = with_series(config());
    config.series_retry = None;
    let f = fixture(config, RecordingActions::default());
    f.series.refuse(true);
    let running = spawn(&f.bridge);

    eventually("the first start attempt", || !f.series.requests().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.series.requests().len(), 1);
    assert!(f.actions.calls().is_empty());

    stop(&f.bridge, running).await;
}

#[tokio::test]
async fn shutdown_interrupts_a_series_start_in_progress() {
    let f = fixture(with_series(config()), RecordingActions::default());
    // Socket opens but never sends its init frame.
    let _socket = f.series.push_socket();
    let running = spawn(&f.bridge);

    eventually("the socket to be opened", || f.series.requests().len() >= 2).await;
    stop(&f.bridge, running).await;
    assert!(f.actions.calls().is_empty());
}

#[tokio::test]
async fn movie_reconnect_storm_collapses_resync_jobs() {
    let mut config = with_movie(config());
    config.movie_resync_on_connect = true;
    let f = fixture(
        config,
        RecordingActions::slow_movies(Duration::from_millis(300)),
    );
    let mut sockets = Vec::new();
    for last in [false, false, true] {
        let socket = f.movie.push_socket();
        socket.push(format!("{{}}{RS}"));
        if !last {
            socket.hang_up();
        }
        sockets.push(socket);
    }
    let running = spawn(&f.bridge);

    eventually("the third connection", || !sockets[2].sent().is_empty()).await;
    assert!(f.bridge.scheduler().pending() <= 1);

    f.actions.wait_for(1).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    let resyncs = count(&f.actions.calls(), &Call::UpdateMovies);
    assert!((1..=2).contains(&resyncs), "three opens ran {resyncs} resyncs");
    assert_eq!(f.bridge.scheduler().pending(), 0);

    stop(&f.bridge, running).await;
}

#[tokio::test]
async fn movie_opens_queue_nothing_without_resync_on_connect() {
    let f = fixture(with_movie(config()), RecordingActions::default());
    let socket = f.movie.push_socket();
    socket.push(format!("{{}}{RS}{}", movie_record(1)));
    let running = spawn(&f.bridge);

    let calls = f.actions.wait_for(1).await;
    assert!(matches!(calls[0], Call::Movie(_)));
    assert_eq!(f.bridge.scheduler().pending(), 0);

    stop(&f.bridge, running).await;
    assert_eq!(count(&f.actions.calls(), &Call::UpdateMovies), 0);
}

#[tokio::test]
async fn shutdown_drains_queued_events_before_returning() {
    let f = fixture(
        with_movie(config()),
        RecordingActions::slow_movies(Duration::from_millis(50)),
    );
    let socket = f.movie.push_socket();
    // Handshake reply and three records in one frame.
    socket.push(format!(
        "{{}}{RS}{}{}{}",
        movie_record(1),
        movie_record(2),
        movie_record(3)
    ));
    let running = spawn(&f.bridge);

    f.actions.wait_for(1).await;
    stop(&f.bridge, running).await;

    let ids: Vec<_> = f
        .actions
        .calls()
        .iter()
        .filter_map(|call| match call {
            Call::Movie(payload) => payload.first().map(|m| m["body"]["resource"]["id"].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn bridge_without_servers_runs_until_shutdown() {
    let f = fixture(config(), RecordingActions::default());
    let running = spawn(&f.bridge);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!running.is_finished());
    stop(&f.bridge, running).await;
}
