mod support;

use std::path::Path;
use std::sync::Arc;

use hubbridge::audit::AuditLog;
use hubbridge::error::Error;
use hubbridge::event::EventStream;
use hubbridge::model::audit::{AuditScope, HistoryAction, MediaKind, MediaRef};
use hubbridge::pathmap::{PathMappings, PathRule};
use hubbridge::subtitles::{DeleteRequest, SubtitleLanguage, SubtitleRemover};
use support::{IndexCall, MemoryAuditStore, RecordingIndexer};
use tokio::sync::broadcast;

struct Fixture {
    remover: SubtitleRemover,
    store: Arc<MemoryAuditStore>,
    indexer: Arc<RecordingIndexer>,
    events: broadcast::Receiver<hubbridge::event::Event>,
}

/// Local `dir` is the series server's `/srv/tv` and the movie server's `/srv/movies`.
fn fixture(dir: &Path, store: MemoryAuditStore) -> Fixture {
    let local = dir.to_str().unwrap().to_string();
    let paths = PathMappings::new(
        vec![PathRule {
            from: "/srv/tv".into(),
            to: local.clone(),
        }],
        vec![PathRule {
            from: "/srv/movies".into(),
            to: local,
        }],
    );
    let store = Arc::new(store);
    let indexer = Arc::new(RecordingIndexer::default());
    let audit = Arc::new(AuditLog::new(store.clone(), Arc::new(EventStream::new(16))));
    let events = audit.events().subscribe();
    Fixture {
        remover: SubtitleRemover::new(audit, indexer.clone(), Arc::new(paths)),
        store,
        indexer,
        events,
    }
}

fn request(media: MediaRef, dir: &Path, subtitles: &str) -> DeleteRequest {
    DeleteRequest {
        media,
        language: SubtitleLanguage::new("en", "English"),
        media_path: dir.join("video.mkv").to_str().unwrap().to_string(),
        subtitles_path: dir.join(subtitles).to_str().unwrap().to_string(),
    }
}

const EPISODE: MediaRef = MediaRef::Episode {
    series_id: 4,
    episode_id: 40,
};

#[tokio::test]
async fn non_srt_file_is_rejected_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("video.en.ass");
    std::fs::write(&sub, "[Script Info]").unwrap();
    let mut f = fixture(dir.path(), MemoryAuditStore::default());

    let result = f
        .remover
        .delete_subtitles(&request(EPISODE, dir.path(), "video.en.ass"))
        .await;

    assert!(matches!(result, Err(Error::Rejected(_))));
    assert!(sub.exists());
    assert!(f.store.history().is_empty());
    assert!(f.indexer.calls().is_empty());
    assert!(f.events.try_recv().is_err());
}

#[tokio::test]
async fn deleting_writes_one_history_row_and_reindexes() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("video.en.srt");
    std::fs::write(&sub, "1\n00:00:01,000 --> 00:00:02,000\nHi\n").unwrap();
    let mut f = fixture(dir.path(), MemoryAuditStore::default());

    let mut req = request(EPISODE, dir.path(), "video.en.srt");
    req.language = req.language.forced(true);
    let deleted = f.remover.delete_subtitles(&req).await.unwrap();

    assert!(deleted);
    assert!(!sub.exists());

    let history = f.store.history();
    assert_eq!(history.len(), 1);
    let row = &history[0];
    assert_eq!(row.media(), EPISODE);
    assert_eq!(row.action(), HistoryAction::Deleted);
    assert_eq!(row.description(), "English forced subtitles deleted from disk.");
    assert_eq!(row.language_tag(), Some("en:forced"));
    assert_eq!(row.video(), Some("/srv/tv/video.mkv"));
    assert_eq!(row.subtitles(), Some("/srv/tv/video.en.srt"));

    assert_eq!(f.events.try_recv().unwrap().scope, AuditScope::EpisodeHistory);
    assert!(f.events.try_recv().is_err());

    assert_eq!(
        f.indexer.calls(),
        vec![IndexCall {
            kind: MediaKind::Series,
            server_path: "/srv/tv/video.mkv".into(),
            local_path: req.media_path.clone(),
        }]
    );
}

#[tokio::test]
async fn missing_file_reindexes_without_history() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = fixture(dir.path(), MemoryAuditStore::default());
    let movie = MediaRef::Movie { movie_id: 9 };

    let deleted = f
        .remover
        .delete_subtitles(&request(movie, dir.path(), "gone.srt"))
        .await
        .unwrap();

    assert!(!deleted);
    assert!(f.store.history().is_empty());
    assert!(f.events.try_recv().is_err());
    let calls = f.indexer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, MediaKind::Movie);
    assert_eq!(calls[0].server_path, "/srv/movies/video.mkv");
}

#[tokio::test]
async fn audit_failure_is_reported_after_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("video.srt");
    std::fs::write(&sub, "").unwrap();
    let mut f = fixture(dir.path(), MemoryAuditStore::broken());

    let result = f
        .remover
        .delete_subtitles(&request(EPISODE, dir.path(), "video.srt"))
        .await;

    assert!(result.is_err());
    assert!(!sub.exists());
    assert_eq!(f.indexer.calls().len(), 1);
    assert!(f.events.try_recv().is_err());
}
