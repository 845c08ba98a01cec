use std::sync::Arc;

use indicatif::ProgressBar;

use crate::app::{App, ReconcileResult};
use crate::bookmarks::{BackendCsv, BookmarkCreate, BookmarkStore, BookmarkUpdate};
use crate::config::Config;
use crate::search::{SearchMode, SearchQuery};
use crate::semantic::{Embedder, EmbeddingError, VectorStorage};

use super::fixtures::{self, FailingEmbedder, VocabEmbedder, ALICE};

/// Same vectors as `VocabEmbedder`, different model identity.
struct RenamedEmbedder;

impl Embedder for RenamedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        VocabEmbedder.embed(text)
    }

    fn model_id_hash(&self) -> [u8; 32] {
        crate::semantic::hash_model_name("another-model")
    }
}

/// Isolated app over a fresh temp directory.
fn create_app(embedder: Option<Arc<dyn Embedder>>) -> (App, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let app = open_app(&tmp, embedder);
    (app, tmp)
}

fn open_app(tmp: &tempfile::TempDir, embedder: Option<Arc<dyn Embedder>>) -> App {
    let store = BackendCsv::load(&tmp.path().join("bookmarks.csv")).unwrap();
    App::with_parts(Config::with_base_path(tmp.path()), Arc::new(store), embedder).unwrap()
}

fn bookmark(title: &str, description: &str) -> BookmarkCreate {
    BookmarkCreate {
        url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
        title: Some(title.to_string()),
        description: Some(description.to_string()),
        ..Default::default()
    }
}

async fn search_ids(app: &App, text: &str, mode: SearchMode) -> Vec<u64> {
    let query = SearchQuery::new(text, mode, 10, 0.0).unwrap();
    let response = app.orchestrator().search(&query, ALICE).await.unwrap();
    response.hits.iter().map(|hit| hit.id).collect()
}

async fn semantic_ids(app: &App, text: &str) -> Vec<u64> {
    search_ids(app, text, SearchMode::Semantic).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_embeds_bookmark() {
    let (app, tmp) = create_app(Some(Arc::new(VocabEmbedder)));

    let bmark = app
        .create(ALICE, bookmark("Rust Notes", "ownership and borrowing"))
        .unwrap();

    assert_eq!(app.indexed_count(), 1);
    assert!(tmp.path().join("vectors.bin").exists());
    assert_eq!(semantic_ids(&app, "rust").await, vec![bmark.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_reembeds_changed_text() {
    let (app, _tmp) = create_app(Some(Arc::new(VocabEmbedder)));

    let bmark = app
        .create(ALICE, bookmark("Bread Notes", "crumb and crust"))
        .unwrap();
    assert!(semantic_ids(&app, "rust").await.is_empty());

    app.update(
        ALICE,
        bmark.id,
        BookmarkUpdate {
            title: Some("Rust Notes".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(app.indexed_count(), 1);
    assert_eq!(semantic_ids(&app, "rust").await, vec![bmark.id]);
    assert!(semantic_ids(&app, "bread").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_without_text_change_keeps_entry() {
    let (app, _tmp) = create_app(Some(Arc::new(VocabEmbedder)));

    let bmark = app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    app.update(
        ALICE,
        bmark.id,
        BookmarkUpdate {
            tags: Some(vec!["lang".to_string()]),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(app.indexed_count(), 1);
    assert_eq!(semantic_ids(&app, "rust").await, vec![bmark.id]);
}

#[test]
fn test_create_survives_embedding_failure() {
    let (app, tmp) = create_app(Some(Arc::new(FailingEmbedder)));

    let bmark = app
        .create(ALICE, bookmark("Rust Notes", "ownership"))
        .unwrap();

    assert_eq!(app.indexed_count(), 0);
    let stored = BackendCsv::load(&tmp.path().join("bookmarks.csv")).unwrap();
    assert_eq!(stored.list(ALICE).unwrap().len(), 1);
    assert_eq!(bmark.title.as_deref(), Some("Rust Notes"));

    let result = app.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(result.failed, 1);
    assert_eq!(result.embedded, 0);
}

#[test]
fn test_delete_removes_vector() {
    let (app, _tmp) = create_app(Some(Arc::new(VocabEmbedder)));

    let first = app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    app.create(ALICE, bookmark("Bread Notes", "")).unwrap();
    assert_eq!(app.indexed_count(), 2);

    app.delete(ALICE, first.id).unwrap();
    assert_eq!(app.indexed_count(), 1);
    assert!(app.delete(ALICE, first.id).is_err());
}

#[test]
fn test_vectors_reload_on_open() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let app = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
        app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
        app.create(ALICE, bookmark("Bread Notes", "")).unwrap();
    }

    let reopened = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
    assert_eq!(reopened.indexed_count(), 2);

    let result = reopened.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(result.unchanged, 2);
    assert_eq!(result.embedded, 0);
}

#[test]
fn test_model_change_discards_vectors() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let app = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
        app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    }

    let reopened = open_app(&tmp, Some(Arc::new(RenamedEmbedder)));
    assert_eq!(reopened.indexed_count(), 0);

    let result = reopened.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(result.embedded, 1);

    let stored = VectorStorage::new(tmp.path().join("vectors.bin"))
        .load(&RenamedEmbedder.model_id_hash())
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_corrupted_vectors_start_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("vectors.bin"), vec![0xab_u8; 64]).unwrap();

    let app = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
    assert_eq!(app.indexed_count(), 0);
}

#[test]
fn test_truncated_vectors_start_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let app = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
        app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    }

    let path = tmp.path().join("vectors.bin");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

    let store = BackendCsv::load(&tmp.path().join("bookmarks.csv")).unwrap();
    let app = App::with_parts(
        Config::with_base_path(tmp.path()),
        Arc::new(store),
        Some(Arc::new(VocabEmbedder)),
    )
    .unwrap();
    assert_eq!(app.indexed_count(), 0);

    let result = app.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(result.embedded, 1);
}

#[test]
fn test_reconcile_tracks_store() {
    let (store, tmp) = fixtures::fixture_store();
    let textless = store
        .create(
            ALICE,
            BookmarkCreate {
                url: "https://example.com/bare".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

    let app = App::with_parts(
        Config::with_base_path(tmp.path()),
        store.clone(),
        Some(Arc::new(VocabEmbedder)),
    )
    .unwrap();
    assert_eq!(app.indexed_count(), 0);

    let result = app.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(
        result,
        ReconcileResult {
            embedded: 6,
            unchanged: 0,
            removed: 0,
            skipped: 1,
            failed: 0,
        }
    );
    assert_eq!(app.indexed_count(), 6);
    assert!(tmp.path().join("vectors.bin").exists());

    let result = app.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(result.embedded, 0);
    assert_eq!(result.unchanged, 6);
    assert_eq!(result.skipped, 1);

    // changes made behind the app's back
    store.delete(ALICE, 1).unwrap();
    store
        .update(
            ALICE,
            textless.id,
            BookmarkUpdate {
                title: Some("Rust Links".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let result = app.reconcile(&ProgressBar::hidden()).unwrap();
    assert_eq!(
        result,
        ReconcileResult {
            embedded: 1,
            unchanged: 5,
            removed: 1,
            skipped: 0,
            failed: 0,
        }
    );
    assert_eq!(app.indexed_count(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_sees_bookmarks_written_by_cli() {
    let tmp = tempfile::tempdir().unwrap();
    let server = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
    server.reconcile(&ProgressBar::hidden()).unwrap();
    assert!(server.sync().unwrap().is_none());

    let cli = open_app(&tmp, Some(Arc::new(VocabEmbedder)));
    let bmark = cli
        .create(ALICE, bookmark("Rust Notes", "ownership and borrowing"))
        .unwrap();

    // keyword retrieval reads the store, which reloads the file
    assert_eq!(
        search_ids(&server, "rust", SearchMode::Keyword).await,
        vec![bmark.id]
    );
    assert!(semantic_ids(&server, "rust").await.is_empty());

    let result = server.sync().unwrap().unwrap();
    assert_eq!(result.embedded, 1);
    assert_eq!(semantic_ids(&server, "rust").await, vec![bmark.id]);
    assert!(server.sync().unwrap().is_none());

    cli.delete(ALICE, bmark.id).unwrap();

    let result = server.sync().unwrap().unwrap();
    assert_eq!(result.removed, 1);
    assert_eq!(server.indexed_count(), 0);
    assert!(search_ids(&server, "rust", SearchMode::Hybrid).await.is_empty());
}

#[test]
fn test_sync_without_semantic_is_noop() {
    let (app, _tmp) = create_app(None);

    app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    assert!(app.sync().unwrap().is_none());
}

#[test]
fn test_reconcile_requires_semantic() {
    let (app, _tmp) = create_app(None);

    app.create(ALICE, bookmark("Rust Notes", "")).unwrap();
    assert!(!app.semantic_enabled());
    assert_eq!(app.indexed_count(), 0);
    assert!(app.reconcile(&ProgressBar::hidden()).is_err());
}
