use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use anyhow::{anyhow, bail, Context};
use indicatif::ProgressBar;

use crate::bookmarks::{BackendCsv, Bookmark, BookmarkCreate, BookmarkStore, BookmarkUpdate};
use crate::config::Config;
use crate::search::{CandidateEnricher, KeywordRetriever, LexicalIndex, QueryOrchestrator};
use crate::semantic::{
    content_hash, preprocess_bookmark, Embedder, LazyEmbedder, SemanticRetriever, VectorIndex,
    VectorStorage, VectorStorageError,
};

/// Embeddings computed per model call during reconcile.
const RECONCILE_BATCH_SIZE: usize = 32;

const NEVER_SYNCED: u64 = u64::MAX;

/// Outcome of `App::reconcile`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Missing or stale entries (re)computed
    pub embedded: usize,
    /// Entries already matching the bookmark's text
    pub unchanged: usize,
    /// Entries of deleted bookmarks, plus bookmarks left without text
    pub removed: usize,
    /// Bookmarks with no text to embed
    pub skipped: usize,
    /// Bookmarks whose embedding failed; retried on the next run
    pub failed: usize,
}

/// Bookmark store plus the vector index kept in step with it.
pub struct App {
    store: Arc<dyn BookmarkStore>,
    index: Arc<RwLock<VectorIndex>>,
    /// `None` when semantic search is disabled
    embedder: Option<Arc<dyn Embedder>>,
    vectors: VectorStorage,
    config: Config,
    /// Store generation the index was last reconciled against
    synced: AtomicU64,
}

impl App {
    /// Opens the CSV store and vectors under the configured base path.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let base_path = config.base_path().to_path_buf();
        std::fs::create_dir_all(&base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let store = BackendCsv::load(&base_path.join("bookmarks.csv"))?;

        let embedder: Option<Arc<dyn Embedder>> = if config.semantic_search.enabled {
            Some(Arc::new(LazyEmbedder::new(
                config.semantic_search.clone(),
                base_path,
            )))
        } else {
            log::info!("semantic search disabled");
            None
        };

        Self::with_parts(config, Arc::new(store), embedder)
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn BookmarkStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> anyhow::Result<Self> {
        let vectors = VectorStorage::new(config.base_path().join("vectors.bin"));

        let index = match &embedder {
            Some(embedder) if vectors.exists() => {
                load_vectors(&vectors, &embedder.model_id_hash())?
            }
            _ => VectorIndex::new(),
        };

        Ok(Self {
            store,
            index: Arc::new(RwLock::new(index)),
            embedder,
            vectors,
            config,
            synced: AtomicU64::new(NEVER_SYNCED),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn semantic_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn indexed_count(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    /// Wires the retrievers, enricher and search settings together.
    pub fn orchestrator(&self) -> QueryOrchestrator {
        let semantic = self.embedder.as_ref().map(|embedder| {
            SemanticRetriever::new(
                embedder.clone(),
                self.index.clone(),
                self.config.semantic_search.min_similarity,
            )
        });

        let keyword = KeywordRetriever::new(Arc::new(LexicalIndex::new(
            self.store.clone(),
            self.config.keyword.clone(),
        )));

        QueryOrchestrator::new(
            semantic,
            keyword,
            CandidateEnricher::new(self.store.clone()),
            self.config.search.clone(),
        )
    }

    /// Loads the embedding model ahead of the first query.
    pub fn warm_up(&self) -> anyhow::Result<()> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };
        embedder
            .embed("warm up")
            .map_err(|e| anyhow!("failed to load embedding model: {e}"))?;
        Ok(())
    }

    /// Creates a bookmark and embeds it right away.
    ///
    /// An embedding failure doesn't fail the create; `reconcile` picks the
    /// bookmark up later.
    pub fn create(&self, owner: &str, create: BookmarkCreate) -> anyhow::Result<Bookmark> {
        let bmark = self.store.create(owner, create)?;
        log::info!("created bookmark {} for {}", bmark.id, owner);

        if self.embedder.is_some() {
            self.embed_one(&bmark)?;
            self.persist_vectors();
        }

        Ok(bmark)
    }

    /// Updates a bookmark, re-embedding it when its text changed.
    pub fn update(&self, owner: &str, id: u64, update: BookmarkUpdate) -> anyhow::Result<Bookmark> {
        let bmark = self.store.update(owner, id, update)?;

        if self.embedder.is_some() {
            let hash = content_hash(&bmark);
            let current = self
                .index
                .read()
                .map_err(|_| anyhow!("vector index lock poisoned"))?
                .get(id)
                .map(|entry| entry.content_hash == hash)
                .unwrap_or(false);

            if !current {
                self.embed_one(&bmark)?;
                self.persist_vectors();
            }
        }

        Ok(bmark)
    }

    pub fn delete(&self, owner: &str, id: u64) -> anyhow::Result<()> {
        self.store.delete(owner, id)?;
        log::info!("deleted bookmark {} of {}", id, owner);

        if self.write_index()?.remove(id).is_some() {
            self.persist_vectors();
        }

        Ok(())
    }

    /// Brings the vector index in line with the store: embeds missing and
    /// stale entries, drops entries of bookmarks that no longer exist.
    pub fn reconcile(&self, progress: &ProgressBar) -> anyhow::Result<ReconcileResult> {
        let Some(embedder) = &self.embedder else {
            bail!("semantic search is disabled");
        };

        let generation = self.store.generation()?;
        let bookmarks = self.store.all()?;
        let live: HashSet<u64> = bookmarks.iter().map(|b| b.id).collect();
        let mut result = ReconcileResult::default();

        let mut pending: Vec<(Bookmark, u64, String)> = vec![];
        {
            let mut index = self.write_index()?;

            let orphans: Vec<u64> = index.ids().filter(|id| !live.contains(id)).collect();
            for id in orphans {
                index.remove(id);
                result.removed += 1;
            }

            for bmark in bookmarks {
                let hash = content_hash(&bmark);
                let fresh = index
                    .get(bmark.id)
                    .map(|entry| entry.content_hash == hash && entry.owner == bmark.owner)
                    .unwrap_or(false);
                if fresh {
                    result.unchanged += 1;
                    continue;
                }

                match preprocess_bookmark(&bmark) {
                    Some(text) => pending.push((bmark, hash, text)),
                    None => {
                        if index.remove(bmark.id).is_some() {
                            result.removed += 1;
                        }
                        result.skipped += 1;
                    }
                }
            }
        }

        log::info!(
            "reconcile: {} to embed, {} unchanged, {} removed",
            pending.len(),
            result.unchanged,
            result.removed
        );

        progress.set_length(pending.len() as u64);

        // embedding happens outside the index lock so searches keep running
        for chunk in pending.chunks(RECONCILE_BATCH_SIZE) {
            let texts: Vec<String> = chunk.iter().map(|(_, _, text)| text.clone()).collect();

            match embedder.embed_batch(&texts) {
                Ok(embeddings) => {
                    let mut index = self.write_index()?;
                    for ((bmark, hash, _), embedding) in chunk.iter().zip(embeddings) {
                        match index.insert(bmark.id, &bmark.owner, *hash, embedding) {
                            Ok(()) => result.embedded += 1,
                            Err(err) => {
                                log::warn!("failed to index bookmark {}: {}", bmark.id, err);
                                result.failed += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    log::warn!("failed to embed batch of {}: {}", chunk.len(), err);
                    result.failed += chunk.len();
                }
            }

            progress.inc(chunk.len() as u64);
        }

        if result.embedded > 0 || result.removed > 0 || !self.vectors.exists() {
            self.save_vectors()?;
        }

        self.synced.store(generation, Ordering::SeqCst);
        log::info!("reconcile finished: {:?}", result);

        Ok(result)
    }

    /// Reconciles only if the store changed since the last reconcile, e.g.
    /// because another process wrote `bookmarks.csv`.
    ///
    /// Returns `None` when there was nothing to do.
    pub fn sync(&self) -> anyhow::Result<Option<ReconcileResult>> {
        if self.embedder.is_none() {
            return Ok(None);
        }

        let generation = self.store.generation()?;
        if generation == self.synced.load(Ordering::SeqCst) {
            return Ok(None);
        }

        log::debug!("bookmark store changed, reconciling vector index");
        self.reconcile(&ProgressBar::hidden()).map(Some)
    }

    pub fn save_vectors(&self) -> anyhow::Result<()> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };

        let index = self
            .index
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        self.vectors
            .save(&index, &embedder.model_id_hash())
            .with_context(|| format!("failed to save {}", self.vectors.path().display()))?;

        log::debug!("saved {} vectors", index.len());
        Ok(())
    }

    /// Replaces the bookmark's entry, or drops it when there is nothing to
    /// embed or embedding fails.
    fn embed_one(&self, bmark: &Bookmark) -> anyhow::Result<()> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };

        // a stale entry must not outlive the mutation
        self.write_index()?.remove(bmark.id);

        let Some(text) = preprocess_bookmark(bmark) else {
            return Ok(());
        };

        match embedder.embed(&text) {
            Ok(embedding) => {
                if let Err(err) =
                    self.write_index()?
                        .insert(bmark.id, &bmark.owner, content_hash(bmark), embedding)
                {
                    log::warn!("failed to index bookmark {}: {}", bmark.id, err);
                }
            }
            Err(err) => {
                log::warn!(
                    "failed to embed bookmark {}, it will be retried on reconcile: {}",
                    bmark.id,
                    err
                );
            }
        }

        Ok(())
    }

    fn persist_vectors(&self) {
        if let Err(err) = self.save_vectors() {
            log::error!("{:#}", err);
        }
    }

    fn write_index(&self) -> anyhow::Result<RwLockWriteGuard<'_, VectorIndex>> {
        self.index
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))
    }
}

fn load_vectors(vectors: &VectorStorage, model_id: &[u8; 32]) -> anyhow::Result<VectorIndex> {
    match vectors.load(model_id) {
        Ok(index) => {
            log::info!("loaded {} vectors from storage", index.len());
            Ok(index)
        }
        Err(VectorStorageError::ModelMismatch) => {
            log::warn!("embedding model changed, starting with a fresh vector index");
            Ok(VectorIndex::new())
        }
        Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
            log::warn!(
                "vector storage version {} unsupported, starting with a fresh vector index",
                file_ver
            );
            Ok(VectorIndex::new())
        }
        Err(err @ (VectorStorageError::ChecksumMismatch | VectorStorageError::InvalidFormat(_))) => {
            log::warn!("{err}, starting with a fresh vector index");
            Ok(VectorIndex::new())
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to load {}", vectors.path().display())),
    }
}
