use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::{Instant, SystemTime},
};

/// Splits a comma/space separated tag list into lowercase tags.
pub fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .flat_map(|value| value.split(' ').filter(|value| !value.is_empty()))
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
}

/// Splits a comma separated category list, keeping the original casing.
pub fn parse_categories(categories: &str) -> Vec<String> {
    categories
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: u64,
    pub owner: String,

    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub favicon_url: Option<String>,
    pub created_at: DateTime<Utc>,

    pub tags: Vec<String>,
    pub categories: Vec<String>,
}

impl Hash for Bookmark {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Bookmark {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bookmark {}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BookmarkCreate {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Defaults to now
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BookmarkUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

/// Owner-scoped access to bookmark records.
pub trait BookmarkStore: Send + Sync {
    /// Metadata for the requested ids; ids that don't exist or belong to
    /// another owner are absent from the map.
    fn get_by_ids(&self, ids: &[u64], owner: &str) -> anyhow::Result<HashMap<u64, Bookmark>>;
    fn list(&self, owner: &str) -> anyhow::Result<Vec<Bookmark>>;
    /// Every bookmark across owners, used for index maintenance.
    fn all(&self) -> anyhow::Result<Vec<Bookmark>>;
    /// Changes whenever the stored bookmarks change, whoever changed them.
    fn generation(&self) -> anyhow::Result<u64>;
    fn create(&self, owner: &str, create: BookmarkCreate) -> anyhow::Result<Bookmark>;
    fn update(&self, owner: &str, id: u64, update: BookmarkUpdate) -> anyhow::Result<Bookmark>;
    fn delete(&self, owner: &str, id: u64) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRecord {
    id: u64,
    owner: String,
    url: String,
    title: String,
    description: String,
    summary: String,
    favicon_url: String,
    created_at: DateTime<Utc>,
    tags: String,
    categories: String,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl From<CsvRecord> for Bookmark {
    fn from(record: CsvRecord) -> Self {
        Bookmark {
            id: record.id,
            owner: record.owner,
            url: record.url,
            title: non_empty(record.title),
            description: non_empty(record.description),
            summary: non_empty(record.summary),
            favicon_url: non_empty(record.favicon_url),
            created_at: record.created_at,
            tags: parse_tags(&record.tags),
            categories: parse_categories(&record.categories),
        }
    }
}

impl From<&Bookmark> for CsvRecord {
    fn from(bmark: &Bookmark) -> Self {
        CsvRecord {
            id: bmark.id,
            owner: bmark.owner.clone(),
            url: bmark.url.clone(),
            title: bmark.title.clone().unwrap_or_default(),
            description: bmark.description.clone().unwrap_or_default(),
            summary: bmark.summary.clone().unwrap_or_default(),
            favicon_url: bmark.favicon_url.clone().unwrap_or_default(),
            created_at: bmark.created_at,
            tags: bmark.tags.join(","),
            categories: bmark.categories.join(","),
        }
    }
}

fn validate_url(url: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(url.trim()).with_context(|| format!("invalid url {url:?}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        scheme => bail!("unsupported url scheme {scheme:?}"),
    }
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty() && !tag.contains(','))
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Resolves requested category names against the owner's existing ones so
/// that each name exists once per owner regardless of casing.
fn canonical_categories(bmarks: &[Bookmark], owner: &str, requested: Vec<String>) -> Vec<String> {
    let mut known: HashMap<String, String> = HashMap::new();
    for bmark in bmarks.iter().filter(|b| b.owner == owner) {
        for category in &bmark.categories {
            known
                .entry(category.to_lowercase())
                .or_insert_with(|| category.clone());
        }
    }

    let mut seen = HashSet::new();
    requested
        .into_iter()
        .map(|name| name.trim().replace(',', " "))
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let key = name.to_lowercase();
            if !seen.insert(key.clone()) {
                return None;
            }
            Some(known.get(&key).cloned().unwrap_or(name))
        })
        .collect()
}

/// Size and modification time of `bookmarks.csv` as last read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

fn file_stamp(path: &Path) -> anyhow::Result<Option<FileStamp>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(FileStamp {
            modified: meta.modified()?,
            len: meta.len(),
        })),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to stat {}", path.display())),
    }
}

#[derive(Debug)]
struct Snapshot {
    bmarks: Vec<Bookmark>,
    stamp: Option<FileStamp>,
}

/// Bookmarks kept in memory and mirrored to a CSV file.
///
/// Other processes (the CLI) write the same file, so every access first
/// compares the file's stamp with the one last seen and re-reads on change.
#[derive(Debug, Clone)]
pub struct BackendCsv {
    state: Arc<RwLock<Snapshot>>,
    generation: Arc<AtomicU64>,
    path: PathBuf,
}

impl BackendCsv {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mgr = BackendCsv {
            state: Arc::new(RwLock::new(Snapshot {
                bmarks: vec![],
                stamp: None,
            })),
            generation: Arc::new(AtomicU64::new(0)),
            path: path.to_path_buf(),
        };

        if file_stamp(path)?.is_none() {
            log::info!("Creating new database at {}", path.display());
            let mut state = mgr.write()?;
            mgr.save(&mut state)?;
        } else {
            mgr.refresh()?;
        }

        Ok(mgr)
    }

    /// Re-reads the file if it changed since it was last read or written.
    fn refresh(&self) -> anyhow::Result<()> {
        let current = file_stamp(&self.path)?;
        if self.lock_read()?.stamp == current {
            return Ok(());
        }

        let mut state = self.lock_write()?;
        if state.stamp == current {
            return Ok(());
        }

        state.bmarks = match current {
            Some(_) => read_csv(&self.path)?,
            None => vec![],
        };
        state.stamp = current;
        self.generation.fetch_add(1, Ordering::SeqCst);

        log::info!(
            "loaded {} bookmarks from {}",
            state.bmarks.len(),
            self.path.display()
        );
        Ok(())
    }

    fn lock_read(&self) -> anyhow::Result<RwLockReadGuard<'_, Snapshot>> {
        self.state
            .read()
            .map_err(|e| anyhow!("bookmark list lock poisoned: {e}"))
    }

    fn lock_write(&self) -> anyhow::Result<RwLockWriteGuard<'_, Snapshot>> {
        self.state
            .write()
            .map_err(|e| anyhow!("bookmark list lock poisoned: {e}"))
    }

    fn read(&self) -> anyhow::Result<RwLockReadGuard<'_, Snapshot>> {
        self.refresh()?;
        self.lock_read()
    }

    fn write(&self) -> anyhow::Result<RwLockWriteGuard<'_, Snapshot>> {
        self.refresh()?;
        self.lock_write()
    }

    fn save(&self, state: &mut Snapshot) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let temp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut csv_wrt = csv::Writer::from_writer(temp.as_file());
            if state.bmarks.is_empty() {
                csv_wrt.write_record([
                    "id",
                    "owner",
                    "url",
                    "title",
                    "description",
                    "summary",
                    "favicon_url",
                    "created_at",
                    "tags",
                    "categories",
                ])?;
            }
            for bmark in &state.bmarks {
                csv_wrt.serialize(CsvRecord::from(bmark))?;
            }
            csv_wrt.flush()?;
        }
        temp.persist(&self.path)?;

        state.stamp = file_stamp(&self.path)?;
        self.generation.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

fn read_csv(path: &Path) -> anyhow::Result<Vec<Bookmark>> {
    let now = Instant::now();
    let mut csv_reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut bmarks = vec![];
    for record in csv_reader.deserialize::<CsvRecord>() {
        bmarks.push(Bookmark::from(record?));
    }

    log::debug!(
        "took {}ms to read csv",
        now.elapsed().as_micros() as f64 / 1000.0
    );

    Ok(bmarks)
}

impl BookmarkStore for BackendCsv {
    fn get_by_ids(&self, ids: &[u64], owner: &str) -> anyhow::Result<HashMap<u64, Bookmark>> {
        let wanted: HashSet<u64> = ids.iter().copied().collect();
        let state = self.read()?;

        Ok(state
            .bmarks
            .iter()
            .filter(|b| b.owner == owner && wanted.contains(&b.id))
            .map(|b| (b.id, b.clone()))
            .collect())
    }

    fn list(&self, owner: &str) -> anyhow::Result<Vec<Bookmark>> {
        let state = self.read()?;
        Ok(state
            .bmarks
            .iter()
            .filter(|b| b.owner == owner)
            .cloned()
            .collect())
    }

    fn all(&self) -> anyhow::Result<Vec<Bookmark>> {
        Ok(self.read()?.bmarks.clone())
    }

    fn generation(&self) -> anyhow::Result<u64> {
        self.refresh()?;
        Ok(self.generation.load(Ordering::SeqCst))
    }

    fn create(&self, owner: &str, create: BookmarkCreate) -> anyhow::Result<Bookmark> {
        if owner.trim().is_empty() {
            bail!("owner must not be empty");
        }
        let url = validate_url(&create.url)?;

        let mut state = self.write()?;

        let id = state.bmarks.iter().map(|b| b.id + 1).max().unwrap_or(0);

        let bmark = Bookmark {
            id,
            owner: owner.to_string(),
            url,
            title: create.title.and_then(non_empty),
            description: create.description.and_then(non_empty),
            summary: create.summary.and_then(non_empty),
            favicon_url: create.favicon_url.and_then(non_empty),
            created_at: create.created_at.unwrap_or_else(Utc::now),
            tags: dedup_tags(create.tags),
            categories: canonical_categories(&state.bmarks, owner, create.categories),
        };

        state.bmarks.push(bmark.clone());
        self.save(&mut state)?;

        Ok(bmark)
    }

    fn update(&self, owner: &str, id: u64, update: BookmarkUpdate) -> anyhow::Result<Bookmark> {
        let url = update.url.as_deref().map(validate_url).transpose()?;

        let mut state = self.write()?;

        let categories = update
            .categories
            .map(|categories| canonical_categories(&state.bmarks, owner, categories));

        let bmark = state
            .bmarks
            .iter_mut()
            .find(|b| b.id == id && b.owner == owner)
            .ok_or_else(|| anyhow!("Bookmark with id {} not found", id))?;

        if let Some(url) = url {
            bmark.url = url;
        }
        if let Some(title) = update.title {
            bmark.title = non_empty(title);
        }
        if let Some(descr) = update.description {
            bmark.description = non_empty(descr);
        }
        if let Some(summary) = update.summary {
            bmark.summary = non_empty(summary);
        }
        if let Some(favicon_url) = update.favicon_url {
            bmark.favicon_url = non_empty(favicon_url);
        }
        if let Some(tags) = update.tags {
            bmark.tags = dedup_tags(tags);
        }
        if let Some(categories) = categories {
            bmark.categories = categories;
        }

        let result = bmark.clone();
        self.save(&mut state)?;

        Ok(result)
    }

    fn delete(&self, owner: &str, id: u64) -> anyhow::Result<()> {
        let mut state = self.write()?;
        let idx = state
            .bmarks
            .iter()
            .position(|b| b.id == id && b.owner == owner)
            .ok_or_else(|| anyhow!("Bookmark with id {} not found", id))?;

        state.bmarks.remove(idx);
        self.save(&mut state)?;

        Ok(())
    }
}
