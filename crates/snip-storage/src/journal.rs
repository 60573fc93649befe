use crate::allocation::{allocate, Allocation, Attempt};
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use snip_core::{
    LoadedUrl, Result, ShortCode, Shortened, Store, StoreError, UrlRecord, UserUrlEntry,
};
use snip_generator::{AlphanumericGenerator, Generator};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// One line of the journal file.
///
/// `short_url` holds the bare short code. `uuid` is reserved and written
/// empty. Every field except `short_url` defaults when missing, so a
/// tombstone line may carry only the code and `is_deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    #[serde(default)]
    pub uuid: String,
    pub short_url: String,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl From<&UrlRecord> for JournalLine {
    fn from(record: &UrlRecord) -> Self {
        Self {
            uuid: String::new(),
            short_url: record.code.to_string(),
            original_url: record.original_url.clone(),
            user_id: record.owner_id.clone(),
            is_deleted: record.is_deleted,
            created_at: Some(record.created_at),
            deleted_at: record.deleted_at,
        }
    }
}

/// The in-memory view rebuilt from the journal.
#[derive(Debug, Default)]
struct JournalIndex {
    records: HashMap<ShortCode, UrlRecord>,
    by_url: HashMap<String, ShortCode>,
}

impl JournalIndex {
    fn try_insert(&mut self, code: &ShortCode, url: &str, owner_id: &str) -> Attempt {
        if let Some(existing) = self.by_url.get(url) {
            return Attempt::UrlTaken(existing.clone());
        }
        if self.records.contains_key(code) {
            return Attempt::CodeTaken;
        }

        self.records
            .insert(code.clone(), UrlRecord::new(code.clone(), url, owner_id));
        self.by_url.insert(url.to_owned(), code.clone());
        Attempt::Inserted
    }

    fn remove(&mut self, code: &ShortCode) {
        if let Some(record) = self.records.remove(code) {
            self.by_url.remove(&record.original_url);
        }
    }

    /// Folds one replayed line into the index.
    ///
    /// Later lines win, except that a tombstone is never undone and a line
    /// without a URL keeps the one already known.
    fn apply(&mut self, code: ShortCode, line: JournalLine) {
        if let Some(record) = self.records.get_mut(&code) {
            if !line.original_url.is_empty() && line.original_url != record.original_url {
                self.by_url.remove(&record.original_url);
                record.original_url = line.original_url;
                self.by_url.insert(record.original_url.clone(), code.clone());
            }
            if !line.user_id.is_empty() {
                record.owner_id = line.user_id;
            }
            if let Some(created_at) = line.created_at {
                record.created_at = created_at;
            }
            if line.is_deleted {
                record.tombstone(line.deleted_at.unwrap_or_else(Timestamp::now));
            }
            return;
        }

        if line.original_url.is_empty() {
            warn!(code = %code, "Skipping journal line for unknown code without a URL");
            return;
        }

        let mut record = UrlRecord::new(code.clone(), line.original_url, line.user_id);
        if let Some(created_at) = line.created_at {
            record.created_at = created_at;
        }
        if line.is_deleted {
            record.tombstone(line.deleted_at.unwrap_or_else(Timestamp::now));
        }
        self.by_url.insert(record.original_url.clone(), code.clone());
        self.records.insert(code, record);
    }
}

/// Where journal bytes go. Implemented for [`File`]; tests wrap it to inject
/// I/O failures.
#[async_trait]
trait JournalSink: Send {
    /// Current length of the journal in bytes.
    async fn len(&mut self) -> io::Result<u64>;

    /// Writes `buf` and makes it durable.
    async fn append(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Cuts the journal back to `len` bytes.
    async fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Pushes buffered bytes to the OS.
    async fn flush_buffered(&mut self) -> io::Result<()>;
}

#[async_trait]
impl JournalSink for File {
    async fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf).await?;
        AsyncWriteExt::flush(self).await?;
        self.sync_data().await
    }

    async fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len).await?;
        self.sync_data().await
    }

    async fn flush_buffered(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(self).await
    }
}

/// Appends whole lines to the journal.
///
/// A failed append is cut back off the file, so neither a torn line nor a
/// line whose durability was never confirmed survives. If the cut itself
/// fails, the next append starts on a fresh line so the torn bytes stay an
/// isolated malformed line instead of swallowing a good one.
struct JournalWriter {
    path: PathBuf,
    sink: Box<dyn JournalSink>,
    torn_tail: bool,
}

impl JournalWriter {
    async fn append(&mut self, lines: &[JournalLine]) -> Result<()> {
        let mut buf = Vec::new();
        if self.torn_tail {
            buf.push(b'\n');
        }
        for line in lines {
            serde_json::to_writer(&mut buf, line)
                .map_err(|e| StoreError::Journal(format!("serialize record: {e}")))?;
            buf.push(b'\n');
        }

        let committed = self.sink.len().await.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to stat journal");
            StoreError::Journal(format!("stat {}: {e}", self.path.display()))
        })?;

        match self.sink.append(&buf).await {
            Ok(()) => {
                self.torn_tail = false;
                Ok(())
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to append to journal");
                if let Err(cut) = self.sink.truncate(committed).await {
                    error!(
                        path = %self.path.display(),
                        error = %cut,
                        committed,
                        "Failed to cut failed append off the journal"
                    );
                    self.torn_tail = true;
                }
                Err(StoreError::Journal(format!(
                    "append to {}: {e}",
                    self.path.display()
                )))
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.sink.flush_buffered().await.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to flush journal on close");
            StoreError::Journal(format!("flush {}: {e}", self.path.display()))
        })
    }
}

struct JournalState {
    index: JournalIndex,
    writer: JournalWriter,
}

/// A durable store backed by an append-only, newline-delimited JSON file.
///
/// Every mutation appends one line per affected record; the file is never
/// rewritten. Opening the store replays the whole file. Reads only consult
/// the in-memory index. A single lock covers both the index update and the
/// append, and the index only keeps a change once its line is durable.
pub struct JournalStore<G = AlphanumericGenerator> {
    state: Mutex<JournalState>,
    generator: G,
}

impl JournalStore<AlphanumericGenerator> {
    /// Opens (or creates) the journal at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_generator(path, AlphanumericGenerator::new()).await
    }
}

impl<G: Generator> JournalStore<G> {
    /// Opens the journal with a custom code generator.
    pub async fn open_with_generator(path: impl AsRef<Path>, generator: G) -> Result<Self> {
        Self::open_with_sink(path.as_ref(), generator, |file| {
            Box::new(file) as Box<dyn JournalSink>
        })
        .await
    }

    async fn open_with_sink<F>(path: &Path, generator: G, wrap: F) -> Result<Self>
    where
        F: FnOnce(File) -> Box<dyn JournalSink>,
    {
        let path = path.to_path_buf();
        let Replayed { index, torn_tail } = replay(&path).await?;

        info!(
            path = %path.display(),
            records = index.records.len(),
            torn_tail,
            "Replayed URL journal"
        );

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to open journal for append");
            StoreError::Journal(format!("open {}: {e}", path.display()))
        })?;

        let writer = JournalWriter {
            path,
            sink: wrap(file),
            torn_tail,
        };
        Ok(Self {
            state: Mutex::new(JournalState { index, writer }),
            generator,
        })
    }
}

struct Replayed {
    index: JournalIndex,
    /// The file ends in a partial line left by an interrupted append.
    torn_tail: bool,
}

async fn replay(path: &Path) -> Result<Replayed> {
    let mut index = JournalIndex::default();
    let mut torn_tail = false;

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Replayed { index, torn_tail })
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to open journal");
            return Err(StoreError::Journal(format!("open {}: {e}", path.display())));
        }
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to read journal");
            StoreError::Journal(format!("read {}: {e}", path.display()))
        })?;
        if read == 0 {
            break;
        }
        line_no += 1;
        torn_tail = buf.last() != Some(&b'\n');

        let raw = buf.trim_ascii();
        if raw.is_empty() {
            continue;
        }

        let line: JournalLine = match serde_json::from_slice(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed journal line");
                continue;
            }
        };
        let code = match ShortCode::new(&line.short_url) {
            Ok(code) => code,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping journal line with invalid code");
                continue;
            }
        };

        index.apply(code, line);
    }

    Ok(Replayed { index, torn_tail })
}

#[async_trait]
impl<G: Generator> Store for JournalStore<G> {
    async fn save(&self, owner_id: &str, url: &str, base_url: &str) -> Result<Shortened> {
        let mut state = self.state.lock().await;
        let JournalState { index, writer } = &mut *state;

        let allocation = allocate(&self.generator, url, |code| {
            Ok(index.try_insert(code, url, owner_id))
        })?;

        if let Allocation::Created(code) = &allocation {
            let line = index.records.get(code).map(JournalLine::from);
            if let Some(line) = line {
                if let Err(e) = writer.append(&[line]).await {
                    index.remove(code);
                    return Err(e);
                }
            }
        }

        Ok(allocation.into_shortened(base_url))
    }

    async fn save_batch(
        &self,
        owner_id: &str,
        urls: &[String],
        base_url: &str,
    ) -> Result<Vec<Shortened>> {
        let mut state = self.state.lock().await;
        let JournalState { index, writer } = &mut *state;

        let mut created = Vec::new();
        let mut allocations = Vec::with_capacity(urls.len());

        for url in urls {
            match allocate(&self.generator, url, |code| {
                Ok(index.try_insert(code, url, owner_id))
            }) {
                Ok(allocation) => {
                    if let Allocation::Created(code) = &allocation {
                        created.push(code.clone());
                    }
                    allocations.push(allocation);
                }
                Err(e) => {
                    warn!(error = %e, rolled_back = created.len(), "Batch save failed, rolling back");
                    created.iter().for_each(|code| index.remove(code));
                    return Err(e);
                }
            }
        }

        let lines: Vec<JournalLine> = created
            .iter()
            .filter_map(|code| index.records.get(code).map(JournalLine::from))
            .collect();
        if !lines.is_empty() {
            if let Err(e) = writer.append(&lines).await {
                created.iter().for_each(|code| index.remove(code));
                return Err(e);
            }
        }

        Ok(allocations
            .into_iter()
            .map(|allocation| allocation.into_shortened(base_url))
            .collect())
    }

    async fn load_full(&self, code: &ShortCode) -> Result<LoadedUrl> {
        let state = self.state.lock().await;
        let Some(record) = state.index.records.get(code) else {
            return Err(StoreError::NotFound(code.to_string()));
        };

        Ok(LoadedUrl {
            original_url: record.original_url.clone(),
            is_deleted: record.is_deleted,
        })
    }

    async fn load_user_urls(&self, owner_id: &str, base_url: &str) -> Result<Vec<UserUrlEntry>> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.lock().await;
        let mut owned: Vec<&UrlRecord> = state
            .index
            .records
            .values()
            .filter(|record| record.is_owned_by(owner_id) && !record.is_deleted)
            .collect();
        owned.sort_by(|a, b| (a.created_at, &a.code).cmp(&(b.created_at, &b.code)));

        Ok(owned
            .into_iter()
            .map(|record| record.to_user_entry(base_url))
            .collect())
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        if owner_id.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let JournalState { index, writer } = &mut *state;
        let now = Timestamp::now();

        // Tombstones are staged on copies and applied only once they are on disk.
        let mut staged = Vec::new();
        for code in codes {
            let Some(record) = index.records.get(code) else {
                continue;
            };
            if !record.is_owned_by(owner_id) {
                debug!(code = %code, "Skipping delete of code owned by another user");
                continue;
            }
            if staged.iter().any(|r: &UrlRecord| &r.code == code) {
                continue;
            }
            let mut record = record.clone();
            if record.tombstone(now) {
                staged.push(record);
            }
        }

        if staged.is_empty() {
            return Ok(0);
        }

        let lines: Vec<JournalLine> = staged.iter().map(JournalLine::from).collect();
        writer.append(&lines).await?;

        let deleted = staged.len() as u64;
        for record in staged {
            index.records.insert(record.code.clone(), record);
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.writer.flush().await
    }

    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }
}
