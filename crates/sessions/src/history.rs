//! Append-only conversation history.
//!
//! Each assistant gets a `<assistantId>.jsonl` file under `history/`, one
//! [`StoredTurn`] per line. Reads go through an in-memory cache that is
//! populated on first load and kept in step with every write. File I/O in
//! the async API runs on `spawn_blocking`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use va_domain::error::{Error, Result};
use va_domain::history::StoredTurn;
use va_domain::trace::TraceEvent;

#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<StoredTurn>>>,
    /// Serializes writers so disk and cache change together.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// Open the store at `state_path/history`, creating the directory.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("history");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                cache: RwLock::new(HashMap::new()),
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// All turns for an assistant, oldest first. Unknown ids yield an
    /// empty history.
    pub async fn get(&self, assistant_id: &str) -> Result<Vec<StoredTurn>> {
        if let Some(turns) = self.inner.cache.read().get(assistant_id) {
            return Ok(turns.clone());
        }
        let inner = Arc::clone(&self.inner);
        let id = assistant_id.to_owned();
        run_blocking(move || inner.load(&id)).await
    }

    /// Append one turn.
    pub async fn append(&self, assistant_id: &str, turn: StoredTurn) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let id = assistant_id.to_owned();
        run_blocking(move || inner.append(&id, turn)).await?;

        TraceEvent::HistoryAppend {
            assistant_id: assistant_id.to_owned(),
            turns: 1,
        }
        .emit();
        Ok(())
    }

    /// Append one turn if `still_wanted` holds. The check runs under the
    /// same lock as [`delete_all`](Self::delete_all), so a turn cannot land
    /// after the history of a deleted owner was removed. Returns whether
    /// the turn was written.
    pub async fn append_if<F>(&self, assistant_id: &str, turn: StoredTurn, still_wanted: F) -> Result<bool>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let id = assistant_id.to_owned();
        let written = run_blocking(move || {
            let _guard = inner.write_lock.lock();
            if !still_wanted() {
                return Ok(false);
            }
            inner.append_locked(&id, turn).map(|()| true)
        })
        .await?;

        if written {
            TraceEvent::HistoryAppend {
                assistant_id: assistant_id.to_owned(),
                turns: 1,
            }
            .emit();
        }
        Ok(written)
    }

    /// Remove every turn. Returns how many were removed.
    pub async fn delete_all(&self, assistant_id: &str) -> Result<usize> {
        let inner = Arc::clone(&self.inner);
        let id = assistant_id.to_owned();
        let removed = run_blocking(move || inner.delete_all(&id)).await?;

        TraceEvent::HistoryReset {
            assistant_id: assistant_id.to_owned(),
            removed,
        }
        .emit();
        Ok(removed)
    }

    /// Replace the whole history with a single turn, without a window in
    /// which a reader could observe the empty history.
    pub async fn replace_all(&self, assistant_id: &str, turn: StoredTurn) -> Result<usize> {
        let inner = Arc::clone(&self.inner);
        let id = assistant_id.to_owned();
        let removed = run_blocking(move || inner.replace_all(&id, turn)).await?;

        TraceEvent::HistoryReset {
            assistant_id: assistant_id.to_owned(),
            removed,
        }
        .emit();
        Ok(removed)
    }
}

impl Inner {
    fn path(&self, assistant_id: &str) -> PathBuf {
        self.dir.join(format!("{assistant_id}.jsonl"))
    }

    fn load(&self, assistant_id: &str) -> Result<Vec<StoredTurn>> {
        let _guard = self.write_lock.lock();
        self.load_locked(assistant_id)
    }

    /// Caller holds `write_lock`.
    fn load_locked(&self, assistant_id: &str) -> Result<Vec<StoredTurn>> {
        if let Some(turns) = self.cache.read().get(assistant_id) {
            return Ok(turns.clone());
        }
        let turns = read_jsonl_file(&self.path(assistant_id), assistant_id)?;
        self.cache
            .write()
            .insert(assistant_id.to_owned(), turns.clone());
        Ok(turns)
    }

    fn append(&self, assistant_id: &str, turn: StoredTurn) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.append_locked(assistant_id, turn)
    }

    /// Caller holds `write_lock`.
    fn append_locked(&self, assistant_id: &str, turn: StoredTurn) -> Result<()> {
        // Load first so the cache entry is complete before it is extended.
        self.load_locked(assistant_id)?;

        let mut line = serde_json::to_string(&turn)
            .map_err(|e| Error::Storage(format!("serializing turn: {e}")))?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(assistant_id))?;
        file.write_all(line.as_bytes())?;

        // Disk first: the cache only moves once the write succeeded.
        self.cache
            .write()
            .entry(assistant_id.to_owned())
            .or_default()
            .push(turn);
        Ok(())
    }

    fn delete_all(&self, assistant_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock();
        self.delete_all_locked(assistant_id)
    }

    fn delete_all_locked(&self, assistant_id: &str) -> Result<usize> {
        let removed = self.load_locked(assistant_id)?.len();
        match std::fs::remove_file(self.path(assistant_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        self.cache
            .write()
            .insert(assistant_id.to_owned(), Vec::new());
        Ok(removed)
    }

    fn replace_all(&self, assistant_id: &str, turn: StoredTurn) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let removed = self.load_locked(assistant_id)?.len();

        let mut line = serde_json::to_string(&turn)
            .map_err(|e| Error::Storage(format!("serializing turn: {e}")))?;
        line.push('\n');

        let path = self.path(assistant_id);
        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, line)?;
        std::fs::rename(&tmp, &path)?;

        self.cache
            .write()
            .insert(assistant_id.to_owned(), vec![turn]);
        Ok(removed)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

/// Read and parse a JSONL history file. A missing file is an empty history.
fn read_jsonl_file(path: &Path, assistant_id: &str) -> Result<Vec<StoredTurn>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let mut turns = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredTurn>(line) {
            Ok(turn) => turns.push(turn),
            Err(e) => {
                tracing::warn!(
                    assistant_id = assistant_id,
                    error = %e,
                    "skipping malformed history line"
                );
            }
        }
    }
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_domain::history::{FinishReason, TokenUsage, TurnInput, TurnOutput};

    fn turn(user: &str, reply: &str) -> StoredTurn {
        StoredTurn::new(
            TurnInput {
                prompt: String::new(),
                user_text: user.into(),
            },
            TurnOutput {
                finish_reason: FinishReason::Stop,
                content: reply.into(),
            },
            TokenUsage::new(3, 4),
        )
    }

    #[tokio::test]
    async fn unknown_assistant_has_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        assert!(store.get("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_keep_order_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::new(dir.path()).unwrap();
            store.append("a1", turn("one", "1")).await.unwrap();
            store.append("a1", turn("two", "2")).await.unwrap();
            let turns = store.get("a1").await.unwrap();
            assert_eq!(turns.len(), 2);
            assert_eq!(turns[0].input.user_text, "one");
        }

        let reopened = HistoryStore::new(dir.path()).unwrap();
        let turns = reopened.get("a1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].output.content, "2");
        assert_eq!(turns[1].usage.total_tokens, 7);
    }

    #[tokio::test]
    async fn append_before_first_read_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = HistoryStore::new(dir.path()).unwrap();
            store.append("a1", turn("old", "x")).await.unwrap();
        }

        // A fresh store has a cold cache; appending must not hide the
        // line already on disk.
        let store = HistoryStore::new(dir.path()).unwrap();
        store.append("a1", turn("new", "y")).await.unwrap();
        let turns = store.get("a1").await.unwrap();
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        store.append("a1", turn("ok", "ok")).await.unwrap();

        let path = dir.path().join("history").join("a1.jsonl");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json}\n").unwrap();

        let reopened = HistoryStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get("a1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_all_reports_removed_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        store.append("a1", turn("1", "1")).await.unwrap();
        store.append("a1", turn("2", "2")).await.unwrap();

        assert_eq!(store.delete_all("a1").await.unwrap(), 2);
        assert!(store.get("a1").await.unwrap().is_empty());
        assert!(!dir.path().join("history").join("a1.jsonl").exists());
        assert_eq!(store.delete_all("a1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_all_leaves_exactly_one_turn() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();
        for i in 0..5 {
            store.append("a1", turn(&i.to_string(), "r")).await.unwrap();
        }

        let removed = store
            .replace_all("a1", StoredTurn::greeting("p", "welcome"))
            .await
            .unwrap();
        assert_eq!(removed, 5);

        let turns = store.get("a1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].output.content, "welcome");

        let reopened = HistoryStore::new(dir.path()).unwrap();
        assert_eq!(reopened.get("a1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refused_append_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path()).unwrap();

        let written = store.append_if("a1", turn("q", "a"), || false).await.unwrap();
        assert!(!written);
        assert!(!dir.path().join("history").join("a1.jsonl").exists());

        assert!(store.append_if("a1", turn("q", "a"), || true).await.unwrap());
        assert_eq!(store.get("a1").await.unwrap().len(), 1);
    }
}
