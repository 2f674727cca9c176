use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::remote::{Criteria, FieldPatch, Record, RecordPage, RemoteError, RemoteStore};

/// Error type for loading/saving a store file
#[derive(Debug, thiserror::Error)]
pub enum StoreFileError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse store file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not serialize store: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Remote store operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Query,
    Count,
    Update,
    BulkUpdate,
    Create,
}

#[derive(Debug, Default)]
struct StoreState {
    sources: BTreeMap<String, Vec<Record>>,
    next_id: u64,
    failures: HashMap<StoreOp, VecDeque<RemoteError>>,
    calls: HashMap<StoreOp, usize>,
}

/// In-process [`RemoteStore`] over JSON records.
///
/// Backs the CLI (loaded from and saved to `board/store.json`) and the
/// tests, which use its failure injection and per-operation gates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    gates: Mutex<HashMap<StoreOp, Arc<Semaphore>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a JSON object of `source → [records]`.
    pub fn load(path: &Path) -> Result<Self, StoreFileError> {
        let text = fs::read_to_string(path).map_err(|e| StoreFileError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let sources: BTreeMap<String, Vec<Record>> =
            serde_json::from_str(&text).map_err(|e| StoreFileError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        let next_id = sources.values().map(|r| r.len() as u64).sum();
        Ok(MemoryStore {
            state: Mutex::new(StoreState {
                sources,
                next_id,
                ..Default::default()
            }),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Replace every source with the contents of `path`, keeping injected
    /// failures, gates and call counts.
    pub fn reload(&self, path: &Path) -> Result<(), StoreFileError> {
        let loaded = MemoryStore::load(path)?;
        let fresh = loaded.lock();
        let mut state = self.lock();
        state.sources = fresh.sources.clone();
        state.next_id = state.next_id.max(fresh.next_id);
        Ok(())
    }

    /// Write every source back out atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreFileError> {
        let content = {
            let state = self.lock();
            serde_json::to_string_pretty(&state.sources)?
        };
        super::atomic_write(path, content.as_bytes())?;
        Ok(())
    }

    /// Append records (JSON objects) to a source. Non-objects are ignored.
    pub fn seed(&self, source: &str, records: impl IntoIterator<Item = Value>) {
        let mut state = self.lock();
        let rows = state.sources.entry(source.to_string()).or_default();
        rows.extend(records.into_iter().filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    /// Current contents of a source.
    pub fn records(&self, source: &str) -> Vec<Record> {
        self.lock().sources.get(source).cloned().unwrap_or_default()
    }

    pub fn record(&self, source: &str, id: &str) -> Option<Record> {
        self.lock()
            .sources
            .get(source)
            .and_then(|rows| rows.iter().find(|r| record_id(r) == Some(id)).cloned())
    }

    /// Make the next call of `op` fail with `err`. Queued failures are used
    /// in order.
    pub fn fail_next(&self, op: StoreOp, err: RemoteError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Hold every call of `op` until a permit is added to the returned
    /// semaphore; each call consumes one permit. Used to observe state while
    /// a request is in flight.
    pub fn hold(&self, op: StoreOp) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        if let Ok(mut gates) = self.gates.lock() {
            gates.insert(op, sem.clone());
        }
        sem
    }

    /// Stop holding calls of `op`.
    pub fn release(&self, op: StoreOp) {
        if let Ok(mut gates) = self.gates.lock() {
            gates.remove(&op);
        }
    }

    async fn pass_gate(&self, op: StoreOp) -> Result<(), RemoteError> {
        let gate = self.gates.lock().ok().and_then(|g| g.get(&op).cloned());
        if let Some(sem) = gate {
            sem.acquire()
                .await
                .map_err(|_| RemoteError::new("UNAVAILABLE", "store gate closed"))?
                .forget();
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock only means another test thread panicked mid-call;
        // the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call and pop an injected failure, if any.
    fn enter(&self, op: StoreOp) -> Result<(), RemoteError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        match state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn apply_patch(record: &mut Record, patch: &FieldPatch) {
    for (k, v) in patch {
        record.insert(k.clone(), v.clone());
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query_records(
        &self,
        source: &str,
        criteria: &Criteria,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        self.pass_gate(StoreOp::Query).await?;
        self.enter(StoreOp::Query)?;
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| RemoteError::new("BAD_CURSOR", format!("invalid cursor {}", c)))?,
            None => 0,
        };
        let page_size = page_size.max(1);
        let state = self.lock();
        let matching: Vec<&Record> = state
            .sources
            .get(source)
            .map(|rows| rows.iter().filter(|r| criteria.matches(r)).collect())
            .unwrap_or_default();
        let records: Vec<Record> = matching
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|r| (*r).clone())
            .collect();
        let end = offset + records.len();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(RecordPage {
            records,
            next_cursor,
        })
    }

    async fn query_record_count(
        &self,
        source: &str,
        criteria: &Criteria,
    ) -> Result<u64, RemoteError> {
        self.pass_gate(StoreOp::Count).await?;
        self.enter(StoreOp::Count)?;
        let state = self.lock();
        Ok(state
            .sources
            .get(source)
            .map_or(0, |rows| rows.iter().filter(|r| criteria.matches(r)).count()) as u64)
    }

    async fn update_record(
        &self,
        source: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError> {
        self.pass_gate(StoreOp::Update).await?;
        self.enter(StoreOp::Update)?;
        let mut state = self.lock();
        let record = state
            .sources
            .get_mut(source)
            .and_then(|rows| rows.iter_mut().find(|r| record_id(r) == Some(id)))
            .ok_or_else(|| RemoteError::not_found(source, id))?;
        apply_patch(record, patch);
        Ok(())
    }

    async fn update_records_bulk(
        &self,
        source: &str,
        criteria: &Criteria,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError> {
        self.pass_gate(StoreOp::BulkUpdate).await?;
        self.enter(StoreOp::BulkUpdate)?;
        let mut state = self.lock();
        if let Some(rows) = state.sources.get_mut(source) {
            for record in rows.iter_mut().filter(|r| criteria.matches(r)) {
                apply_patch(record, patch);
            }
        }
        Ok(())
    }

    async fn create_record(&self, source: &str, patch: &FieldPatch) -> Result<String, RemoteError> {
        self.enter(StoreOp::Create)?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("{}-{}", source, state.next_id);
        let mut record = patch.clone();
        record.insert("id".to_string(), Value::String(id.clone()));
        state
            .sources
            .entry(source.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }
}

/// A [`MemoryStore`] that re-reads its file before every count query.
///
/// An alert cycle starts with a count, so a poller driven through this store
/// sees alerts other processes wrote since the last cycle. Writes go to
/// memory only.
#[derive(Debug)]
pub struct FileTailStore {
    store: Arc<MemoryStore>,
    path: PathBuf,
}

impl FileTailStore {
    pub fn new(store: Arc<MemoryStore>, path: impl Into<PathBuf>) -> Self {
        FileTailStore {
            store,
            path: path.into(),
        }
    }

    fn refresh(&self) -> Result<(), RemoteError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.store
            .reload(&self.path)
            .map_err(|e| RemoteError::new("STORE_FILE", e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for FileTailStore {
    async fn query_records(
        &self,
        source: &str,
        criteria: &Criteria,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        self.store
            .query_records(source, criteria, page_size, cursor)
            .await
    }

    async fn query_record_count(
        &self,
        source: &str,
        criteria: &Criteria,
    ) -> Result<u64, RemoteError> {
        self.refresh()?;
        self.store.query_record_count(source, criteria).await
    }

    async fn update_record(
        &self,
        source: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError> {
        self.store.update_record(source, id, patch).await
    }

    async fn update_records_bulk(
        &self,
        source: &str,
        criteria: &Criteria,
        patch: &FieldPatch,
    ) -> Result<(), RemoteError> {
        self.store.update_records_bulk(source, criteria, patch).await
    }

    async fn create_record(&self, source: &str, patch: &FieldPatch) -> Result<String, RemoteError> {
        self.store.create_record(source, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::remote::patch_of;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_with_alerts(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "alerts",
            (0..n).map(|i| json!({"id": format!("a{}", i), "recipient_id": "u1", "is_read": false})),
        );
        store
    }

    #[tokio::test]
    async fn query_pages_with_cursor() {
        let store = store_with_alerts(5);
        let page1 = store
            .query_records("alerts", &Criteria::all(), 2, None)
            .await
            .unwrap();
        assert_eq!(page1.records.len(), 2);
        assert_eq!(page1.next_cursor.as_deref(), Some("2"));

        let page3 = store
            .query_records("alerts", &Criteria::all(), 2, Some("4"))
            .await
            .unwrap();
        assert_eq!(page3.records.len(), 1);
        assert!(page3.next_cursor.is_none());
    }

    #[tokio::test]
    async fn count_and_bulk_update() {
        let store = store_with_alerts(3);
        let unread = Criteria::all().eq("recipient_id", "u1").eq("is_read", false);
        assert_eq!(store.query_record_count("alerts", &unread).await.unwrap(), 3);
        store
            .update_records_bulk("alerts", &unread, &patch_of("is_read", true))
            .await
            .unwrap();
        assert_eq!(store.query_record_count("alerts", &unread).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_missing_record_fails() {
        let store = store_with_alerts(1);
        let err = store
            .update_record("alerts", "zzz", &patch_of("is_read", true))
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn injected_failure_is_used_once() {
        let store = store_with_alerts(1);
        store.fail_next(StoreOp::Count, RemoteError::new("TIMEOUT", "slow"));
        assert!(store.query_record_count("alerts", &Criteria::all()).await.is_err());
        assert_eq!(store.query_record_count("alerts", &Criteria::all()).await.unwrap(), 1);
        assert_eq!(store.calls(StoreOp::Count), 2);
    }

    #[tokio::test]
    async fn create_assigns_id() {
        let store = MemoryStore::new();
        let id = store
            .create_record("activity", &patch_of("field", "stage_id"))
            .await
            .unwrap();
        let rec = store.record("activity", &id).unwrap();
        assert_eq!(rec.get("field"), Some(&json!("stage_id")));
    }

    #[tokio::test]
    async fn held_update_waits_for_permit() {
        let store = Arc::new(store_with_alerts(1));
        let gate = store.hold(StoreOp::Update);
        let s = store.clone();
        let task = tokio::spawn(async move {
            s.update_record("alerts", "a0", &patch_of("is_read", true)).await
        });
        tokio::task::yield_now().await;
        assert_eq!(store.record("alerts", "a0").unwrap()["is_read"], json!(false));
        gate.add_permits(1);
        task.await.unwrap().unwrap();
        assert_eq!(store.record("alerts", "a0").unwrap()["is_read"], json!(true));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = store_with_alerts(2);
        store.save(&path).unwrap();
        let loaded = MemoryStore::load(&path).unwrap();
        assert_eq!(loaded.records("alerts").len(), 2);
    }

    #[test]
    fn reload_picks_up_external_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = store_with_alerts(1);
        store.save(&path).unwrap();
        let other = MemoryStore::load(&path).unwrap();
        other.seed("alerts", [json!({"id": "a9", "recipient_id": "u1", "is_read": false})]);
        other.save(&path).unwrap();
        store.reload(&path).unwrap();
        assert_eq!(store.records("alerts").len(), 2);
    }

    #[tokio::test]
    async fn file_tail_store_counts_what_the_file_holds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(store_with_alerts(1));
        store.save(&path).unwrap();
        let tail = FileTailStore::new(store.clone(), &path);
        let unread = Criteria::all().eq("is_read", false);
        assert_eq!(tail.query_record_count("alerts", &unread).await.unwrap(), 1);

        let other = MemoryStore::load(&path).unwrap();
        other.seed("alerts", [json!({"id": "a9", "recipient_id": "u1", "is_read": false})]);
        other.save(&path).unwrap();
        assert_eq!(tail.query_record_count("alerts", &unread).await.unwrap(), 2);
        assert_eq!(store.records("alerts").len(), 2);

        fs::write(&path, "not json").unwrap();
        let err = tail.query_record_count("alerts", &unread).await.unwrap_err();
        assert_eq!(err.code, "STORE_FILE");
    }

    #[test]
    fn load_malformed_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json {{{").unwrap();
        assert!(matches!(
            MemoryStore::load(&path),
            Err(StoreFileError::ParseError { .. })
        ));
    }
}
