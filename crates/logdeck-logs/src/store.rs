use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use logdeck_types::Entry;

use crate::parser::{LogParser, lookup_path};

/// Capacity added to the entry log each time it fills up
pub const GROWTH_INCREMENT: usize = 10_000;

/// Default number of most recent entries kept time-ordered
pub const DEFAULT_MAX_SORT: usize = 200;

/// Result of running a filter against one entry
#[derive(Clone, Debug, Default)]
pub enum Filtered {
    /// The filter never ran on this entry for this query
    #[default]
    Uncomputed,
    /// Kept, with the bytes the filter produced
    Kept(Arc<[u8]>),
    /// Explicitly filtered out
    Dropped,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("filtering entry {id}: {source}")]
    Filter {
        id: u64,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Per-query memo of filter results, keyed by entry id
#[derive(Default)]
struct FilterCache {
    by_query: HashMap<String, HashMap<u64, Filtered>>,
}

impl FilterCache {
    fn get(&self, query: &str, id: u64) -> Filtered {
        self.by_query
            .get(query)
            .and_then(|results| results.get(&id))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, query: &str, id: u64, result: Filtered) {
        if let Some(results) = self.by_query.get_mut(query) {
            results.insert(id, result);
            return;
        }
        let mut results = HashMap::with_capacity(1000);
        results.insert(id, result);
        self.by_query.insert(query.to_string(), results);
    }

    fn clear(&mut self) {
        self.by_query.clear();
    }
}

struct StoreInner {
    /// Entries in (approximate) time order
    entries: Vec<Entry>,

    /// Payloads by id, independent of sort position
    by_id: HashMap<u64, Arc<[u8]>>,

    /// Last assigned id
    last_id: u64,

    /// Number of most recent matches skipped when reading
    offset: usize,

    /// Read boundary while paused
    paused: Option<usize>,

    /// Field names seen so far, in discovery order
    known_fields: Vec<String>,
    known_set: HashSet<String>,

    /// First pid seen in a `pid` field
    pid: Option<i32>,
}

impl StoreInner {
    fn add_known_field(&mut self, field: &str) {
        if self.known_set.contains(field) {
            return;
        }
        self.known_set.insert(field.to_string());
        self.known_fields.push(field.to_string());
    }
}

/// Thread-safe append-only store for ingested entries
#[derive(Clone)]
pub struct EntryStore {
    /// Entries, window state and field index
    inner: Arc<RwLock<StoreInner>>,

    /// Filter results; locked only while holding `inner`
    cache: Arc<Mutex<FilterCache>>,

    /// Number of most recent entries kept sorted
    max_sort: usize,

    /// Default path used by lookup workflows
    lookup_key: Option<String>,
}

impl EntryStore {
    /// Create a store sorting at most `max_sort` recent entries. A window
    /// of 0 or 1 keeps insertion order.
    pub fn new(max_sort: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: Vec::with_capacity(GROWTH_INCREMENT),
                by_id: HashMap::with_capacity(GROWTH_INCREMENT),
                last_id: 0,
                offset: 0,
                paused: None,
                known_fields: Vec::new(),
                known_set: HashSet::new(),
                pid: None,
            })),
            cache: Arc::new(Mutex::new(FilterCache::default())),
            max_sort,
            lookup_key: None,
        }
    }

    /// Set the default lookup path
    pub fn with_lookup_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.lookup_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn lookup_key(&self) -> Option<&str> {
        self.lookup_key.as_deref()
    }

    /// Insert one line. Blank lines are ignored and get no id.
    pub fn insert(&self, raw: &[u8]) -> Option<u64> {
        let mut inner = self.inner.write();
        self.insert_locked(&mut inner, raw)
    }

    /// Insert a batch of lines under a single lock acquisition
    pub fn insert_batch<I, L>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut inner = self.inner.write();
        lines
            .into_iter()
            .filter_map(|line| self.insert_locked(&mut inner, line.as_ref()))
            .count()
    }

    fn insert_locked(&self, inner: &mut StoreInner, raw: &[u8]) -> Option<u64> {
        let raw = raw.trim_ascii();
        if raw.is_empty() {
            return None;
        }

        if inner.entries.len() == inner.entries.capacity() {
            inner.entries.reserve_exact(GROWTH_INCREMENT);
        }

        if inner.paused.is_none() {
            inner.offset = 0;
        }

        let fields = LogParser::parse(raw);
        let time = fields.as_ref().and_then(|f| f.time);
        if inner.pid.is_none() {
            inner.pid = fields.as_ref().and_then(|f| f.pid);
        }

        inner.last_id += 1;
        let entry = Entry::new(inner.last_id, time, raw);
        inner.by_id.insert(entry.id, Arc::clone(&entry.raw));
        inner.entries.push(entry);

        if time.is_some() && inner.entries.len() > 1 {
            let len = inner.entries.len();
            // the frozen prefix is never reordered while paused
            let window = len
                .saturating_sub(self.max_sort)
                .max(inner.paused.unwrap_or(0))
                .min(len);
            // untimed entries are barriers: only the timed run after the last one moves
            let start = inner.entries[window..]
                .iter()
                .rposition(|e| e.time.is_none())
                .map_or(window, |i| window + i + 1);
            inner.entries[start..].sort_by_key(|e| e.time);
        }

        if let Some(fields) = fields {
            for key in &fields.keys {
                inner.add_known_field(key);
            }
        }

        Some(inner.last_id)
    }

    /// Return the most recent `n` entries kept by `filter`, after skipping
    /// the `offset` most recent matches, oldest first.
    ///
    /// Results are memoized per `(query_key, entry id)`; a cached drop never
    /// re-runs the filter.
    pub fn filter_n<F, E>(&self, n: usize, query_key: &str, mut filter: F) -> Result<Vec<Entry>, StoreError>
    where
        F: FnMut(&Entry) -> Result<Option<Arc<[u8]>>, E>,
        E: StdError + Send + Sync + 'static,
    {
        let inner = self.inner.read();
        let visible = match inner.paused {
            Some(boundary) => &inner.entries[..boundary.min(inner.entries.len())],
            None => &inner.entries[..],
        };

        let want = n.saturating_add(inner.offset);
        let mut selected = Vec::with_capacity(want.min(visible.len()));

        for entry in visible.iter().rev() {
            if selected.len() >= want {
                break;
            }

            let cached = self.cache.lock().get(query_key, entry.id);
            let kept = match cached {
                Filtered::Dropped => continue,
                Filtered::Kept(bytes) => bytes,
                Filtered::Uncomputed => {
                    let result = filter(entry).map_err(|e| StoreError::Filter {
                        id: entry.id,
                        source: Box::new(e),
                    })?;
                    match result {
                        Some(bytes) => {
                            self.cache.lock().set(
                                query_key,
                                entry.id,
                                Filtered::Kept(Arc::clone(&bytes)),
                            );
                            bytes
                        }
                        None => {
                            self.cache.lock().set(query_key, entry.id, Filtered::Dropped);
                            continue;
                        }
                    }
                }
            };

            selected.push(Entry {
                id: entry.id,
                time: entry.time,
                raw: kept,
            });
        }

        selected.drain(..inner.offset.min(selected.len()));
        selected.reverse();

        Ok(selected)
    }

    /// Cached filter result for an entry
    pub fn cached(&self, query_key: &str, id: u64) -> Filtered {
        let _inner = self.inner.read();
        self.cache.lock().get(query_key, id)
    }

    /// JSON-encoded value at `key` inside entry `id`
    pub fn lookup_value(&self, id: u64, key: &str) -> Option<String> {
        let inner = self.inner.read();
        let raw = inner.by_id.get(&id)?;
        let doc: Value = serde_json::from_slice(raw).ok()?;
        let value = lookup_path(&doc, key)?;
        serde_json::to_string(value).ok()
    }

    /// Total entry count, including entries hidden by a pause
    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Drop every entry and every cached filter result.
    ///
    /// Known fields and the pid latch survive; the store resumes.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.by_id.clear();
        inner.paused = None;
        inner.offset = 0;
        self.cache.lock().clear();
    }

    pub fn add_known_fields<I, S>(&self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        for field in fields {
            inner.add_known_field(field.as_ref());
        }
    }

    /// Known field names starting with `prefix` (case insensitive)
    pub fn known_fields_match(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        self.inner
            .read()
            .known_fields
            .iter()
            .filter(|f| f.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn offset(&self) -> usize {
        self.inner.read().offset
    }

    /// Move the scroll offset, never below zero
    pub fn offset_add(&self, delta: isize) {
        let mut inner = self.inner.write();
        inner.offset = inner.offset.saturating_add_signed(delta);
    }

    pub fn offset_reset(&self) {
        self.inner.write().offset = 0;
    }

    /// Freeze reads at the current entry count (no-op when already paused)
    pub fn pause(&self) {
        let mut inner = self.inner.write();
        if inner.paused.is_none() {
            inner.paused = Some(inner.entries.len());
        }
    }

    pub fn resume(&self) {
        self.inner.write().paused = None;
    }

    pub fn toggle_paused(&self) {
        let mut inner = self.inner.write();
        inner.paused = match inner.paused {
            Some(_) => None,
            None => Some(inner.entries.len()),
        };
    }

    pub fn paused(&self) -> bool {
        self.inner.read().paused.is_some()
    }

    /// Pid of the monitored process, if an entry reported one
    pub fn pid(&self) -> Option<i32> {
        self.inner.read().pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    use chrono::{TimeZone, Utc};

    use crate::query::{QueryEngine, QueryError};

    fn keep_all(entry: &Entry) -> Result<Option<Arc<[u8]>>, Infallible> {
        Ok(Some(Arc::clone(&entry.raw)))
    }

    fn ids(entries: &[Entry]) -> Vec<u64> {
        entries.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_count_ignores_blank_lines() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        assert_eq!(store.insert(b"a"), Some(1));
        assert_eq!(store.insert(b"   "), None);
        assert_eq!(store.insert(b""), None);
        assert_eq!(store.insert_batch(["b", "", "c"]), 2);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn test_filter_n_identity_with_offset() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        for i in 1..=10 {
            store.insert(format!("line {}", i).as_bytes());
        }

        let last = store.filter_n(3, "", keep_all).unwrap();
        assert_eq!(ids(&last), vec![8, 9, 10]);

        store.offset_add(2);
        let scrolled = store.filter_n(3, "", keep_all).unwrap();
        assert_eq!(ids(&scrolled), vec![6, 7, 8]);

        store.offset_add(-5);
        assert_eq!(store.offset(), 0);

        store.offset_add(8);
        let near_start = store.filter_n(3, "", keep_all).unwrap();
        assert_eq!(ids(&near_start), vec![1, 2]);
    }

    #[test]
    fn test_insert_resets_offset_unless_paused() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(b"a");
        store.offset_add(1);
        store.insert(b"b");
        assert_eq!(store.offset(), 0);

        store.pause();
        store.offset_add(1);
        store.insert(b"c");
        assert_eq!(store.offset(), 1);
    }

    #[test]
    fn test_pause_freezes_visible_entries() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"time":"2024-01-01T00:00:01Z","msg":"a"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:02Z","msg":"b"}"#);

        store.pause();
        store.pause();
        store.insert(br#"{"time":"2024-01-01T00:00:00Z","msg":"older"}"#);
        store.insert(b"untimed");
        let frozen = store.filter_n(10, "", keep_all).unwrap();
        assert_eq!(ids(&frozen), vec![1, 2]);
        assert_eq!(store.count(), 4);

        store.resume();
        let live = store.filter_n(10, "", keep_all).unwrap();
        assert_eq!(live.len(), 4);

        store.toggle_paused();
        assert!(store.paused());
        store.toggle_paused();
        assert!(!store.paused());
    }

    #[test]
    fn test_cache_avoids_refiltering() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        for i in 0..6 {
            store.insert(format!(r#"{{"n":{}}}"#, i).as_bytes());
        }

        let calls = Cell::new(0);
        let even = |entry: &Entry| -> Result<Option<Arc<[u8]>>, Infallible> {
            calls.set(calls.get() + 1);
            let odd = entry.id % 2 == 0;
            Ok((!odd).then(|| Arc::clone(&entry.raw)))
        };

        let first = store.filter_n(10, "odd ids", even).unwrap();
        assert_eq!(ids(&first), vec![1, 3, 5]);
        assert_eq!(calls.get(), 6);

        let second = store.filter_n(10, "odd ids", even).unwrap();
        assert_eq!(ids(&second), vec![1, 3, 5]);
        assert_eq!(calls.get(), 6);

        assert!(matches!(store.cached("odd ids", 2), Filtered::Dropped));
        assert!(matches!(store.cached("odd ids", 3), Filtered::Kept(_)));
        assert!(matches!(store.cached("other", 3), Filtered::Uncomputed));

        // a different query key has its own results
        store.filter_n(10, "other", even).unwrap();
        assert_eq!(calls.get(), 12);
    }

    #[test]
    fn test_clear_drops_entries_and_cache() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"level":"info","pid":99}"#);
        store.insert(b"two");
        store.filter_n(10, "q", keep_all).unwrap();
        store.pause();

        store.clear();
        assert_eq!(store.count(), 0);
        assert!(!store.paused());
        assert!(matches!(store.cached("q", 1), Filtered::Uncomputed));
        assert!(store.filter_n(10, "q", keep_all).unwrap().is_empty());
        assert_eq!(store.known_fields_match("lev"), vec!["level".to_string()]);
        assert_eq!(store.pid(), Some(99));

        // ids keep counting after a clear
        assert_eq!(store.insert(b"three"), Some(3));
    }

    #[test]
    fn test_filter_error_fails_the_call() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(b"a");
        store.insert(b"b");

        let result = store.filter_n(10, "broken", |_: &Entry| {
            Err::<Option<Arc<[u8]>>, _>(QueryError::UnexpectedEnd("a value"))
        });
        assert!(matches!(result, Err(StoreError::Filter { id: 2, .. })));
    }

    #[test]
    fn test_time_field_round_trip() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"time":"2024-01-01T00:00:00Z"}"#);
        let entries = store.filter_n(1, "", keep_all).unwrap();
        assert_eq!(
            entries[0].time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_out_of_order_entries_are_sorted() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"time":"2024-01-01T00:00:03Z","msg":"c"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:01Z","msg":"a"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:02Z","msg":"b"}"#);

        let entries = store.filter_n(3, "", keep_all).unwrap();
        assert_eq!(ids(&entries), vec![2, 3, 1]);
    }

    #[test]
    fn test_untimed_entries_keep_their_position() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"time":"2024-01-01T00:00:05Z","msg":"a"}"#);
        store.insert(b"untimed");
        store.insert(br#"{"time":"2024-01-01T00:00:09Z","msg":"c"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:01Z","msg":"b"}"#);

        // "b" is older than "a" but cannot cross the untimed line
        let entries = store.filter_n(4, "", keep_all).unwrap();
        assert_eq!(ids(&entries), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_untimed_entry_does_not_stay_at_the_tail() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(b"panic: plain text line");
        for i in 0..300 {
            let line = format!(r#"{{"time":"2024-01-01T00:{:02}:{:02}Z","msg":"m{}"}}"#, i / 60, i % 60, i);
            store.insert(line.as_bytes());
        }

        let newest = store.filter_n(1, "", keep_all).unwrap();
        assert_eq!(ids(&newest), vec![301]);

        let all = store.filter_n(301, "", keep_all).unwrap();
        assert_eq!(all[0].id, 1);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_sort_is_bounded_to_window() {
        let store = EntryStore::new(2);
        store.insert(br#"{"time":"2024-01-01T00:00:05Z","msg":"a"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:06Z","msg":"b"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:07Z","msg":"c"}"#);
        // older than everything, but only the last two entries are sorted
        store.insert(br#"{"time":"2024-01-01T00:00:00Z","msg":"d"}"#);

        let entries = store.filter_n(4, "", keep_all).unwrap();
        assert_eq!(ids(&entries), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_window_of_one_keeps_insertion_order() {
        let store = EntryStore::new(1);
        store.insert(br#"{"time":"2024-01-01T00:00:05Z","msg":"a"}"#);
        store.insert(br#"{"time":"2024-01-01T00:00:01Z","msg":"b"}"#);

        let entries = store.filter_n(2, "", keep_all).unwrap();
        assert_eq!(ids(&entries), vec![1, 2]);
    }

    #[test]
    fn test_known_fields_and_lookup() {
        let store = EntryStore::new(DEFAULT_MAX_SORT).with_lookup_key("req.id");
        store.add_known_fields(["is", "raw"]);
        let id = store
            .insert(br#"{"Request":1,"req":{"id":"abc"},"level":"info"}"#)
            .unwrap();
        store.insert(b"not json");

        assert_eq!(store.known_fields_match("re"), vec!["raw", "Request", "req"]);
        assert_eq!(store.lookup_key(), Some("req.id"));
        assert_eq!(store.lookup_value(id, "req.id").as_deref(), Some("\"abc\""));
        assert_eq!(store.lookup_value(id, "req.missing"), None);
        assert_eq!(store.lookup_value(2, "req.id"), None);
        assert_eq!(store.lookup_value(42, "req.id"), None);
    }

    #[test]
    fn test_with_query_engine() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"level":"error","msg":"x"}"#);
        store.insert(br#"{"level":"info","msg":"y"}"#);

        let engine = QueryEngine::new();
        engine.set("level is error");
        let errors = store
            .filter_n(10, &engine.query(), |e| engine.execute(e))
            .unwrap();
        assert_eq!(ids(&errors), vec![1]);

        engine.set("");
        let all = store
            .filter_n(10, &engine.query(), |e| engine.execute(e))
            .unwrap();
        assert_eq!(ids(&all), vec![1, 2]);
    }

    #[test]
    fn test_pid_latch_keeps_first() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        assert_eq!(store.pid(), None);
        store.insert(br#"{"pid":"12"}"#);
        store.insert(br#"{"pid":13}"#);
        assert_eq!(store.pid(), Some(12));
    }

    #[test]
    fn test_pid_latch_skips_non_positive() {
        let store = EntryStore::new(DEFAULT_MAX_SORT);
        store.insert(br#"{"msg":"x","pid":-1}"#);
        store.insert(br#"{"msg":"y","pid":0}"#);
        assert_eq!(store.pid(), None);

        store.insert(br#"{"msg":"z","pid":77}"#);
        assert_eq!(store.pid(), Some(77));
    }
}
