use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::fact::Scalar;

/// Channel used for change notifications: the replicator subscribes once at
/// construction and publishes one notice per fact written during push.
pub const NEW_BATCH_CHANNEL: &str = "newbatch";

/// One raw row from a prefix listing. `path` is the full key the row was
/// stored under; for the server store that includes the leading batch number
/// and the trailing write hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFact {
    pub path: Vec<String>,
    pub value: Scalar,
    pub is_reference: bool,
}

/// Opaque continuation for a listing in progress. Pages must be fetched
/// strictly in sequence; the cursor depends on store-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor(pub u64);

/// One page of a prefix listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// True on the final page; `cursor` is absent once set.
    pub done: bool,
    pub chunk: Vec<RawFact>,
    pub cursor: Option<ListCursor>,
}

impl ListPage {
    pub fn finished(chunk: Vec<RawFact>) -> Self {
        Self {
            done: true,
            chunk,
            cursor: None,
        }
    }

    pub fn partial(chunk: Vec<RawFact>, cursor: ListCursor) -> Self {
        Self {
            done: false,
            chunk,
            cursor: Some(cursor),
        }
    }

    /// The "no data" probe: a final page with an empty chunk.
    pub fn is_empty_listing(&self) -> bool {
        self.done && self.chunk.is_empty()
    }
}

/// Notification broadcast for every fact written during a push. Carries the
/// fact itself so subscribers can react without a server read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub batch: u64,
    pub path: Vec<String>,
    pub value: Scalar,
    pub is_reference: bool,
}

/// The fast local cache. Its contents are fully owned by the replicator;
/// application code must not write to it directly.
pub trait LocalStore: Send + Sync {
    fn set(
        &self,
        path: &[String],
        value: Scalar,
        is_reference: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list(&self, prefix: &[String]) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    fn next_page(
        &self,
        cursor: ListCursor,
    ) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    /// Wipe all local state.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The authoritative remote store: an append-only, batch-numbered log plus
/// a publish/subscribe channel for change notification.
pub trait ServerStore: Send + Sync {
    fn set(
        &self,
        path: &[String],
        value: Scalar,
        is_reference: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// `list(&[])` lists full history; `list(&[batch])` lists one batch.
    fn list(&self, prefix: &[String]) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    fn next_page(
        &self,
        cursor: ListCursor,
    ) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    fn publish(
        &self,
        channel: &str,
        notice: ChangeNotice,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChangeNotice>;
}

// In-memory implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    const DEFAULT_PAGE_SIZE: usize = 32;
    const BROADCAST_CAPACITY: usize = 256;

    /// Sorted key/value rows with cursor-based pagination, shared by both
    /// memory stores.
    struct PagedRows {
        rows: Mutex<BTreeMap<Vec<String>, (Scalar, bool)>>,
        page_size: usize,
        pending: Mutex<HashMap<u64, Vec<RawFact>>>,
        next_cursor: AtomicU64,
    }

    impl PagedRows {
        fn new(page_size: usize) -> Self {
            Self {
                rows: Mutex::new(BTreeMap::new()),
                page_size,
                pending: Mutex::new(HashMap::new()),
                next_cursor: AtomicU64::new(0),
            }
        }

        fn set(&self, path: &[String], value: Scalar, is_reference: bool) {
            self.rows
                .lock()
                .unwrap()
                .insert(path.to_vec(), (value, is_reference));
        }

        fn list(&self, prefix: &[String]) -> ListPage {
            let snapshot: Vec<RawFact> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(path, _)| path.starts_with(prefix))
                .map(|(path, (value, is_reference))| RawFact {
                    path: path.clone(),
                    value: value.clone(),
                    is_reference: *is_reference,
                })
                .collect();
            self.page(snapshot)
        }

        fn next_page(&self, cursor: ListCursor) -> Result<ListPage, StoreError> {
            let remaining = self
                .pending
                .lock()
                .unwrap()
                .remove(&cursor.0)
                .ok_or(StoreError::UnknownCursor(cursor.0))?;
            Ok(self.page(remaining))
        }

        fn page(&self, mut remaining: Vec<RawFact>) -> ListPage {
            if remaining.len() <= self.page_size {
                return ListPage::finished(remaining);
            }
            let rest = remaining.split_off(self.page_size);
            let id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
            self.pending.lock().unwrap().insert(id, rest);
            ListPage::partial(remaining, ListCursor(id))
        }

        fn clear(&self) {
            self.rows.lock().unwrap().clear();
        }

        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    /// In-memory local store for testing.
    pub struct MemoryLocal {
        rows: PagedRows,
    }

    impl MemoryLocal {
        pub fn new() -> Self {
            Self::with_page_size(DEFAULT_PAGE_SIZE)
        }

        /// Small page sizes force multi-page listings in tests.
        pub fn with_page_size(page_size: usize) -> Self {
            Self {
                rows: PagedRows::new(page_size),
            }
        }

        pub fn len(&self) -> usize {
            self.rows.len()
        }

        pub fn is_empty(&self) -> bool {
            self.rows.len() == 0
        }
    }

    impl Default for MemoryLocal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl LocalStore for MemoryLocal {
        async fn set(
            &self,
            path: &[String],
            value: Scalar,
            is_reference: bool,
        ) -> Result<(), StoreError> {
            self.rows.set(path, value, is_reference);
            Ok(())
        }

        async fn list(&self, prefix: &[String]) -> Result<ListPage, StoreError> {
            Ok(self.rows.list(prefix))
        }

        async fn next_page(&self, cursor: ListCursor) -> Result<ListPage, StoreError> {
            self.rows.next_page(cursor)
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.rows.clear();
            Ok(())
        }
    }

    /// In-memory server store for testing, with a broadcast channel per
    /// publish/subscribe channel name.
    pub struct MemoryServer {
        rows: PagedRows,
        channels: Mutex<HashMap<String, broadcast::Sender<ChangeNotice>>>,
    }

    impl MemoryServer {
        pub fn new() -> Self {
            Self::with_page_size(DEFAULT_PAGE_SIZE)
        }

        pub fn with_page_size(page_size: usize) -> Self {
            Self {
                rows: PagedRows::new(page_size),
                channels: Mutex::new(HashMap::new()),
            }
        }

        pub fn len(&self) -> usize {
            self.rows.len()
        }

        pub fn is_empty(&self) -> bool {
            self.rows.len() == 0
        }

        fn sender(&self, channel: &str) -> broadcast::Sender<ChangeNotice> {
            self.channels
                .lock()
                .unwrap()
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
                .clone()
        }
    }

    impl Default for MemoryServer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ServerStore for MemoryServer {
        async fn set(
            &self,
            path: &[String],
            value: Scalar,
            is_reference: bool,
        ) -> Result<(), StoreError> {
            self.rows.set(path, value, is_reference);
            Ok(())
        }

        async fn list(&self, prefix: &[String]) -> Result<ListPage, StoreError> {
            Ok(self.rows.list(prefix))
        }

        async fn next_page(&self, cursor: ListCursor) -> Result<ListPage, StoreError> {
            self.rows.next_page(cursor)
        }

        async fn publish(&self, channel: &str, notice: ChangeNotice) -> Result<(), StoreError> {
            // A send error only means nobody is subscribed.
            let _ = self.sender(channel).send(notice);
            Ok(())
        }

        fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChangeNotice> {
            self.sender(channel).subscribe()
        }
    }

}
