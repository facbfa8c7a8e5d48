use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;

use vev_core::{
    ChangeNotice, Fact, LocalStore, Node, NodeObserver, ServerStore, NEW_BATCH_CHANNEL,
};

use crate::canonical::{canonicalize_listing, CanonicalFact};
use crate::error::ReplicationError;
use crate::flatten::Flattener;
use crate::materialize::Materializer;

/// Outcome of replicating a single fact during push. Failures are isolated:
/// one fact's outcome never aborts its siblings.
#[derive(Debug)]
pub struct PushOutcome {
    pub fact: Fact,
    pub result: Result<(), ReplicationError>,
}

/// The push/pull/resync state machine.
///
/// Owns the batch counter and the local store's contents. Either store may
/// be absent; the operations needing a missing store become no-ops
/// ("replication disabled") rather than errors.
pub struct Replicator<L, S, O>
where
    L: LocalStore,
    S: ServerStore,
    O: NodeObserver,
{
    local: Option<Arc<L>>,
    server: Option<Arc<S>>,
    observer: Arc<O>,
    /// Last batch fully applied (or reserved by push). Process-local and
    /// non-persisted: two replicator instances sharing a server each track
    /// their own view of how far they have caught up.
    current_batch: AtomicU64,
    /// Serializes pull and reset so a resync never interleaves its clear and
    /// rewrite with a concurrent batch-apply.
    sync_gate: Mutex<()>,
}

impl<L, S, O> Replicator<L, S, O>
where
    L: LocalStore + 'static,
    S: ServerStore + 'static,
    O: NodeObserver + 'static,
{
    pub fn new(local: Option<Arc<L>>, server: Option<Arc<S>>, observer: Arc<O>) -> Arc<Self> {
        Arc::new(Self {
            local,
            server,
            observer,
            current_batch: AtomicU64::new(0),
            sync_gate: Mutex::new(()),
        })
    }

    /// Subscribe to change notifications and re-pull on every message.
    /// Returns `None` when there is no server store. The task ends when the
    /// server drops its channel.
    pub fn spawn_listener(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let server = self.server.clone()?;
        let mut rx = server.subscribe(NEW_BATCH_CHANNEL);
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) => {
                        if let Err(e) = this.pull().await {
                            tracing::warn!("pull after change notice failed: {e}");
                        }
                    }
                    // A lagged receiver only missed notices; the next pull
                    // catches up by batch number anyway.
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!("change listener lagged by {n} notices");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// The batch number of the last push or fully applied pull.
    pub fn current_batch(&self) -> u64 {
        self.current_batch.load(Ordering::SeqCst)
    }

    /// Flatten the given node graphs and replicate every resulting fact:
    /// local write under the bare path, server write under
    /// `[batch, ...path, hash]`, and one change notice per fact. All writes
    /// fan out concurrently; the caller must inspect per-fact outcomes.
    pub async fn push(&self, nodes: &[Node]) -> Vec<PushOutcome> {
        let batch = self.current_batch.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = write_hash();
        let facts = Flattener::flatten(nodes);
        tracing::debug!(batch, facts = facts.len(), "pushing");

        join_all(
            facts
                .into_iter()
                .map(|fact| self.replicate_fact(batch, &hash, fact)),
        )
        .await
    }

    async fn replicate_fact(&self, batch: u64, hash: &str, fact: Fact) -> PushOutcome {
        let path = fact.path.segments();

        let mut versioned = Vec::with_capacity(path.len() + 2);
        versioned.push(batch.to_string());
        versioned.extend(path.iter().cloned());
        versioned.push(hash.to_string());

        let notice = ChangeNotice {
            batch,
            path: path.clone(),
            value: fact.value.clone(),
            is_reference: fact.is_reference,
        };

        let local_write = async {
            match &self.local {
                Some(local) => local.set(&path, fact.value.clone(), fact.is_reference).await,
                None => Ok(()),
            }
        };
        let server_write = async {
            match &self.server {
                Some(server) => {
                    server
                        .set(&versioned, fact.value.clone(), fact.is_reference)
                        .await
                }
                None => Ok(()),
            }
        };
        let broadcast = async {
            match &self.server {
                Some(server) => server.publish(NEW_BATCH_CHANNEL, notice).await,
                None => Ok(()),
            }
        };

        let (local_result, server_result, broadcast_result) =
            tokio::join!(local_write, server_write, broadcast);

        let result = local_result
            .and(server_result)
            .and(broadcast_result)
            .map_err(ReplicationError::from);
        if let Err(e) = &result {
            tracing::warn!(path = %fact.path, "fact write failed: {e}");
        }
        PushOutcome { fact, result }
    }

    /// Incremental catch-up: apply the current batch, then walk forward one
    /// batch at a time until the first empty probe. An empty probe of the
    /// current batch triggers a full resync first. Serialized with
    /// `reset_local` by the sync gate.
    pub async fn pull(&self) -> Result<(), ReplicationError> {
        let (Some(local), Some(server)) = (&self.local, &self.server) else {
            return Ok(());
        };
        let _gate = self.sync_gate.lock().await;

        let current = self.current_batch.load(Ordering::SeqCst);
        if probe_empty(server.as_ref(), current).await? {
            self.reset_local_locked(local.as_ref(), server.as_ref())
                .await?;
        }

        // The reset may have advanced the counter; re-read before applying.
        let current = self.current_batch.load(Ordering::SeqCst);
        self.apply_batch(local.as_ref(), server.as_ref(), current)
            .await?;

        loop {
            let next = self.current_batch.load(Ordering::SeqCst) + 1;
            if probe_empty(server.as_ref(), next).await? {
                // Densely numbered batches: a gap is indistinguishable from
                // "no more batches yet", so stop here either way.
                break;
            }
            self.current_batch.store(next, Ordering::SeqCst);
            self.apply_batch(local.as_ref(), server.as_ref(), next)
                .await?;
        }
        Ok(())
    }

    /// Full resynchronization: canonicalize the server's entire history,
    /// wipe the local store, and rebuild it. Not atomic: a failure after the
    /// clear leaves the local store incomplete unless it is transactional.
    pub async fn reset_local(&self) -> Result<(), ReplicationError> {
        let (Some(local), Some(server)) = (&self.local, &self.server) else {
            return Ok(());
        };
        let _gate = self.sync_gate.lock().await;
        self.reset_local_locked(local.as_ref(), server.as_ref())
            .await
    }

    async fn reset_local_locked(&self, local: &L, server: &S) -> Result<(), ReplicationError> {
        let canonical = canonicalize_listing(server, &[]).await?;
        local.clear().await?;

        let max_batch = canonical.iter().map(|c| c.batch).max().unwrap_or(0);
        self.current_batch.fetch_max(max_batch, Ordering::SeqCst);
        tracing::info!(
            facts = canonical.len(),
            batch = max_batch,
            "local store reset from server history"
        );

        self.apply_canonical(local, &canonical).await
    }

    async fn apply_batch(
        &self,
        local: &L,
        server: &S,
        batch: u64,
    ) -> Result<(), ReplicationError> {
        let canonical = canonicalize_listing(server, &[batch.to_string()]).await?;
        self.apply_canonical(local, &canonical).await
    }

    async fn apply_canonical(
        &self,
        local: &L,
        canonical: &[CanonicalFact],
    ) -> Result<(), ReplicationError> {
        for item in canonical {
            local
                .set(
                    &item.fact.path.segments(),
                    item.fact.value.clone(),
                    item.fact.is_reference,
                )
                .await?;
        }
        for node in Materializer::materialize(canonical)? {
            self.observer.on_node(&node);
        }
        Ok(())
    }
}

async fn probe_empty<S: ServerStore>(server: &S, batch: u64) -> Result<bool, ReplicationError> {
    let first = server.list(&[batch.to_string()]).await?;
    Ok(first.is_empty_listing())
}

/// Base-36 wall-clock milliseconds plus two random base-36 characters.
/// Disambiguates concurrent writers at the same path within one batch. Not
/// a content hash, and not an ordering token: canonicalization picks the
/// lexicographically smallest hash, not the newest.
fn write_hash() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let suffix = rand::thread_rng().gen_range(0..36 * 36) as u64;
    format!("{}{:0>2}", to_base36(millis), to_base36(suffix))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}
