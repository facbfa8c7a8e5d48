use std::collections::HashMap;

use vev_core::{Fact, FactPath, RawFact, ServerStore, StoreError};

use crate::error::ReplicationError;

/// A fact that won canonicalization for its path, tagged with the batch it
/// was written in.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFact {
    pub batch: u64,
    pub fact: Fact,
}

/// Resolves a listing of raw versioned facts to one winning fact per batch
/// and path.
///
/// While paging, tracks the minimum write hash observed per `(batch, path)`
/// (hash segment excluded). Within a batch the lexicographically smallest
/// hash wins, not the most recent write: the tie-break is deterministic and
/// clock-independent, at the cost of not preferring the causally-last
/// writer. Page order never changes the outcome.
///
/// Across batches, `finish` keeps one winner per batch and returns them in
/// ascending numeric batch order, so applying the result in sequence lets
/// later batches overwrite earlier ones exactly like the incremental
/// batch-by-batch catch-up does.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    min_hash: HashMap<Vec<String>, String>,
    raw: Vec<RawFact>,
}

/// A raw server row split into its key parts.
struct SplitPath<'a> {
    batch: u64,
    bare: &'a [String],
    hash: &'a str,
}

fn split_path(raw: &RawFact) -> Result<SplitPath<'_>, ReplicationError> {
    // Minimum shape: [batch, type, id, predicate, hash].
    let [batch, bare @ .., hash] = raw.path.as_slice() else {
        return Err(ReplicationError::MalformedPath(raw.path.join("/")));
    };
    if bare.len() < 3 {
        return Err(ReplicationError::MalformedPath(raw.path.join("/")));
    }
    let batch = batch
        .parse::<u64>()
        .map_err(|_| ReplicationError::MalformedPath(raw.path.join("/")))?;
    Ok(SplitPath { batch, bare, hash })
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_page(&mut self, chunk: &[RawFact]) -> Result<(), ReplicationError> {
        for raw in chunk {
            split_path(raw)?;
            // Winners are scoped per (batch, path): the key is the full row
            // key minus the trailing hash segment.
            let key = raw.path[..raw.path.len() - 1].to_vec();
            let hash = &raw.path[raw.path.len() - 1];
            let entry = self.min_hash.entry(key).or_insert_with(|| hash.clone());
            if hash.as_str() < entry.as_str() {
                *entry = hash.clone();
            }
            self.raw.push(raw.clone());
        }
        Ok(())
    }

    /// After the final page: keep only rows whose hash equals the canonical
    /// minimum for their batch and path, strip the hash, and parse the
    /// remainder. Results come back in ascending numeric batch order.
    pub fn finish(self) -> Result<Vec<CanonicalFact>, ReplicationError> {
        let mut canonical = Vec::new();
        for raw in &self.raw {
            let split = split_path(raw)?;
            let key = &raw.path[..raw.path.len() - 1];
            let winner = self
                .min_hash
                .get(key)
                .map(String::as_str)
                .unwrap_or(split.hash);
            if split.hash != winner {
                continue;
            }
            let path = FactPath::parse(split.bare)
                .ok_or_else(|| ReplicationError::MalformedPath(raw.path.join("/")))?;
            canonical.push(CanonicalFact {
                batch: split.batch,
                fact: Fact {
                    path,
                    value: raw.value.clone(),
                    is_reference: raw.is_reference,
                },
            });
        }
        // The raw listing orders batches lexicographically ("10" < "2");
        // sort numerically so applying in sequence replays batch order.
        canonical.sort_by(|a, b| a.batch.cmp(&b.batch).then_with(|| a.fact.path.cmp(&b.fact.path)));
        Ok(canonical)
    }
}

/// Drive a paginated server listing through a canonicalizer. Pages are
/// fetched strictly in sequence; each continuation depends on store-side
/// cursor state.
pub async fn canonicalize_listing<S: ServerStore>(
    server: &S,
    prefix: &[String],
) -> Result<Vec<CanonicalFact>, ReplicationError> {
    let mut canonicalizer = Canonicalizer::new();
    let mut page = server.list(prefix).await?;
    loop {
        canonicalizer.observe_page(&page.chunk)?;
        if page.done {
            break;
        }
        let cursor = page.cursor.ok_or(StoreError::MissingCursor)?;
        page = server.next_page(cursor).await?;
    }
    canonicalizer.finish()
}
