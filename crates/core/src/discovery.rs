//! Deduplication of discovered rows and segment allocation.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::manifest::{Manifest, ManifestSegment, ManifestTable};
use crate::schema::{Table, TableId};
use crate::tid::Tid;

/// A compact set of packed [`Tid`]s.
///
/// Backed by a sorted vector; both operations take whole batches so that
/// callers pay one lock acquisition per batch, never per row.
#[derive(Debug, Default)]
pub struct TidSet {
    sorted: Vec<u64>,
}

impl TidSet {
    pub fn contains_batch(&self, ints: &[u64]) -> Vec<bool> {
        ints.iter()
            .map(|int| self.sorted.binary_search(int).is_ok())
            .collect()
    }

    /// Insert a batch. Duplicates within the batch or against the existing
    /// set are idempotent.
    pub fn add_batch(&mut self, ints: &[u64]) {
        if ints.is_empty() {
            return;
        }
        let mut incoming = ints.to_vec();
        incoming.sort_unstable();
        incoming.dedup();

        let old = std::mem::take(&mut self.sorted);
        self.sorted = merge_sorted(old, incoming);
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

fn merge_sorted(a: Vec<u64>, b: Vec<u64>) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut a, mut b) = (a.into_iter().peekable(), b.into_iter().peekable());
    loop {
        let next = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) if x <= y => a.next(),
            (Some(_), Some(_)) => b.next(),
            (Some(_), None) => a.next(),
            (None, Some(_)) => b.next(),
            (None, None) => break,
        };
        if let Some(next) = next {
            if out.last() != Some(&next) {
                out.push(next);
            }
        }
    }
    out
}

/// A contiguous batch of newly discovered rows from one table.
///
/// `row_ids` are exactly the rows that were new in the [`DiscoveryResult::add`]
/// call that produced this segment; no other segment of the same table ever
/// contains them again.
#[derive(Clone, Debug)]
pub struct Segment {
    pub table: TableId,
    /// Monotone per-table counter, assigned at `add` time.
    pub index: usize,
    pub row_ids: Vec<Tid>,
}

#[derive(Default)]
struct Inner {
    row_ids: HashMap<TableId, TidSet>,
    /// Keyed in first-discovery order; becomes the manifest table order.
    table_manifests: IndexMap<TableId, ManifestTable>,
    row_count: u64,
}

/// Thread-safe aggregate of everything discovered during one dump.
///
/// `add` is the serialization point that makes deduplication and segment
/// index assignment atomic: it must never be held across a database
/// round-trip.
#[derive(Default)]
pub struct DiscoveryResult {
    inner: Mutex<Inner>,
}

impl DiscoveryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record candidate rows for `table`, returning a [`Segment`] of those
    /// not seen before, in input order. Returns `None` when every candidate
    /// is already known.
    pub fn add(&self, table: TableId, meta: &Table, candidates: &[Tid]) -> Option<Segment> {
        let mut inner = self.inner.lock();
        let Inner {
            row_ids,
            table_manifests,
            row_count,
        } = &mut *inner;

        let set = row_ids.entry(table).or_default();
        let ints: Vec<u64> = candidates.iter().map(|tid| tid.to_u64()).collect();
        let contains = set.contains_batch(&ints);

        let mut new_ids = Vec::new();
        let mut new_ints = Vec::new();
        let mut seen = std::collections::HashSet::with_capacity(candidates.len());
        for (tid, known) in candidates.iter().zip(contains) {
            // A candidate batch can also repeat a row within itself.
            if !known && seen.insert(tid.to_u64()) {
                new_ids.push(*tid);
                new_ints.push(tid.to_u64());
            }
        }
        if new_ids.is_empty() {
            return None;
        }

        set.add_batch(&new_ints);
        *row_count += new_ids.len() as u64;

        let table_manifest = table_manifests.entry(table).or_insert_with(|| ManifestTable {
            id: meta.id.clone(),
            schema: meta.schema.clone(),
            name: meta.name.clone(),
            columns: meta.columns.clone(),
            segments: Vec::new(),
        });
        table_manifest.segments.push(ManifestSegment {
            row_count: new_ids.len() as u64,
        });

        Some(Segment {
            table,
            index: table_manifest.segments.len() - 1,
            row_ids: new_ids,
        })
    }

    /// Total rows discovered so far.
    pub fn row_count(&self) -> u64 {
        self.inner.lock().row_count
    }

    pub fn into_manifest(self) -> Manifest {
        Manifest {
            tables: self
                .inner
                .into_inner()
                .table_manifests
                .into_values()
                .collect(),
        }
    }
}
