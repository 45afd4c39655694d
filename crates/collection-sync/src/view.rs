//! Immutable snapshot and the view handed to the presentation layer.

use std::sync::Arc;

use remote_gateway::{records::sort_snapshot, Record};

use crate::error::SyncError;
use crate::machine::SyncPhase;

/// An immutable, ordered collection snapshot. Cloning shares the rows.
#[derive(Debug)]
pub struct Snapshot<R> {
    records: Arc<Vec<R>>,
}

impl<R: Record> Snapshot<R> {
    /// Snapshot from fetched rows, sorted into the record's total order.
    pub fn from_rows(mut rows: Vec<R>) -> Self {
        sort_snapshot(&mut rows);
        Self {
            records: Arc::new(rows),
        }
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|r| r.id())
    }
}

impl<R> Snapshot<R> {
    pub fn empty() -> Self {
        Self {
            records: Arc::new(Vec::new()),
        }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether both handles share the same rows.
    pub fn same_as(&self, other: &Snapshot<R>) -> bool {
        Arc::ptr_eq(&self.records, &other.records)
    }
}

impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, R> IntoIterator for &'a Snapshot<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Read-only state of one synchronized collection.
#[derive(Debug, Clone)]
pub struct CollectionView<R> {
    /// Last successfully fetched snapshot.
    pub data: Snapshot<R>,
    /// A fetch is in flight.
    pub loading: bool,
    /// Set by a failed fetch, cleared by the next success.
    pub error: Option<SyncError>,
    pub phase: SyncPhase,
    /// At least one fetch has succeeded.
    pub loaded: bool,
}

impl<R> CollectionView<R> {
    pub fn initial() -> Self {
        Self {
            data: Snapshot::empty(),
            loading: false,
            error: None,
            phase: SyncPhase::Idle,
            loaded: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SyncPhase::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SyncPhase::Closed
    }
}
