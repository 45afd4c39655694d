use collection_sync::{CollectionView, SyncError};

/// What a view should render for one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation<'a, R> {
    /// Nothing loaded yet and no error.
    Loading,
    Fresh {
        records: &'a [R],
        /// A re-fetch is in flight.
        refreshing: bool,
    },
    /// Last good data, but the latest fetch failed.
    Stale {
        records: &'a [R],
        error: &'a SyncError,
    },
    /// No data was ever loaded and the latest fetch failed.
    Failed(&'a SyncError),
}

impl<'a, R> Presentation<'a, R> {
    pub fn of(view: &'a CollectionView<R>) -> Self {
        match (&view.error, view.loaded) {
            (None, false) => Presentation::Loading,
            (None, true) => Presentation::Fresh {
                records: view.data.records(),
                refreshing: view.loading,
            },
            (Some(error), true) => Presentation::Stale {
                records: view.data.records(),
                error,
            },
            (Some(error), false) => Presentation::Failed(error),
        }
    }

    pub fn records(&self) -> &'a [R] {
        match *self {
            Presentation::Fresh { records, .. } | Presentation::Stale { records, .. } => records,
            Presentation::Loading | Presentation::Failed(_) => &[],
        }
    }
}
