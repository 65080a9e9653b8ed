use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::aggregate::{aggregate, AggregateStats, Tallied};
use crate::error::{Result, SyncError};

struct Contents<R: Tallied> {
    records: Arc<[R]>,
    aggregate: Arc<AggregateStats<R::Category>>,
    generation: u64,
}

/// Authoritative in-memory collection for one view.
///
/// Contents and their aggregate are swapped together under one lock, so a
/// reader sees either the old pair or the new pair. Every refresh takes a
/// generation number when it starts; a refresh that resolves after a newer
/// one was started is discarded.
pub struct RecordStore<R: Tallied> {
    label: &'static str,
    issued: AtomicU64,
    contents: Mutex<Contents<R>>,
}

impl<R: Tallied> RecordStore<R> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            issued: AtomicU64::new(0),
            contents: Mutex::new(Contents {
                records: Arc::from(Vec::new()),
                aggregate: Arc::new(AggregateStats::empty(R::CATEGORIES)),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Contents<R>> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn refresh<F>(&self, fetch: F) -> Result<Arc<[R]>>
    where
        F: Future<Output = Result<Vec<R>>>,
    {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        debug!("{}: refresh #{} started", self.label, generation);

        let records = match fetch.await {
            Ok(v) => v,
            Err(e) => {
                warn!("{}: refresh #{} failed: {}", self.label, generation, e);
                return Err(e);
            }
        };

        // Built outside the lock; only the swap happens under it.
        let stats = Arc::new(aggregate(&records));
        let records: Arc<[R]> = Arc::from(records);

        let mut contents = self.lock();
        let newer = self.issued.load(Ordering::SeqCst);
        if newer != generation {
            debug!(
                "{}: refresh #{} discarded, #{} already started",
                self.label, generation, newer
            );
            return Err(SyncError::Superseded { generation, newer });
        }
        contents.records = Arc::clone(&records);
        contents.aggregate = stats;
        contents.generation = generation;
        drop(contents);

        info!(
            "{}: refresh #{} applied {} records in {:?}",
            self.label,
            generation,
            records.len(),
            start.elapsed()
        );
        Ok(records)
    }

    pub fn snapshot(&self) -> Arc<[R]> {
        Arc::clone(&self.lock().records)
    }

    pub fn aggregate(&self) -> Arc<AggregateStats<R::Category>> {
        Arc::clone(&self.lock().aggregate)
    }

    /// Generation of the refresh whose result is currently installed (0 = never).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Tallied + Clone> RecordStore<R> {
    pub fn find(&self, id: &str) -> Option<R> {
        self.lock().records.iter().find(|r| r.id() == id).cloned()
    }
}
