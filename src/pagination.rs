use std::sync::Arc;

use crate::error::{Result, SyncError};

/// Monotonically growing visible slice over an already-fetched collection.
/// Expanding never touches the network; the in-flight flag only keeps a burst
/// of scroll signals from stacking expansions.
#[derive(Debug, Clone)]
pub struct PaginationWindow<R> {
    source: Arc<[R]>,
    page_size: usize,
    visible_count: usize,
    in_flight: bool,
}

impl<R> PaginationWindow<R> {
    pub fn new(page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            source: Arc::from(Vec::new()),
            page_size,
            visible_count: 0,
            in_flight: false,
        })
    }

    pub fn reset(&mut self, source: Arc<[R]>) {
        self.visible_count = self.page_size.min(source.len());
        self.source = source;
        self.in_flight = false;
    }

    /// Resets only if `source` is a different collection than the current one.
    pub fn sync_source(&mut self, source: Arc<[R]>) -> bool {
        if Arc::ptr_eq(&self.source, &source) {
            return false;
        }
        self.reset(source);
        true
    }

    /// Reveals the next page. Returns how many records became visible; 0 when
    /// exhausted or while another expansion is in flight.
    pub fn more(&mut self) -> usize {
        if !self.begin_more() {
            return 0;
        }
        self.finish_more()
    }

    /// Claims the expansion slot for callers that render between claiming
    /// and revealing. Returns false if there is nothing to claim.
    pub fn begin_more(&mut self) -> bool {
        if self.in_flight || !self.has_more() {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish_more(&mut self) -> usize {
        if !self.in_flight {
            return 0;
        }
        self.in_flight = false;
        let before = self.visible_count;
        self.visible_count = (before + self.page_size).min(self.source.len());
        self.visible_count - before
    }

    pub fn visible(&self) -> &[R] {
        &self.source[..self.visible_count]
    }

    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    pub fn has_more(&self) -> bool {
        self.visible_count < self.source.len()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}
