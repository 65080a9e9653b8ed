//! Staggered per-entity loading.
//!
//! The first `priority_count` entities are fetched at once; the rest are
//! started one by one, `interval` apart. Every item publishes into an
//! [`AuxMap`] as soon as it resolves, and a failed item publishes its
//! fallback instead, so one bad entity never holds back its siblings.

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem<K, S> {
    pub key: K,
    pub fallback: S,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoadPlan<K, S> {
    pub priority: Vec<PlanItem<K, S>>,
    pub trailing: Vec<PlanItem<K, S>>,
}

impl<K, S> BatchLoadPlan<K, S> {
    pub fn partition<F>(entities: Vec<K>, priority_count: usize, fallback: F) -> Self
    where
        F: Fn(&K) -> S,
    {
        let mut priority = Vec::new();
        let mut trailing = Vec::new();
        for (i, key) in entities.into_iter().enumerate() {
            let item = PlanItem {
                fallback: fallback(&key),
                key,
            };
            if i < priority_count {
                priority.push(item);
            } else {
                trailing.push(item);
            }
        }
        Self { priority, trailing }
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.trailing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type PublishHook<K, S> = Box<dyn Fn(&HashMap<K, S>) + Send + Sync>;

/// Per-entity results published by the loader.
pub struct AuxMap<K, S> {
    entries: Mutex<HashMap<K, S>>,
    published: AtomicUsize,
    fallbacks: AtomicUsize,
    on_publish: Option<PublishHook<K, S>>,
}

impl<K: Eq + Hash, S> Default for AuxMap<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, S> AuxMap<K, S> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            published: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
            on_publish: None,
        }
    }

    /// `hook` runs after every publish with the complete map, under the map's
    /// lock, so whatever it derives is computed from a consistent state.
    pub fn with_hook<F>(hook: F) -> Self
    where
        F: Fn(&HashMap<K, S>) + Send + Sync + 'static,
    {
        Self {
            on_publish: Some(Box::new(hook)),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, S>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish(&self, key: K, value: S) {
        self.insert(key, value);
    }

    pub fn publish_fallback(&self, key: K, value: S) {
        self.fallbacks.fetch_add(1, Ordering::SeqCst);
        self.insert(key, value);
    }

    fn insert(&self, key: K, value: S) {
        let mut entries = self.lock();
        entries.insert(key, value);
        self.published.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.on_publish {
            hook(&entries);
        }
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.published.store(0, Ordering::SeqCst);
        self.fallbacks.store(0, Ordering::SeqCst);
        if let Some(hook) = &self.on_publish {
            hook(&entries);
        }
    }

    /// Number of publishes since the last clear, fallbacks included.
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, S: Clone> AuxMap<K, S> {
    pub fn get(&self, key: &K) -> Option<S> {
        self.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<K, S> {
        self.lock().clone()
    }
}

/// Handle to one `load_all` call.
pub struct BatchRun {
    total: usize,
    outstanding: watch::Receiver<usize>,
    started: Instant,
    advisory: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl BatchRun {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.outstanding() == 0
    }

    /// `entities * interval`. Only good for hiding a spinner: trailing items
    /// may still be in flight when it passes.
    pub fn advisory_deadline(&self) -> Duration {
        self.advisory
    }

    pub fn advisory_elapsed(&self) -> bool {
        self.started.elapsed() >= self.advisory
    }

    pub async fn advisory_signal(&self) {
        tokio::time::sleep_until(self.started + self.advisory).await;
    }

    /// Resolves once every item has published, real value or fallback.
    pub async fn wait(&self) {
        let mut rx = self.outstanding.clone();
        // Err means every task dropped its sender, which only happens once they are all finished.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Abandons a run whose results are no longer wanted.
    pub fn abort(&self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

impl fmt::Debug for BatchRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRun")
            .field("total", &self.total)
            .field("outstanding", &self.outstanding())
            .field("advisory", &self.advisory)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaggeredBatchLoader {
    priority_count: usize,
    interval: Duration,
}

impl StaggeredBatchLoader {
    pub fn new(priority_count: usize, interval: Duration) -> Self {
        Self {
            priority_count,
            interval,
        }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self::new(cfg.priority_count, cfg.trailing_interval)
    }

    pub fn priority_count(&self) -> usize {
        self.priority_count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Must be called from within a tokio runtime.
    pub fn load_all<K, S, F, Fut, FB>(
        &self,
        entities: Vec<K>,
        fetch_one: F,
        fallback: FB,
        sink: Arc<AuxMap<K, S>>,
    ) -> BatchRun
    where
        K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
        S: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
        FB: Fn(&K) -> S,
    {
        let plan = BatchLoadPlan::partition(entities, self.priority_count, fallback);
        self.run(plan, fetch_one, sink)
    }

    pub fn run<K, S, F, Fut>(
        &self,
        plan: BatchLoadPlan<K, S>,
        fetch_one: F,
        sink: Arc<AuxMap<K, S>>,
    ) -> BatchRun
    where
        K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
        S: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        let total = plan.len();
        let (tx, rx) = watch::channel(total);
        let tx = Arc::new(tx);
        let fetch_one = Arc::new(fetch_one);
        let started = Instant::now();
        debug!(
            "batch: {} priority + {} trailing items, interval {:?}",
            plan.priority.len(),
            plan.trailing.len(),
            self.interval
        );

        let mut tasks = Vec::with_capacity(total);
        for item in plan.priority {
            tasks.push(tokio::spawn(run_item(
                item,
                None,
                Arc::clone(&fetch_one),
                Arc::clone(&sink),
                Arc::clone(&tx),
            )));
        }
        // Trailing item i starts (i+1) intervals in, never alongside the
        // priority tier.
        for (i, item) in plan.trailing.into_iter().enumerate() {
            let delay = self.interval * (i as u32 + 1);
            tasks.push(tokio::spawn(run_item(
                item,
                Some(started + delay),
                Arc::clone(&fetch_one),
                Arc::clone(&sink),
                Arc::clone(&tx),
            )));
        }

        BatchRun {
            total,
            outstanding: rx,
            started,
            advisory: self.interval * total as u32,
            tasks,
        }
    }
}

async fn run_item<K, S, F, Fut>(
    item: PlanItem<K, S>,
    start_at: Option<Instant>,
    fetch_one: Arc<F>,
    sink: Arc<AuxMap<K, S>>,
    outstanding: Arc<watch::Sender<usize>>,
) where
    K: Clone + Eq + Hash + fmt::Display,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<S>>,
{
    if let Some(at) = start_at {
        tokio::time::sleep_until(at).await;
    }
    let PlanItem { key, fallback } = item;
    match fetch_one(key.clone()).await {
        Ok(value) => {
            debug!("batch: {} loaded", key);
            sink.publish(key, value);
        }
        Err(e) => {
            warn!("batch: {} failed, publishing fallback: {}", key, e);
            sink.publish_fallback(key, fallback);
        }
    }
    outstanding.send_modify(|n| *n = n.saturating_sub(1));
}
