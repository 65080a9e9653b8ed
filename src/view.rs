//! Views wire the store, aggregation, pagination, batch loading and edit
//! buffer together for one screen's worth of data.

use chrono::NaiveDate;
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::aggregate::{summarize_class_stats, AggregateStats, ClassStatsSummary};
use crate::batch::{AuxMap, BatchRun, StaggeredBatchLoader};
use crate::config::SyncConfig;
use crate::dispatch::Client;
use crate::edits::{BulkResult, CommitError, CommitReport, EditBuffer};
use crate::error::{Result, SyncError};
use crate::model::{
    AttendanceRecord, AttendanceStatus, ClassStat, LeaderboardEntry, MarkKey, Scope, StatusMark,
    Tier,
};
use crate::pagination::PaginationWindow;
use crate::store::RecordStore;

pub struct AttendanceView {
    client: Client,
    scope: Scope,
    mark_date: NaiveDate,
    store: RecordStore<AttendanceRecord>,
    window: PaginationWindow<AttendanceRecord>,
    edits: EditBuffer<MarkKey, AttendanceStatus>,
}

impl AttendanceView {
    /// Staged marks are committed for the scope's date when it has one,
    /// otherwise for `mark_date`.
    pub fn new(
        client: Client,
        scope: Scope,
        mark_date: NaiveDate,
        cfg: &SyncConfig,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            client,
            mark_date: scope.date.unwrap_or(mark_date),
            scope,
            store: RecordStore::new("attendance"),
            window: PaginationWindow::new(cfg.page_size)?,
            edits: EditBuffer::new(),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn mark_date(&self) -> NaiveDate {
        self.mark_date
    }

    /// Full refresh. On success the window restarts at its first page and
    /// staged edits are re-checked for conflicts; on failure nothing changes.
    pub async fn refresh(&mut self) -> Result<Arc<[AttendanceRecord]>> {
        let client = self.client.clone();
        let scope = self.scope.clone();
        let records = self.store.refresh(client.attendance(scope)).await?;
        self.after_refresh();
        Ok(records)
    }

    fn after_refresh(&mut self) {
        self.window.sync_source(self.store.snapshot());
        let current = self.store.snapshot();
        let date = self.mark_date;
        let conflicts = self
            .edits
            .reconcile(|key| status_on(&current, key, date));
        if !conflicts.is_empty() {
            info!(
                "attendance: {} staged edits conflict with refreshed data",
                conflicts.len()
            );
        }
    }

    pub fn aggregate(&self) -> Arc<AggregateStats<AttendanceStatus>> {
        self.store.aggregate()
    }

    pub fn records(&self) -> Arc<[AttendanceRecord]> {
        self.store.snapshot()
    }

    pub fn visible(&self) -> &[AttendanceRecord] {
        self.window.visible()
    }

    pub fn window(&self) -> &PaginationWindow<AttendanceRecord> {
        &self.window
    }

    pub fn more(&mut self) -> usize {
        self.window.more()
    }

    /// Stages a mark. The base is whatever the store currently says for that
    /// person on the mark date.
    pub fn stage(&mut self, key: MarkKey, status: AttendanceStatus) {
        let base = status_on(&self.store.snapshot(), &key, self.mark_date);
        self.edits.set(key, status, base);
    }

    pub fn unstage(&mut self, key: &MarkKey) -> bool {
        self.edits.remove(key).is_some()
    }

    pub fn discard_edits(&mut self) {
        self.edits.discard();
    }

    pub fn edit_buffer(&self) -> &EditBuffer<MarkKey, AttendanceStatus> {
        &self.edits
    }

    /// Sends every staged mark in one bulk call, then refreshes from the
    /// server. Marks leave the buffer only once the refresh confirms them.
    pub async fn commit(&mut self) -> std::result::Result<CommitReport<MarkKey>, CommitError<MarkKey>> {
        let date = self.mark_date;
        let bulk_client = self.client.clone();
        let refresh_client = self.client.clone();
        let scope = self.scope.clone();
        let store = &self.store;

        let result = self
            .edits
            .commit(
                move |batch| async move {
                    let marks: Vec<StatusMark> = batch
                        .iter()
                        .map(|(key, status)| StatusMark {
                            class_id: key.class_id.clone(),
                            student_id: key.student_id.clone(),
                            status: *status,
                        })
                        .collect();
                    let outcome = bulk_client.bulk_set_status(date, marks).await?;
                    let failed: Option<Vec<MarkKey>> = outcome.failed.map(|ids| {
                        batch
                            .into_iter()
                            .map(|(key, _)| key)
                            .filter(|key| ids.contains(&key.student_id))
                            .collect()
                    });
                    Ok::<_, SyncError>(BulkResult { failed })
                },
                move || async move { store.refresh(refresh_client.attendance(scope)).await },
            )
            .await;

        if result.is_ok() {
            self.after_refresh();
        }
        result
    }
}

fn status_on(records: &[AttendanceRecord], key: &MarkKey, date: NaiveDate) -> Option<AttendanceStatus> {
    records
        .iter()
        .find(|r| r.date == date && r.student_id == key.student_id && r.class_id == key.class_id)
        .map(|r| r.status)
}

pub struct LeaderboardView {
    client: Client,
    class_id: Option<String>,
    store: RecordStore<LeaderboardEntry>,
    window: PaginationWindow<LeaderboardEntry>,
}

impl LeaderboardView {
    pub fn new(client: Client, class_id: Option<String>, cfg: &SyncConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            client,
            class_id,
            store: RecordStore::new("leaderboard"),
            window: PaginationWindow::new(cfg.page_size)?,
        })
    }

    pub async fn refresh(&mut self) -> Result<Arc<[LeaderboardEntry]>> {
        let client = self.client.clone();
        let entries = self
            .store
            .refresh(client.leaderboard(self.class_id.clone()))
            .await?;
        self.window.sync_source(Arc::clone(&entries));
        Ok(entries)
    }

    pub fn aggregate(&self) -> Arc<AggregateStats<Tier>> {
        self.store.aggregate()
    }

    pub fn visible(&self) -> &[LeaderboardEntry] {
        self.window.visible()
    }

    pub fn window(&self) -> &PaginationWindow<LeaderboardEntry> {
        &self.window
    }

    pub fn more(&mut self) -> usize {
        self.window.more()
    }
}

/// Per-class statistics, filled progressively by the staggered loader.
pub struct ClassStatsView {
    client: Client,
    loader: StaggeredBatchLoader,
    stats: Arc<AuxMap<String, ClassStat>>,
    summary: Arc<Mutex<ClassStatsSummary>>,
    run: Option<BatchRun>,
}

impl ClassStatsView {
    pub fn new(client: Client, cfg: &SyncConfig) -> Self {
        let summary = Arc::new(Mutex::new(ClassStatsSummary::default()));
        let sink_summary = Arc::clone(&summary);
        let stats = Arc::new(AuxMap::with_hook(move |all: &HashMap<String, ClassStat>| {
            let next = summarize_class_stats(all.values());
            *sink_summary.lock().unwrap_or_else(|e| e.into_inner()) = next;
        }));
        Self {
            client,
            loader: StaggeredBatchLoader::from_config(cfg),
            stats,
            summary,
            run: None,
        }
    }

    /// Starts loading `class_ids`; any run still in flight is abandoned.
    pub fn load_all(&mut self, class_ids: Vec<String>) -> &BatchRun {
        if let Some(previous) = self.run.take() {
            previous.abort();
        }
        self.stats.clear();
        let client = self.client.clone();
        let run = self.loader.load_all(
            class_ids,
            move |class_id: String| {
                let client = client.clone();
                async move { client.class_stat(class_id).await }
            },
            |class_id| ClassStat::zero(class_id.clone()),
            Arc::clone(&self.stats),
        );
        self.run.insert(run)
    }

    /// Loads every class the remote service knows about.
    pub async fn load_every_class(&mut self) -> Result<&BatchRun> {
        let classes = self.client.classes().await?;
        Ok(self.load_all(classes.into_iter().map(|c| c.id).collect()))
    }

    pub fn stats(&self) -> HashMap<String, ClassStat> {
        self.stats.snapshot()
    }

    pub fn stat(&self, class_id: &str) -> Option<ClassStat> {
        self.stats.get(&class_id.to_string())
    }

    pub fn summary(&self) -> ClassStatsSummary {
        self.summary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn run(&self) -> Option<&BatchRun> {
        self.run.as_ref()
    }

    pub fn published(&self) -> usize {
        self.stats.published()
    }

    pub fn fallbacks(&self) -> usize {
        self.stats.fallbacks()
    }

    /// True until the advisory deadline passes. Use `wait` for completion.
    pub fn loading(&self) -> bool {
        self.run.as_ref().is_some_and(|r| !r.advisory_elapsed())
    }

    pub async fn wait(&self) {
        if let Some(run) = &self.run {
            run.wait().await;
        }
    }
}
