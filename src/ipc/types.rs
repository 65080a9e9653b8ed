use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::backend::SqliteDispatcher;
use crate::config::SyncConfig;
use crate::dispatch::Client;
use crate::view::{AttendanceView, ClassStatsView, LeaderboardView};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: SyncConfig,
    pub workspace: Option<PathBuf>,
    pub backend: Option<Arc<SqliteDispatcher>>,
    pub client: Option<Client>,
    pub attendance: Option<AttendanceView>,
    pub leaderboard: Option<LeaderboardView>,
    pub stats: Option<ClassStatsView>,
}

impl AppState {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            workspace: None,
            backend: None,
            client: None,
            attendance: None,
            leaderboard: None,
            stats: None,
        }
    }

    /// Drops every open view, e.g. when another workspace is selected.
    pub fn close_views(&mut self) {
        if let Some(stats) = self.stats.take() {
            if let Some(run) = stats.run() {
                run.abort();
            }
        }
        self.attendance = None;
        self.leaderboard = None;
    }
}
