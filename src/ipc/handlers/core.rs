use crate::backend::SqliteDispatcher;
use crate::dispatch::{Client, Dispatcher, Session};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cfg = &state.config;
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "config": {
                "pageSize": cfg.page_size,
                "priorityCount": cfg.priority_count,
                "trailingIntervalMs": cfg.trailing_interval.as_millis() as u64,
                "backendLatencyMs": cfg.backend_latency.as_millis() as u64,
            }
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match SqliteDispatcher::open(&path) {
        Ok(backend) => {
            let backend = Arc::new(backend.with_latency(state.config.backend_latency));
            let dispatcher: Arc<dyn Dispatcher> = backend.clone();
            state.close_views();
            state.client = Some(Client::new(dispatcher, Session::new("sidecar")));
            state.backend = Some(backend);
            state.workspace = Some(path.clone());
            info!("workspace selected: {}", path.display());
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
