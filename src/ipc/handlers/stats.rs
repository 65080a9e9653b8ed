use serde_json::json;
use std::collections::BTreeMap;

use crate::ipc::error::ok;
use crate::ipc::helpers::{client, no_view, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::view::ClassStatsView;

fn stats_snapshot(view: &ClassStatsView) -> serde_json::Value {
    let stats: BTreeMap<String, _> = view.stats().into_iter().collect();
    let (total, outstanding) = view
        .run()
        .map_or((0, 0), |run| (run.total(), run.outstanding()));
    json!({
        "stats": stats,
        "summary": view.summary(),
        "published": view.published(),
        "fallbacks": view.fallbacks(),
        "total": total,
        "outstanding": outstanding,
        "done": outstanding == 0,
        "loading": view.loading(),
    })
}

fn class_ids(req: &Request) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(raw) = req.params.get("classIds") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("classIds must be an array"));
    };
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params("classIds must contain strings"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

async fn handle_load_all(state: &mut AppState, req: &Request) -> HandlerResult {
    let ids = class_ids(req)?;
    let wait = req
        .params
        .get("wait")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if state.stats.is_none() {
        state.stats = Some(ClassStatsView::new(client(state)?, &state.config));
    }
    let Some(view) = state.stats.as_mut() else {
        return Err(no_view("stats"));
    };
    match ids {
        Some(ids) => {
            view.load_all(ids);
        }
        None => {
            view.load_every_class().await?;
        }
    }
    if wait {
        view.wait().await;
    }
    Ok(stats_snapshot(view))
}

fn handle_snapshot(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.stats.as_ref() else {
        return Err(no_view("stats"));
    };
    Ok(stats_snapshot(view))
}

async fn handle_wait(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.stats.as_ref() else {
        return Err(no_view("stats"));
    };
    view.wait().await;
    Ok(stats_snapshot(view))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.loadAll" => handle_load_all(state, req).await,
        "stats.snapshot" => handle_snapshot(state),
        "stats.wait" => handle_wait(state).await,
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
