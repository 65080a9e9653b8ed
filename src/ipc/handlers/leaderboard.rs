use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{client, get_optional_str, no_view, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::view::LeaderboardView;

fn leaderboard_page(view: &LeaderboardView) -> serde_json::Value {
    let window = view.window();
    json!({
        "entries": window.visible(),
        "visibleCount": window.visible_count(),
        "total": window.len(),
        "hasMore": window.has_more(),
        "aggregate": &*view.aggregate(),
    })
}

async fn handle_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let class_id = get_optional_str(&req.params, "classId");
    let mut view = LeaderboardView::new(client(state)?, class_id, &state.config)?;
    view.refresh().await?;
    let page = leaderboard_page(&view);
    state.leaderboard = Some(view);
    Ok(page)
}

async fn handle_refresh(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.leaderboard.as_mut() else {
        return Err(no_view("leaderboard"));
    };
    view.refresh().await?;
    Ok(leaderboard_page(view))
}

fn handle_more(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.leaderboard.as_mut() else {
        return Err(no_view("leaderboard"));
    };
    let added = view.more();
    let mut page = leaderboard_page(view);
    page["added"] = json!(added);
    Ok(page)
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "leaderboard.open" => handle_open(state, req).await,
        "leaderboard.refresh" => handle_refresh(state).await,
        "leaderboard.more" => handle_more(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
