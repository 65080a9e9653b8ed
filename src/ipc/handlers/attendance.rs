use chrono::Local;
use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{client, get_optional_date, get_optional_str, no_view, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::Scope;
use crate::view::AttendanceView;

pub(super) fn attendance_page(view: &AttendanceView) -> serde_json::Value {
    let window = view.window();
    let edits = view.edit_buffer();
    json!({
        "scope": view.scope(),
        "markDate": view.mark_date().format("%Y-%m-%d").to_string(),
        "records": window.visible(),
        "visibleCount": window.visible_count(),
        "total": window.len(),
        "hasMore": window.has_more(),
        "aggregate": &*view.aggregate(),
        "staged": edits.len(),
        "conflicts": edits.conflicts(),
    })
}

async fn handle_open(state: &mut AppState, req: &Request) -> HandlerResult {
    let scope = Scope {
        class_id: get_optional_str(&req.params, "classId"),
        date: get_optional_date(&req.params, "date")?,
    };
    let mark_date = get_optional_date(&req.params, "markDate")?
        .unwrap_or_else(|| Local::now().date_naive());
    let mut view = AttendanceView::new(client(state)?, scope, mark_date, &state.config)?;
    view.refresh().await?;
    let page = attendance_page(&view);
    state.attendance = Some(view);
    Ok(page)
}

async fn handle_refresh(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.attendance.as_mut() else {
        return Err(no_view("attendance"));
    };
    view.refresh().await?;
    Ok(attendance_page(view))
}

fn handle_more(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.attendance.as_mut() else {
        return Err(no_view("attendance"));
    };
    let added = view.more();
    let mut page = attendance_page(view);
    page["added"] = json!(added);
    Ok(page)
}

fn handle_visible(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.attendance.as_ref() else {
        return Err(no_view("attendance"));
    };
    Ok(attendance_page(view))
}

fn handle_aggregate(state: &mut AppState) -> HandlerResult {
    let Some(view) = state.attendance.as_ref() else {
        return Err(no_view("attendance"));
    };
    let aggregate = view.aggregate();
    let rates: serde_json::Map<String, serde_json::Value> = aggregate
        .counts_by_category
        .keys()
        .map(|status| (status.to_string(), json!(aggregate.rate(*status))))
        .collect();
    Ok(json!({
        "aggregate": &*aggregate,
        "rates": rates,
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.open" => handle_open(state, req).await,
        "attendance.refresh" => handle_refresh(state).await,
        "attendance.more" => handle_more(state),
        "attendance.visible" => handle_visible(state),
        "attendance.aggregate" => handle_aggregate(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
