use serde_json::json;

use crate::edits::CommitError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, no_view, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceStatus, MarkKey};
use crate::view::AttendanceView;

use super::attendance::attendance_page;

fn view_mut(state: &mut AppState) -> Result<&mut AttendanceView, HandlerErr> {
    state.attendance.as_mut().ok_or_else(|| no_view("attendance"))
}

fn mark_key(req: &Request) -> Result<MarkKey, HandlerErr> {
    Ok(MarkKey::new(
        get_required_str(&req.params, "classId")?,
        get_required_str(&req.params, "studentId")?,
    ))
}

fn handle_set(state: &mut AppState, req: &Request) -> HandlerResult {
    let key = mark_key(req)?;
    let status: AttendanceStatus = get_required_str(&req.params, "status")?
        .parse()
        .map_err(|e| HandlerErr::bad_params(e))?;
    let view = view_mut(state)?;
    view.stage(key, status);
    Ok(json!({ "staged": view.edit_buffer().len() }))
}

fn handle_unset(state: &mut AppState, req: &Request) -> HandlerResult {
    let key = mark_key(req)?;
    let view = view_mut(state)?;
    let removed = view.unstage(&key);
    Ok(json!({ "removed": removed, "staged": view.edit_buffer().len() }))
}

fn handle_list(state: &mut AppState) -> HandlerResult {
    let view = view_mut(state)?;
    let edits: Vec<serde_json::Value> = view
        .edit_buffer()
        .entries()
        .map(|(key, edit)| {
            json!({
                "classId": key.class_id,
                "studentId": key.student_id,
                "status": edit.value,
                "base": edit.base,
                "conflict": edit.conflict,
            })
        })
        .collect();
    Ok(json!({
        "markDate": view.mark_date().format("%Y-%m-%d").to_string(),
        "edits": edits,
        "conflicts": view.edit_buffer().conflicts().len(),
    }))
}

fn handle_discard(state: &mut AppState) -> HandlerResult {
    let view = view_mut(state)?;
    let discarded = view.edit_buffer().len();
    view.discard_edits();
    Ok(json!({ "discarded": discarded }))
}

async fn handle_commit(state: &mut AppState) -> HandlerResult {
    let view = view_mut(state)?;
    match view.commit().await {
        Ok(report) => Ok(json!({
            "succeeded": report.succeeded,
            "failed": report.failed,
            "staged": view.edit_buffer().len(),
            "page": attendance_page(view),
        })),
        Err(e) => {
            let staged = view.edit_buffer().len();
            let details = match &e {
                CommitError::Dispatch { failed, .. } => json!({
                    "phase": "dispatch",
                    "failed": failed,
                    "staged": staged,
                }),
                CommitError::Refresh { report, .. } => json!({
                    "phase": "refresh",
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                    "staged": staged,
                }),
            };
            Err(HandlerErr::from(e.source_error().clone()).with_details(details))
        }
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "edits.set" => handle_set(state, req),
        "edits.unset" => handle_unset(state, req),
        "edits.list" => handle_list(state),
        "edits.discard" => handle_discard(state),
        "edits.commit" => handle_commit(state).await,
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
