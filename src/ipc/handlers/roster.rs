use serde_json::json;

use crate::dispatch::{Action, Reply};
use crate::ipc::helpers::{client, get_required_str, unexpected_reply, HandlerErr, HandlerResult};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};

async fn classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let name = get_required_str(&req.params, "name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    match client(state)?.call(Action::CreateClass { name }).await? {
        Reply::Created { id } => Ok(json!({ "classId": id })),
        other => Err(unexpected_reply(&other)),
    }
}

async fn classes_list(state: &mut AppState) -> HandlerResult {
    let classes = client(state)?.classes().await?;
    Ok(json!({ "classes": classes }))
}

async fn students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let class_id = get_required_str(&req.params, "classId")?;
    let display_name = get_required_str(&req.params, "displayName")?;
    let points = req
        .params
        .get("points")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let action = Action::CreateStudent {
        class_id,
        display_name,
        points,
    };
    match client(state)?.call(action).await? {
        Reply::Created { id } => Ok(json!({ "studentId": id })),
        other => Err(unexpected_reply(&other)),
    }
}

async fn points_award(state: &mut AppState, req: &Request) -> HandlerResult {
    let student_id = get_required_str(&req.params, "studentId")?;
    let Some(points) = req.params.get("points").and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::bad_params("missing points"));
    };
    match client(state)?
        .call(Action::AwardPoints { student_id, points })
        .await?
    {
        Reply::Points(total) => Ok(json!({ "points": total })),
        other => Err(unexpected_reply(&other)),
    }
}

fn backend_fail_stats(state: &mut AppState, req: &Request) -> HandlerResult {
    let class_id = get_required_str(&req.params, "classId")?;
    let Some(backend) = state.backend.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    backend.fail_stats_for(class_id);
    Ok(json!({ "ok": true }))
}

fn backend_clear_failures(state: &mut AppState) -> HandlerResult {
    let Some(backend) = state.backend.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    backend.clear_failures();
    Ok(json!({ "ok": true }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.create" => classes_create(state, req).await,
        "classes.list" => classes_list(state).await,
        "students.create" => students_create(state, req).await,
        "points.award" => points_award(state, req).await,
        "backend.failStats" => backend_fail_stats(state, req),
        "backend.clearFailures" => backend_clear_failures(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
