//! In-process stand-in for the remote service, backed by SQLite.
//!
//! Speaks the same `{success, ...}` contract as any other [`Dispatcher`], so
//! the engine cannot tell it from a network backend. Latency and per-class
//! failures can be injected to model a slow, flaky remote.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::db;
use crate::dispatch::{Dispatcher, Params, Session};
use crate::model::{
    AttendanceRecord, AttendanceStatus, ClassStat, ClassSummary, LeaderboardEntry, StatusMark, Tier,
};

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn update(e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    fn response(self) -> Value {
        json!({
            "success": false,
            "error": { "code": self.code, "message": self.message }
        })
    }
}

type HandlerResult = Result<Value, HandlerErr>;

pub struct SqliteDispatcher {
    conn: Mutex<Connection>,
    latency: Duration,
    failing_stats: Mutex<HashSet<String>>,
}

impl SqliteDispatcher {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_connection(db::open_db(workspace)?))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(db::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            latency: Duration::ZERO,
            failing_stats: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes `stats.class` fail for `class_id` until cleared.
    pub fn fail_stats_for(&self, class_id: impl Into<String>) {
        self.failing_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(class_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn answer(&self, action: &str, params: &Value) -> Value {
        if action == "stats.class" {
            let failing = self
                .failing_stats
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(class_id) = params.get("classId").and_then(|v| v.as_str()) {
                if failing.contains(class_id) {
                    return HandlerErr::new("stats_unavailable", "statistics temporarily unavailable")
                        .response();
                }
            }
        }

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let result = match action {
            "classes.create" => classes_create(&conn, params),
            "classes.list" => classes_list(&conn),
            "students.create" => students_create(&conn, params),
            "points.award" => points_award(&conn, params),
            "attendance.list" => attendance_list(&conn, params),
            "attendance.bulkSet" => attendance_bulk_set(&conn, params),
            "stats.class" => stats_class(&conn, params),
            "leaderboard.list" => leaderboard_list(&conn, params),
            other => Err(HandlerErr::new(
                "not_implemented",
                format!("unknown action: {}", other),
            )),
        };
        match result {
            Ok(Value::Object(mut payload)) => {
                payload.insert("success".to_string(), Value::Bool(true));
                Value::Object(payload)
            }
            Ok(other) => json!({ "success": true, "result": other }),
            Err(e) => e.response(),
        }
    }
}

impl Dispatcher for SqliteDispatcher {
    fn dispatch<'a>(
        &'a self,
        _session: &'a Session,
        action: &'a str,
        params: Params,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(self.answer(action, &Value::Object(params)))
        })
    }
}

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn classes_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "classId": class_id }))
}

fn classes_list(conn: &Connection) -> HandlerResult {
    let mut stmt = conn
        .prepare("SELECT id, name FROM classes ORDER BY name, id")
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([], |r| {
            Ok(ClassSummary {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "classes": classes }))
}

fn students_create(conn: &Connection, params: &Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    let display_name = get_required_str(params, "displayName")?;
    let points = params.get("points").and_then(|v| v.as_i64()).unwrap_or(0);
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, display_name, sort_order, active, points)
         VALUES(?, ?, ?, ?, 1, ?)",
        (&student_id, &class_id, &display_name, next_sort, points),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "studentId": student_id }))
}

fn points_award(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let Some(delta) = params.get("points").and_then(|v| v.as_i64()) else {
        return Err(HandlerErr::bad_params("missing points"));
    };
    let changed = conn
        .execute(
            "UPDATE students SET points = points + ? WHERE id = ?",
            (delta, &student_id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let points: i64 = conn
        .query_row("SELECT points FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .map_err(HandlerErr::query)?;
    Ok(json!({ "points": points }))
}

fn attendance_list(conn: &Connection, params: &Value) -> HandlerResult {
    let mut sql = String::from(
        "SELECT a.id, a.class_id, a.student_id, s.display_name, a.date, a.status, a.note, a.recorded_at
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE 1 = 1",
    );
    let mut bind: Vec<SqlValue> = Vec::new();
    if let Some(class_id) = get_optional_str(params, "classId") {
        if !class_exists(conn, &class_id)? {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
        sql.push_str(" AND a.class_id = ?");
        bind.push(SqlValue::Text(class_id));
    }
    if let Some(date) = get_optional_str(params, "date") {
        let date = parse_date(&date)?;
        sql.push_str(" AND a.date = ?");
        bind.push(SqlValue::Text(date.format("%Y-%m-%d").to_string()));
    }
    sql.push_str(" ORDER BY a.date DESC, s.sort_order, a.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, String>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut records = Vec::with_capacity(rows.len());
    for (id, class_id, student_id, student_name, date, status, note, recorded_at) in rows {
        let date = parse_date(&date)
            .map_err(|_| HandlerErr::new("db_corrupt", format!("bad date on {}", id)))?;
        let status = status
            .parse::<AttendanceStatus>()
            .map_err(|e| HandlerErr::new("db_corrupt", e))?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .ok()
            .map(|t| t.with_timezone(&Utc));
        records.push(AttendanceRecord {
            id,
            class_id,
            student_id,
            student_name,
            date,
            status,
            note,
            recorded_at,
        });
    }
    Ok(json!({ "records": records }))
}

fn attendance_bulk_set(conn: &Connection, params: &Value) -> HandlerResult {
    let date = parse_date(&get_required_str(params, "date")?)?;
    let Some(marks_json) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };
    let marks: Vec<StatusMark> = marks_json
        .iter()
        .map(|m| serde_json::from_value(m.clone()))
        .collect::<Result<_, _>>()
        .map_err(|e| HandlerErr::bad_params(format!("invalid mark: {}", e)))?;
    let date_key = date.format("%Y-%m-%d").to_string();
    let now = Utc::now().to_rfc3339();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut succeeded = 0usize;
    let mut failed: Vec<String> = Vec::new();
    for mark in marks {
        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                (&mark.class_id, &mark.student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !exists {
            failed.push(mark.student_id);
            continue;
        }
        tx.execute(
            "INSERT INTO attendance(id, class_id, student_id, date, status, recorded_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               class_id = excluded.class_id,
               recorded_at = excluded.recorded_at",
            (
                Uuid::new_v4().to_string(),
                &mark.class_id,
                &mark.student_id,
                &date_key,
                mark.status.as_str(),
                &now,
            ),
        )
        .map_err(HandlerErr::update)?;
        succeeded += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "succeeded": succeeded, "failed": failed }))
}

fn stats_class(conn: &Connection, params: &Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM attendance WHERE class_id = ? GROUP BY status")
        .map_err(HandlerErr::query)?;
    let counts = stmt
        .query_map([&class_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let (mut present, mut sick, mut permission, mut absent) = (0u32, 0u32, 0u32, 0u32);
    for (status, n) in counts {
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        match status.parse::<AttendanceStatus>() {
            Ok(AttendanceStatus::Present) => present = n,
            Ok(AttendanceStatus::Sick) => sick = n,
            Ok(AttendanceStatus::Permission) => permission = n,
            Ok(AttendanceStatus::Absent) => absent = n,
            Err(e) => return Err(HandlerErr::new("db_corrupt", e)),
        }
    }
    let stat = ClassStat::from_counts(class_id, present, sick, permission, absent);
    Ok(json!({ "stat": stat }))
}

fn leaderboard_list(conn: &Connection, params: &Value) -> HandlerResult {
    let mut sql = String::from(
        "SELECT s.id, s.class_id, s.display_name, s.points,
                (SELECT MAX(a.date) FROM attendance a
                 WHERE a.student_id = s.id AND a.status = 'present')
         FROM students s
         WHERE s.active = 1",
    );
    let mut bind: Vec<SqlValue> = Vec::new();
    if let Some(class_id) = get_optional_str(params, "classId") {
        if !class_exists(conn, &class_id)? {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
        sql.push_str(" AND s.class_id = ?");
        bind.push(SqlValue::Text(class_id));
    }
    sql.push_str(" ORDER BY s.points DESC, s.display_name, s.id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let entries = stmt
        .query_map(params_from_iter(bind), |r| {
            let student_id: String = r.get(0)?;
            let points: i64 = r.get(3)?;
            let last_active: Option<String> = r.get(4)?;
            Ok(LeaderboardEntry {
                id: format!("lb-{}", student_id),
                class_id: r.get(1)?,
                student_name: r.get(2)?,
                points,
                last_active: last_active
                    .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                tier: Tier::for_points(points),
                student_id,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "entries": entries }))
}
