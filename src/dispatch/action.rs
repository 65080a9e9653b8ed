use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::Params;
use crate::error::{Result, SyncError};
use crate::model::{AttendanceRecord, ClassStat, ClassSummary, LeaderboardEntry, Scope, StatusMark};

/// Every remote operation the engine performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ListAttendance(Scope),
    ClassStat {
        class_id: String,
    },
    BulkSetStatus {
        date: NaiveDate,
        marks: Vec<StatusMark>,
    },
    ListLeaderboard {
        class_id: Option<String>,
    },
    ListClasses,
    CreateClass {
        name: String,
    },
    CreateStudent {
        class_id: String,
        display_name: String,
        points: i64,
    },
    AwardPoints {
        student_id: String,
        points: i64,
    },
}

/// Outcome of a bulk write. `failed` is `None` when the remote side does not
/// report per-entry results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Attendance(Vec<AttendanceRecord>),
    ClassStat(ClassStat),
    BulkSet(BulkOutcome),
    Leaderboard(Vec<LeaderboardEntry>),
    Classes(Vec<ClassSummary>),
    Created { id: String },
    Points(i64),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::ListAttendance(_) => "attendance.list",
            Action::ClassStat { .. } => "stats.class",
            Action::BulkSetStatus { .. } => "attendance.bulkSet",
            Action::ListLeaderboard { .. } => "leaderboard.list",
            Action::ListClasses => "classes.list",
            Action::CreateClass { .. } => "classes.create",
            Action::CreateStudent { .. } => "students.create",
            Action::AwardPoints { .. } => "points.award",
        }
    }

    pub fn params(&self) -> Params {
        let v = match self {
            Action::ListAttendance(scope) => {
                let mut p = json!({});
                if let Some(class_id) = &scope.class_id {
                    p["classId"] = json!(class_id);
                }
                if let Some(date) = scope.date {
                    p["date"] = json!(date.format("%Y-%m-%d").to_string());
                }
                p
            }
            Action::ClassStat { class_id } => json!({ "classId": class_id }),
            Action::BulkSetStatus { date, marks } => json!({
                "date": date.format("%Y-%m-%d").to_string(),
                "marks": marks,
            }),
            Action::ListLeaderboard { class_id } => match class_id {
                Some(id) => json!({ "classId": id }),
                None => json!({}),
            },
            Action::ListClasses => json!({}),
            Action::CreateClass { name } => json!({ "name": name }),
            Action::CreateStudent {
                class_id,
                display_name,
                points,
            } => json!({
                "classId": class_id,
                "displayName": display_name,
                "points": points,
            }),
            Action::AwardPoints { student_id, points } => json!({
                "studentId": student_id,
                "points": points,
            }),
        };
        match v {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }
}

fn field<T: DeserializeOwned>(action: &str, raw: &mut Value, key: &str) -> Result<T> {
    let Some(v) = raw.get_mut(key).map(Value::take) else {
        return Err(SyncError::malformed(action, format!("missing {}", key)));
    };
    serde_json::from_value(v).map_err(|e| SyncError::malformed(action, format!("{}: {}", key, e)))
}

impl Reply {
    /// Validates a successful reply against the shape `action` promises.
    pub fn decode(action: &Action, mut raw: Value) -> Result<Reply> {
        let name = action.name();
        let raw = &mut raw;
        Ok(match action {
            Action::ListAttendance(_) => Reply::Attendance(field(name, raw, "records")?),
            Action::ClassStat { .. } => Reply::ClassStat(field(name, raw, "stat")?),
            Action::BulkSetStatus { marks, .. } => {
                let reports_failed = !matches!(raw.get("failed"), None | Some(Value::Null));
                let failed: Option<Vec<String>> = if reports_failed {
                    Some(field(name, raw, "failed")?)
                } else {
                    None
                };
                let succeeded = if raw.get("succeeded").is_some() {
                    field(name, raw, "succeeded")?
                } else {
                    marks.len() - failed.as_ref().map_or(0, Vec::len).min(marks.len())
                };
                Reply::BulkSet(BulkOutcome { succeeded, failed })
            }
            Action::ListLeaderboard { .. } => Reply::Leaderboard(field(name, raw, "entries")?),
            Action::ListClasses => Reply::Classes(field(name, raw, "classes")?),
            Action::CreateClass { .. } => Reply::Created {
                id: field(name, raw, "classId")?,
            },
            Action::CreateStudent { .. } => Reply::Created {
                id: field(name, raw, "studentId")?,
            },
            Action::AwardPoints { .. } => Reply::Points(field(name, raw, "points")?),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Attendance(_) => "attendance",
            Reply::ClassStat(_) => "classStat",
            Reply::BulkSet(_) => "bulkSet",
            Reply::Leaderboard(_) => "leaderboard",
            Reply::Classes(_) => "classes",
            Reply::Created { .. } => "created",
            Reply::Points(_) => "points",
        }
    }
}
