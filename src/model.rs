use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{round_off_1_decimal, Tallied};

/// Optional filter applied to a full-collection fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub class_id: Option<String>,
    pub date: Option<NaiveDate>,
}

impl Scope {
    pub fn class(class_id: impl Into<String>) -> Self {
        Scope {
            class_id: Some(class_id.into()),
            date: None,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Sick,
    Permission,
    Absent,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Sick,
        AttendanceStatus::Permission,
        AttendanceStatus::Absent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Permission => "permission",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "sick" => Ok(AttendanceStatus::Sick),
            "permission" => Ok(AttendanceStatus::Permission),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(format!("unknown attendance status: {}", other)),
        }
    }
}

/// Leaderboard bracket derived from a student's points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Gold,
    Silver,
    Bronze,
    Unranked,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Gold, Tier::Silver, Tier::Bronze, Tier::Unranked];

    pub fn for_points(points: i64) -> Tier {
        match points {
            p if p >= 500 => Tier::Gold,
            p if p >= 200 => Tier::Silver,
            p if p >= 50 => Tier::Bronze,
            _ => Tier::Unranked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Tallied for AttendanceRecord {
    type Category = AttendanceStatus;
    const CATEGORIES: &'static [AttendanceStatus] = &AttendanceStatus::ALL;

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> AttendanceStatus {
        self.status
    }

    fn day(&self) -> Option<NaiveDate> {
        Some(self.date)
    }

    fn entity(&self) -> &str {
        &self.student_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: String,
    pub points: i64,
    #[serde(default)]
    pub last_active: Option<NaiveDate>,
    pub tier: Tier,
}

impl Tallied for LeaderboardEntry {
    type Category = Tier;
    const CATEGORIES: &'static [Tier] = &Tier::ALL;

    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Tier {
        self.tier
    }

    fn day(&self) -> Option<NaiveDate> {
        self.last_active
    }

    fn entity(&self) -> &str {
        &self.student_id
    }
}

/// Per-class attendance totals as computed by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStat {
    pub class_id: String,
    pub present: u32,
    pub sick: u32,
    pub permission: u32,
    pub absent: u32,
    pub total: u32,
    pub attendance_rate: f64,
}

impl ClassStat {
    /// Fallback published when a class's statistic cannot be fetched.
    pub fn zero(class_id: impl Into<String>) -> Self {
        ClassStat {
            class_id: class_id.into(),
            ..ClassStat::default()
        }
    }

    pub fn from_counts(
        class_id: impl Into<String>,
        present: u32,
        sick: u32,
        permission: u32,
        absent: u32,
    ) -> Self {
        let total = present + sick + permission + absent;
        let attendance_rate = if total > 0 {
            round_off_1_decimal(100.0 * present as f64 / total as f64)
        } else {
            0.0
        };
        ClassStat {
            class_id: class_id.into(),
            present,
            sick,
            permission,
            absent,
            total,
            attendance_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub id: String,
    pub name: String,
}

/// Staging key for one person's mark in one class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkKey {
    pub class_id: String,
    pub student_id: String,
}

impl MarkKey {
    pub fn new(class_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        MarkKey {
            class_id: class_id.into(),
            student_id: student_id.into(),
        }
    }
}

impl fmt::Display for MarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_id, self.student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMark {
    pub class_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Present".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Present));
        assert_eq!(" sick ".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Sick));
        assert!("late".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn tiers_follow_point_brackets() {
        assert_eq!(Tier::for_points(0), Tier::Unranked);
        assert_eq!(Tier::for_points(49), Tier::Unranked);
        assert_eq!(Tier::for_points(50), Tier::Bronze);
        assert_eq!(Tier::for_points(200), Tier::Silver);
        assert_eq!(Tier::for_points(1200), Tier::Gold);
    }

    #[test]
    fn class_stat_rate_is_rounded_to_one_decimal() {
        let stat = ClassStat::from_counts("c1", 2, 1, 0, 0);
        assert_eq!(stat.total, 3);
        assert_eq!(stat.attendance_rate, 66.7);
        assert_eq!(ClassStat::zero("c2").attendance_rate, 0.0);
    }

    #[test]
    fn attendance_record_reads_wire_shape() {
        let rec: AttendanceRecord = serde_json::from_value(json!({
            "id": "a1",
            "classId": "c1",
            "studentId": "s1",
            "date": "2024-09-03",
            "status": "permission"
        }))
        .expect("decode record");
        assert_eq!(rec.status, AttendanceStatus::Permission);
        assert_eq!(rec.student_name, "");
        assert!(rec.recorded_at.is_none());
    }
}
