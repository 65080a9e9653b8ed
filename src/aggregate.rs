use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::model::ClassStat;

/// How the aggregation engine sees a record: an identity, a category from a
/// closed set, an optional day and the entity (person) it belongs to.
pub trait Tallied {
    type Category: Copy + Ord + fmt::Debug + Serialize + Send + Sync + 'static;

    /// Every category a record of this type can carry, in display order.
    const CATEGORIES: &'static [Self::Category];

    fn id(&self) -> &str;
    fn category(&self) -> Self::Category;
    fn day(&self) -> Option<NaiveDate>;
    fn entity(&self) -> &str;
}

/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats<C: Ord> {
    pub counts_by_category: BTreeMap<C, usize>,
    pub total_records: usize,
    pub distinct_dates: usize,
    pub distinct_entities: usize,
    pub date_range: Option<DateRange>,
}

impl<C: Copy + Ord> AggregateStats<C> {
    pub fn empty(categories: &[C]) -> Self {
        AggregateStats {
            counts_by_category: categories.iter().map(|c| (*c, 0)).collect(),
            total_records: 0,
            distinct_dates: 0,
            distinct_entities: 0,
            date_range: None,
        }
    }

    pub fn count(&self, category: C) -> usize {
        self.counts_by_category.get(&category).copied().unwrap_or(0)
    }

    /// Share of `category` in percent, one decimal. 0.0 for an empty collection.
    pub fn rate(&self, category: C) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        round_off_1_decimal(100.0 * self.count(category) as f64 / self.total_records as f64)
    }
}

/// Full recomputation over the complete collection. Pure and total.
pub fn aggregate<R: Tallied>(records: &[R]) -> AggregateStats<R::Category> {
    let mut out = AggregateStats::empty(R::CATEGORIES);
    let mut dates: HashSet<NaiveDate> = HashSet::new();
    let mut entities: HashSet<&str> = HashSet::new();
    let mut min: Option<NaiveDate> = None;
    let mut max: Option<NaiveDate> = None;

    for r in records {
        *out.counts_by_category.entry(r.category()).or_insert(0) += 1;
        entities.insert(r.entity());
        if let Some(day) = r.day() {
            dates.insert(day);
            min = Some(min.map_or(day, |m| m.min(day)));
            max = Some(max.map_or(day, |m| m.max(day)));
        }
    }

    out.total_records = records.len();
    out.distinct_dates = dates.len();
    out.distinct_entities = entities.len();
    out.date_range = match (min, max) {
        (Some(from), Some(to)) => Some(DateRange { from, to }),
        _ => None,
    };
    out
}

/// Roll-up of the per-class statistics loaded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatsSummary {
    pub classes: usize,
    pub present: u64,
    pub sick: u64,
    pub permission: u64,
    pub absent: u64,
    pub total: u64,
    pub attendance_rate: f64,
}

pub fn summarize_class_stats<'a, I>(stats: I) -> ClassStatsSummary
where
    I: IntoIterator<Item = &'a ClassStat>,
{
    let mut out = ClassStatsSummary::default();
    for s in stats {
        out.classes += 1;
        out.present += u64::from(s.present);
        out.sick += u64::from(s.sick);
        out.permission += u64::from(s.permission);
        out.absent += u64::from(s.absent);
        out.total += u64::from(s.total);
    }
    if out.total > 0 {
        out.attendance_rate = round_off_1_decimal(100.0 * out.present as f64 / out.total as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttendanceRecord, AttendanceStatus, LeaderboardEntry, Tier};

    fn rec(i: usize, student: &str, day: u32, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: format!("a{}", i),
            class_id: "c1".to_string(),
            student_id: student.to_string(),
            student_name: String::new(),
            date: NaiveDate::from_ymd_opt(2024, 9, day).expect("date"),
            status,
            note: None,
            recorded_at: None,
        }
    }

    #[test]
    fn counts_seven_two_one() {
        let mut records = Vec::new();
        for i in 0..7 {
            records.push(rec(i, &format!("s{}", i), 2, AttendanceStatus::Present));
        }
        for i in 7..9 {
            records.push(rec(i, &format!("s{}", i), 2, AttendanceStatus::Absent));
        }
        records.push(rec(9, "s9", 2, AttendanceStatus::Sick));

        let stats = aggregate(&records);
        assert_eq!(stats.count(AttendanceStatus::Present), 7);
        assert_eq!(stats.count(AttendanceStatus::Absent), 2);
        assert_eq!(stats.count(AttendanceStatus::Sick), 1);
        assert_eq!(stats.count(AttendanceStatus::Permission), 0);
        assert_eq!(stats.total_records, 10);
        assert_eq!(stats.counts_by_category.values().sum::<usize>(), 10);
        assert_eq!(stats.rate(AttendanceStatus::Present), 70.0);
    }

    #[test]
    fn empty_collection_has_zero_counts_and_no_range() {
        let stats = aggregate::<AttendanceRecord>(&[]);
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.distinct_dates, 0);
        assert_eq!(stats.distinct_entities, 0);
        assert!(stats.date_range.is_none());
        assert_eq!(stats.counts_by_category.len(), AttendanceStatus::ALL.len());
        assert!(stats.counts_by_category.values().all(|n| *n == 0));
        assert_eq!(stats.rate(AttendanceStatus::Present), 0.0);
    }

    #[test]
    fn distinct_dates_entities_and_range() {
        let records = vec![
            rec(1, "s1", 5, AttendanceStatus::Present),
            rec(2, "s1", 3, AttendanceStatus::Sick),
            rec(3, "s2", 5, AttendanceStatus::Present),
            rec(4, "s3", 9, AttendanceStatus::Absent),
        ];
        let stats = aggregate(&records);
        assert_eq!(stats.distinct_dates, 3);
        assert_eq!(stats.distinct_entities, 3);
        let range = stats.date_range.expect("range");
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 9, 3).expect("date"));
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 9, 9).expect("date"));
    }

    #[test]
    fn undated_records_count_but_do_not_widen_range() {
        let entries = vec![
            LeaderboardEntry {
                id: "l1".into(),
                class_id: "c1".into(),
                student_id: "s1".into(),
                student_name: String::new(),
                points: 600,
                last_active: None,
                tier: Tier::Gold,
            },
            LeaderboardEntry {
                id: "l2".into(),
                class_id: "c1".into(),
                student_id: "s2".into(),
                student_name: String::new(),
                points: 10,
                last_active: NaiveDate::from_ymd_opt(2024, 10, 1),
                tier: Tier::Unranked,
            },
        ];
        let stats = aggregate(&entries);
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.count(Tier::Gold), 1);
        assert_eq!(stats.distinct_dates, 1);
        let range = stats.date_range.expect("range");
        assert_eq!(range.from, range.to);
    }

    #[test]
    fn class_summary_sums_loaded_stats() {
        let stats = vec![
            ClassStat::from_counts("c1", 8, 1, 1, 0),
            ClassStat::zero("c2"),
            ClassStat::from_counts("c3", 2, 0, 0, 8),
        ];
        let summary = summarize_class_stats(&stats);
        assert_eq!(summary.classes, 3);
        assert_eq!(summary.present, 10);
        assert_eq!(summary.total, 20);
        assert_eq!(summary.attendance_rate, 50.0);
        assert_eq!(summarize_class_stats(&Vec::<ClassStat>::new()).attendance_rate, 0.0);
    }
}
