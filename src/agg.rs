use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::model::{ClassSession, Enrollment, Role, User};

/// Local calendar day for an epoch-millisecond timestamp. The offset comes
/// from the caller (the device's zone); the core never consults the host
/// timezone, which keeps day partitioning deterministic under test.
pub fn local_day(ms: i64, tz_offset_minutes: i32) -> NaiveDate {
    let utc = DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).unwrap());
    let offset = tz_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    utc.with_timezone(&offset).date_naive()
}

pub fn round_to(x: f64, places: u32) -> f64 {
    let f = 10f64.powi(places as i32);
    (x * f).round() / f
}

/// One pass over the enrollment collection. Records whose class or student
/// reference cannot be resolved are counted in `skipped` and excluded from
/// the maps; a bad record never aborts the build.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentIndex {
    pub count_by_class: HashMap<String, usize>,
    pub class_ids_by_student: HashMap<String, BTreeSet<String>>,
    pub enrollments_by_class: HashMap<String, Vec<Enrollment>>,
    pub skipped: usize,
}

impl EnrollmentIndex {
    pub fn build(enrollments: &[Enrollment]) -> EnrollmentIndex {
        let mut index = EnrollmentIndex::default();
        for e in enrollments {
            let (Some(class_id), Some(student_id)) = (e.class.id(), e.student.id()) else {
                tracing::warn!(enrollment = %e.id, "skipping enrollment with unresolvable reference");
                index.skipped += 1;
                continue;
            };
            // Enrolled-count is independent of attendance marking.
            *index.count_by_class.entry(class_id.to_string()).or_insert(0) += 1;
            index
                .class_ids_by_student
                .entry(student_id.to_string())
                .or_default()
                .insert(class_id.to_string());
            index
                .enrollments_by_class
                .entry(class_id.to_string())
                .or_default()
                .push(e.clone());
        }
        index
    }

    pub fn enrolled_count(&self, class_id: &str) -> usize {
        self.count_by_class.get(class_id).copied().unwrap_or(0)
    }

    pub fn is_enrolled(&self, student_id: &str, class_id: &str) -> bool {
        self.class_ids_by_student
            .get(student_id)
            .map(|set| set.contains(class_id))
            .unwrap_or(false)
    }
}

/// Attendance rate with a distinct no-data sentinel. Zero attendance and
/// "nothing marked yet" must never be conflated; the sentinel serializes as
/// the string "N/A" where a rate serializes as a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Percentage {
    Value(f64),
    NotAvailable,
}

impl Percentage {
    pub fn rounded(self, places: u32) -> Percentage {
        match self {
            Percentage::Value(v) => Percentage::Value(round_to(v, places)),
            Percentage::NotAvailable => Percentage::NotAvailable,
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Percentage::Value(v) => serializer.serialize_f64(*v),
            Percentage::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFilter {
    pub subject_id: Option<String>,
    pub teacher_id: Option<String>,
    pub class_type: Option<String>,
    pub class_id: Option<String>,
}

impl AttendanceFilter {
    pub fn is_empty(&self) -> bool {
        self.subject_id.is_none()
            && self.teacher_id.is_none()
            && self.class_type.is_none()
            && self.class_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    /// Marked records only: total == present + absent.
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    /// Records with no boolean attendance value. Never part of `total`.
    pub unmarked: usize,
    pub percentage: Percentage,
}

/// Builds a by-id class lookup once per aggregation call, so filters that
/// need the class -> subject/professor chain never re-resolve per record.
pub fn class_lookup(classes: &[ClassSession]) -> HashMap<&str, &ClassSession> {
    classes.iter().map(|c| (c.id.as_str(), c)).collect()
}

fn matches_filter(
    e: &Enrollment,
    lookup: &HashMap<&str, &ClassSession>,
    filter: &AttendanceFilter,
) -> bool {
    if filter.is_empty() {
        return true;
    }
    // Any filter needs the class join; a dangling class reference cannot
    // match, but it does not abort the aggregation either.
    let Some(class_id) = e.class.id() else {
        return false;
    };
    if let Some(want) = &filter.class_id {
        if class_id != want {
            return false;
        }
    }
    let Some(class) = lookup.get(class_id) else {
        return false;
    };
    if let Some(want) = &filter.subject_id {
        if class.subject.id() != Some(want.as_str()) {
            return false;
        }
    }
    if let Some(want) = &filter.teacher_id {
        if class.professor.id() != Some(want.as_str()) {
            return false;
        }
    }
    if let Some(want) = &filter.class_type {
        if class.class_type.as_deref() != Some(want.as_str()) {
            return false;
        }
    }
    true
}

pub fn aggregate_attendance(
    enrollments: &[Enrollment],
    lookup: &HashMap<&str, &ClassSession>,
    filter: &AttendanceFilter,
) -> AttendanceSummary {
    let mut present = 0usize;
    let mut absent = 0usize;
    let mut unmarked = 0usize;

    for e in enrollments {
        if !matches_filter(e, lookup, filter) {
            continue;
        }
        match e.attendance {
            Some(true) => present += 1,
            Some(false) => absent += 1,
            None => unmarked += 1,
        }
    }

    let total = present + absent;
    let percentage = if total == 0 {
        Percentage::NotAvailable
    } else {
        Percentage::Value(present as f64 / total as f64 * 100.0)
    };

    AttendanceSummary {
        total,
        present,
        absent,
        unmarked,
        percentage,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchedulePartition {
    pub past: Vec<ClassSession>,
    pub today: Vec<ClassSession>,
    pub upcoming: Vec<ClassSession>,
}

/// Calendar-day partition relative to "now" in the caller's zone:
/// midnight-to-midnight, not a rolling 24-hour window. Every input class
/// lands in exactly one bucket; buckets sort by start, ties by id.
pub fn partition_schedule(
    classes: &[ClassSession],
    now_ms: i64,
    tz_offset_minutes: i32,
) -> SchedulePartition {
    let today = local_day(now_ms, tz_offset_minutes);
    let mut partition = SchedulePartition::default();

    for class in classes {
        let day = local_day(class.start_ms, tz_offset_minutes);
        if day == today {
            partition.today.push(class.clone());
        } else if day > today {
            partition.upcoming.push(class.clone());
        } else {
            partition.past.push(class.clone());
        }
    }

    for bucket in [
        &mut partition.past,
        &mut partition.today,
        &mut partition.upcoming,
    ] {
        bucket.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then_with(|| a.id.cmp(&b.id)));
    }
    partition
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayClassCount {
    /// Full ISO date, so consumers are not stuck with the ambiguous label.
    pub date: NaiveDate,
    /// Chart label, day/month. Ambiguous across years; kept as-is.
    pub label: String,
    pub class_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRollup {
    pub teacher_count: usize,
    pub student_count: usize,
    pub today_class_count: usize,
    pub unmarked_session_count: usize,
    pub attendance_by_date: Vec<DayClassCount>,
}

pub fn rollup(
    users: &[User],
    classes: &[ClassSession],
    enrollments: &[Enrollment],
    now_ms: i64,
    tz_offset_minutes: i32,
) -> DashboardRollup {
    // Roles form a set: one account may count toward both totals.
    let teacher_count = users.iter().filter(|u| u.roles.contains(&Role::Teacher)).count();
    let student_count = users.iter().filter(|u| u.roles.contains(&Role::Student)).count();

    let today_class_count = partition_schedule(classes, now_ms, tz_offset_minutes)
        .today
        .len();

    let unmarked_session_count = enrollments.iter().filter(|e| !e.is_marked()).count();

    let mut counts_by_day: HashMap<NaiveDate, usize> = HashMap::new();
    for class in classes {
        *counts_by_day
            .entry(local_day(class.start_ms, tz_offset_minutes))
            .or_insert(0) += 1;
    }
    let mut days: Vec<NaiveDate> = counts_by_day.keys().copied().collect();
    days.sort();
    // Most recent 5 distinct days with at least one class, chronological.
    let recent = days.split_off(days.len().saturating_sub(5));
    let attendance_by_date = recent
        .into_iter()
        .map(|date| DayClassCount {
            date,
            label: format!("{:02}/{:02}", chrono::Datelike::day(&date), chrono::Datelike::month(&date)),
            class_count: counts_by_day[&date],
        })
        .collect();

    DashboardRollup {
        teacher_count,
        student_count,
        today_class_count,
        unmarked_session_count,
        attendance_by_date,
    }
}
