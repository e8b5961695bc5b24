use std::collections::HashMap;

use serde_json::json;

use crate::agg::{aggregate_attendance, class_lookup, AttendanceFilter, EnrollmentIndex};
use crate::enroll;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::DocumentStore;

fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a DocumentStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {key}"), None))
}

fn parse_filter(req: &Request) -> Result<AttendanceFilter, serde_json::Value> {
    match req.params.get("filters") {
        None => Ok(AttendanceFilter::default()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| err(&req.id, "bad_params", format!("invalid filters: {e}"), None)),
    }
}

/// Marking sheet for one class: every enrolled student with their current
/// mark state, so the caller renders one row per enrollment.
fn handle_attendance_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    if !snapshot.classes.iter().any(|c| c.id == class_id) {
        return err(&req.id, "not_found", format!("no class {class_id}"), None);
    }

    let users_by_id: HashMap<&str, &crate::model::User> =
        snapshot.users.iter().map(|u| (u.id.as_str(), u)).collect();

    let index = EnrollmentIndex::build(&snapshot.enrollments);
    let roster: Vec<serde_json::Value> = index
        .enrollments_by_class
        .get(&class_id)
        .map(|list| {
            list.iter()
                .map(|e| {
                    // A since-deleted student still occupies the row; the
                    // name is just unknown.
                    let name = e
                        .student
                        .id()
                        .and_then(|id| users_by_id.get(id))
                        .map(|u| u.name.clone());
                    json!({
                        "enrollmentId": e.id,
                        "studentId": e.student.id(),
                        "studentName": name,
                        "attendance": e.attendance,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ok(
        &req.id,
        json!({
            "generation": snapshot.generation,
            "classId": class_id,
            "roster": roster,
        }),
    )
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(present) = req.params.get("present").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing present", None);
    };

    match enroll::mark_attendance(store, &enrollment_id, present) {
        Ok(()) => ok(
            &req.id,
            json!({ "enrollmentId": enrollment_id, "attendance": present }),
        ),
        Err(e) => core_err(&req.id, &e),
    }
}

/// Admin/teacher view: 1-decimal percentage.
fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let filter = match parse_filter(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let lookup = class_lookup(&snapshot.classes);
    let mut summary = aggregate_attendance(&snapshot.enrollments, &lookup, &filter);
    summary.percentage = summary.percentage.rounded(1);

    ok(
        &req.id,
        json!({
            "generation": snapshot.generation,
            "summary": serde_json::to_value(&summary).unwrap_or_default(),
        }),
    )
}

/// Student-facing view: whole-number percentage.
fn handle_attendance_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter = match parse_filter(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let lookup = class_lookup(&snapshot.classes);
    let own: Vec<_> = snapshot
        .enrollments
        .iter()
        .filter(|e| e.student.id() == Some(student_id.as_str()))
        .cloned()
        .collect();
    let mut summary = aggregate_attendance(&own, &lookup, &filter);
    summary.percentage = summary.percentage.rounded(0);

    ok(
        &req.id,
        json!({
            "generation": snapshot.generation,
            "studentId": student_id,
            "summary": serde_json::to_value(&summary).unwrap_or_default(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.roster" => Some(handle_attendance_roster(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        "attendance.studentSummary" => Some(handle_attendance_student_summary(state, req)),
        _ => None,
    }
}
