use serde_json::json;

use crate::agg::{aggregate_attendance, class_lookup, partition_schedule, rollup, AttendanceFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::classes::{class_json, now_ms, tz_offset_minutes};
use crate::ipc::types::{AppState, Request};
use crate::store::DocumentStore;

fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a DocumentStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_dashboard_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let now = now_ms(req);
    let tz = match tz_offset_minutes(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let summary = rollup(
        &snapshot.users,
        &snapshot.classes,
        &snapshot.enrollments,
        now,
        tz,
    );

    let mut result = serde_json::to_value(&summary).unwrap_or_default();
    result["generation"] = json!(snapshot.generation);
    ok(&req.id, result)
}

fn handle_dashboard_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let now = now_ms(req);
    let tz = match tz_offset_minutes(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let own_classes: Vec<_> = snapshot
        .classes
        .iter()
        .filter(|c| c.professor.id() == Some(teacher_id))
        .cloned()
        .collect();
    let partition = partition_schedule(&own_classes, now, tz);

    let lookup = class_lookup(&snapshot.classes);
    let mut attendance = aggregate_attendance(
        &snapshot.enrollments,
        &lookup,
        &AttendanceFilter {
            teacher_id: Some(teacher_id.to_string()),
            ..Default::default()
        },
    );
    attendance.percentage = attendance.percentage.rounded(1);

    ok(
        &req.id,
        json!({
            "generation": snapshot.generation,
            "teacherId": teacher_id,
            "classCount": own_classes.len(),
            "todayClassCount": partition.today.len(),
            "today": partition.today.iter().map(class_json).collect::<Vec<_>>(),
            "upcoming": partition.upcoming.iter().map(class_json).collect::<Vec<_>>(),
            "attendance": serde_json::to_value(&attendance).unwrap_or_default(),
            // Sessions this teacher still has to mark.
            "unmarkedSessionCount": attendance.unmarked,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.overview" => Some(handle_dashboard_overview(state, req)),
        "dashboard.teacher" => Some(handle_dashboard_teacher(state, req)),
        _ => None,
    }
}
