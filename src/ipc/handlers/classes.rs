use serde_json::json;
use uuid::Uuid;

use crate::agg::{partition_schedule, EnrollmentIndex};
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, ClassSession, COLLECTION_CLASSES, COLLECTION_SUBJECTS, COLLECTION_USERS};
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

pub fn now_ms(req: &Request) -> i64 {
    model::timestamp_ms(req.params.get("now")).unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
}

/// UTC offsets only go to +14:00/-12:00; anything outside that band is a
/// caller bug, not a timezone.
const TZ_OFFSET_BOUND_MINUTES: i64 = 18 * 60;

pub fn tz_offset_minutes(req: &Request) -> Result<i32, serde_json::Value> {
    match req.params.get("tzOffsetMinutes") {
        None => Ok(0),
        Some(raw) => match raw.as_i64() {
            Some(v) if v.abs() <= TZ_OFFSET_BOUND_MINUTES => Ok(v as i32),
            _ => Err(err(
                &req.id,
                "bad_params",
                format!("tzOffsetMinutes out of range: {raw}"),
                None,
            )),
        },
    }
}

pub fn class_json(c: &ClassSession) -> serde_json::Value {
    json!({
        "id": c.id,
        "subjectId": c.subject.id(),
        "professorId": c.professor.id(),
        "classType": c.class_type,
        "start": c.start_ms,
        "end": c.end_ms,
        "additionalNotes": c.additional_notes,
        "peopleLimit": c.people_limit,
    })
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    // Enrolled counts come from the shared index so list and eligibility
    // views never disagree.
    let snapshot = store.snapshot();
    let index = EnrollmentIndex::build(&snapshot.enrollments);

    let classes: Vec<serde_json::Value> = snapshot
        .classes
        .iter()
        .map(|c| {
            let mut row = class_json(c);
            row["enrolledCount"] = json!(index.enrolled_count(&c.id));
            row
        })
        .collect();

    ok(&req.id, json!({ "generation": snapshot.generation, "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let professor_id = match required_str(req, "professorId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_type = match required_str(req, "classType") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(start) = model::timestamp_ms(req.params.get("start")) else {
        return err(&req.id, "bad_params", "missing or invalid start", None);
    };
    let Some(end) = model::timestamp_ms(req.params.get("end")) else {
        return err(&req.id, "bad_params", "missing or invalid end", None);
    };
    if end <= start {
        return err(&req.id, "bad_params", "end must be after start", None);
    }
    let people_limit = req.params.get("peopleLimit").and_then(|v| v.as_i64());
    if let Some(limit) = people_limit {
        if limit < 0 {
            return err(&req.id, "bad_params", "peopleLimit must not be negative", None);
        }
    }

    let class_id = Uuid::new_v4().to_string();
    let doc = json!({
        "id": class_id,
        "subject": format!("{COLLECTION_SUBJECTS}/{subject_id}"),
        "professor": format!("{COLLECTION_USERS}/{professor_id}"),
        "classType": class_type,
        "start": start,
        "end": end,
        "additionalNotes": req.params.get("additionalNotes").and_then(|v| v.as_str()),
        "peopleLimit": people_limit,
    });
    match store.insert(COLLECTION_CLASSES, doc) {
        Ok(()) => ok(&req.id, json!({ "classId": class_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Deliberately no cascade: enrollments pointing at the deleted class
    // stay behind and every aggregation treats them as dangling.
    match store.remove(COLLECTION_CLASSES, &class_id) {
        Ok(()) => ok(&req.id, json!({ "classId": class_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_classes_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let partition = partition_schedule(&snapshot.classes, now, tz);

    ok(
        &req.id,
        json!({
            "generation": snapshot.generation,
            "today": partition.today.iter().map(class_json).collect::<Vec<_>>(),
            "upcoming": partition.upcoming.iter().map(class_json).collect::<Vec<_>>(),
            "past": partition.past.iter().map(class_json).collect::<Vec<_>>(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "classes.schedule" => Some(handle_classes_schedule(state, req)),
        _ => None,
    }
}
