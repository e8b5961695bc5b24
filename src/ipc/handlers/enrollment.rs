use serde_json::json;

use crate::agg::{class_lookup, EnrollmentIndex};
use crate::enroll;
use crate::error::CoreError;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::handlers::classes::{class_json, now_ms};
use crate::ipc::types::{AppState, Request};
use crate::refs::{self, RefOutcome};
use crate::store::DocumentStore;

fn store_ref<'a>(state: &'a AppState, req: &Request) -> Result<&'a DocumentStore, serde_json::Value> {
    state
        .store
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Id params go through the same resolver as persisted references, so a
/// caller may pass a bare id, a path, or a ref object interchangeably.
fn required_id(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match refs::resolve(req.params.get(key)) {
        RefOutcome::Resolved(r) => Ok(r.id),
        RefOutcome::Missing => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
        RefOutcome::Malformed => Err(core_err(
            &req.id,
            &CoreError::MalformedReference(key.to_string()),
        )),
    }
}

/// Advisory pre-check for the enroll flow. Always answers with a decision;
/// a rejection here is not an error. The write path re-checks on its own.
fn handle_enroll_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let student_id = match required_id(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_id(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let Some(class) = snapshot.classes.iter().find(|c| c.id == class_id) else {
        return err(&req.id, "not_found", format!("no class {class_id}"), None);
    };
    let index = EnrollmentIndex::build(&snapshot.enrollments);
    let decision = enroll::check_eligibility(&student_id, class, &index, now_ms(req));

    ok(
        &req.id,
        json!({
            "allowed": decision.allowed,
            "reason": decision.reason.map(|r| r.code()),
            "enrolledCount": index.enrolled_count(&class_id),
            "peopleLimit": class.people_limit,
        }),
    )
}

fn handle_enroll_request(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let student_id = match required_id(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match required_id(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match enroll::enroll_student(store, &student_id, &class_id, now_ms(req)) {
        Ok(doc) => ok(&req.id, json!({ "enrollment": doc })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_enroll_drop(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let enrollment_id = match required_id(req, "enrollmentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match enroll::drop_enrollment(store, &enrollment_id) {
        Ok(()) => ok(&req.id, json!({ "enrollmentId": enrollment_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_enroll_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match store_ref(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let student_id = match required_id(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let snapshot = store.snapshot();
    let lookup = class_lookup(&snapshot.classes);

    let rows: Vec<serde_json::Value> = snapshot
        .enrollments
        .iter()
        .filter(|e| e.student.id() == Some(student_id.as_str()))
        .map(|e| {
            // A dangling class reference still lists the enrollment; the
            // class field is just null.
            let class = e.class.id().and_then(|id| lookup.get(id)).map(|c| class_json(c));
            json!({
                "enrollmentId": e.id,
                "classId": e.class.id(),
                "enrolledAt": e.enrolled_at_ms,
                "attendance": e.attendance,
                "class": class,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({ "generation": snapshot.generation, "enrollments": rows }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enroll.check" => Some(handle_enroll_check(state, req)),
        "enroll.request" => Some(handle_enroll_request(state, req)),
        "enroll.drop" => Some(handle_enroll_drop(state, req)),
        "enroll.listForStudent" => Some(handle_enroll_list_for_student(state, req)),
        _ => None,
    }
}
