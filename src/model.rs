use std::collections::BTreeSet;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

use crate::refs::{self, RefOutcome};

pub const COLLECTION_USERS: &str = "users";
pub const COLLECTION_SUBJECTS: &str = "subjects";
pub const COLLECTION_CLASS_TYPES: &str = "classType";
pub const COLLECTION_CLASSES: &str = "classes";
pub const COLLECTION_ENROLMENTS: &str = "enrolment";

pub const ALL_COLLECTIONS: [&str; 5] = [
    COLLECTION_USERS,
    COLLECTION_SUBJECTS,
    COLLECTION_CLASS_TYPES,
    COLLECTION_CLASSES,
    COLLECTION_ENROLMENTS,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Account document. `roles` is a set, not an enum: one user may hold any
/// combination. Teacher accounts carry `subjects` as an ordered list of
/// subject *names* (a historical quirk; classes reference subjects by id).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub age: Option<i64>,
    pub email: Option<String>,
    pub roles: BTreeSet<Role>,
    pub subjects: Vec<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassType {
    pub id: String,
    pub name: String,
}

/// A scheduled class session. Subject and professor stay as resolution
/// outcomes: a dangling or malformed reference still yields a usable class
/// row (it just joins to "unknown").
#[derive(Debug, Clone)]
pub struct ClassSession {
    pub id: String,
    pub subject: RefOutcome,
    pub professor: RefOutcome,
    pub class_type: Option<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub additional_notes: Option<String>,
    /// Absent/null means unlimited.
    pub people_limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub id: String,
    pub student: RefOutcome,
    pub class: RefOutcome,
    pub enrolled_at_ms: Option<i64>,
    /// None = not yet marked. True/false = present/absent. A non-boolean
    /// value in the document decodes to unmarked with a warning.
    pub attendance: Option<bool>,
}

impl Enrollment {
    pub fn is_marked(&self) -> bool {
        self.attendance.is_some()
    }
}

fn doc_id(doc: &Value) -> Option<String> {
    doc.get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn str_field(doc: &Value, key: &str) -> Option<String> {
    doc.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Timestamps appear as epoch milliseconds or as RFC 3339 strings,
/// depending on which client version wrote the document.
pub fn timestamp_ms(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

pub fn decode_user(doc: &Value) -> Option<User> {
    let id = doc_id(doc)?;
    let roles = doc
        .get("roles")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(Role::parse)
                .collect::<BTreeSet<_>>()
        })
        .unwrap_or_default();
    let subjects = doc
        .get("subjects")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    Some(User {
        id,
        name: str_field(doc, "name").unwrap_or_default(),
        age: doc.get("age").and_then(|v| v.as_i64()),
        email: str_field(doc, "email"),
        roles,
        subjects,
        profile_picture: str_field(doc, "profilePicture"),
    })
}

pub fn decode_subject(doc: &Value) -> Option<Subject> {
    Some(Subject {
        id: doc_id(doc)?,
        name: str_field(doc, "name").unwrap_or_default(),
    })
}

pub fn decode_class_type(doc: &Value) -> Option<ClassType> {
    Some(ClassType {
        id: doc_id(doc)?,
        name: str_field(doc, "name").unwrap_or_default(),
    })
}

pub fn decode_class(doc: &Value) -> Option<ClassSession> {
    let id = doc_id(doc)?;
    let start_ms = timestamp_ms(doc.get("start"))?;
    let end_ms = timestamp_ms(doc.get("end")).unwrap_or(start_ms);
    Some(ClassSession {
        id,
        subject: refs::resolve(doc.get("subject")),
        professor: refs::resolve(doc.get("professor")),
        class_type: str_field(doc, "classType"),
        start_ms,
        end_ms,
        additional_notes: str_field(doc, "additionalNotes"),
        people_limit: doc
            .get("peopleLimit")
            .filter(|v| !v.is_null())
            .and_then(|v| v.as_i64()),
    })
}

pub fn decode_enrollment(doc: &Value) -> Option<Enrollment> {
    let id = doc_id(doc)?;
    let attendance = match doc.get("attendance") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            tracing::warn!(
                enrollment = %id,
                value = %other,
                "non-boolean attendance value treated as unmarked"
            );
            None
        }
    };
    Some(Enrollment {
        id,
        student: refs::resolve(doc.get("student")),
        class: refs::resolve(doc.get("class")),
        enrolled_at_ms: timestamp_ms(doc.get("enrolledAt")),
        attendance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roles_decode_as_a_set_and_ignore_unknown_entries() {
        let u = decode_user(&json!({
            "id": "u1",
            "name": "Dana",
            "roles": ["teacher", "TEACHER", "student", "superuser"]
        }))
        .expect("decode user");
        assert!(u.roles.contains(&Role::Teacher));
        assert!(u.roles.contains(&Role::Student));
        assert_eq!(u.roles.len(), 2);
    }

    #[test]
    fn class_timestamps_accept_millis_and_rfc3339() {
        let by_millis = decode_class(&json!({
            "id": "c1",
            "subject": "subjects/s1",
            "professor": "u9",
            "start": 1_700_000_000_000i64,
            "end": 1_700_003_600_000i64
        }))
        .expect("decode class");
        assert_eq!(by_millis.start_ms, 1_700_000_000_000);

        let by_string = decode_class(&json!({
            "id": "c2",
            "start": "2023-11-14T22:13:20Z",
            "end": "2023-11-14T23:13:20Z"
        }))
        .expect("decode class");
        assert_eq!(by_string.start_ms, 1_700_000_000_000);
    }

    #[test]
    fn class_without_start_is_undecodable_but_not_a_panic() {
        assert!(decode_class(&json!({ "id": "c3" })).is_none());
    }

    #[test]
    fn non_boolean_attendance_decodes_to_unmarked() {
        let e = decode_enrollment(&json!({
            "id": "e1",
            "student": "u1",
            "class": "c1",
            "attendance": "yes"
        }))
        .expect("decode enrollment");
        assert_eq!(e.attendance, None);
        assert!(!e.is_marked());
    }

    #[test]
    fn people_limit_null_means_unlimited() {
        let c = decode_class(&json!({
            "id": "c4",
            "start": 0,
            "end": 1,
            "peopleLimit": null
        }))
        .expect("decode class");
        assert_eq!(c.people_limit, None);
    }
}
