use serde_json::{json, Value};
use uuid::Uuid;

use crate::agg::EnrollmentIndex;
use crate::error::CoreError;
use crate::model::{self, ClassSession, COLLECTION_CLASSES, COLLECTION_ENROLMENTS, COLLECTION_USERS};
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    AlreadyStarted,
    AlreadyEnrolled,
    ClassFull,
}

impl EligibilityReason {
    pub fn code(self) -> &'static str {
        match self {
            EligibilityReason::AlreadyStarted => "class_already_started",
            EligibilityReason::AlreadyEnrolled => "already_enrolled",
            EligibilityReason::ClassFull => "class_full",
        }
    }

    fn into_error(self) -> CoreError {
        match self {
            EligibilityReason::AlreadyStarted => CoreError::ClassAlreadyStarted,
            EligibilityReason::AlreadyEnrolled => CoreError::DuplicateEnrollment,
            EligibilityReason::ClassFull => CoreError::CapacityExceeded,
        }
    }
}

/// Outcome of the advisory pre-check. A rejection is a structured decision,
/// not an error; only the write path turns it into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityDecision {
    pub allowed: bool,
    pub reason: Option<EligibilityReason>,
}

impl EligibilityDecision {
    fn rejected(reason: EligibilityReason) -> Self {
        EligibilityDecision {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Rules in order; the first failing rule names the reason.
pub fn check_eligibility(
    student_id: &str,
    class: &ClassSession,
    index: &EnrollmentIndex,
    now_ms: i64,
) -> EligibilityDecision {
    if class.start_ms <= now_ms {
        return EligibilityDecision::rejected(EligibilityReason::AlreadyStarted);
    }
    if index.is_enrolled(student_id, &class.id) {
        return EligibilityDecision::rejected(EligibilityReason::AlreadyEnrolled);
    }
    if let Some(limit) = class.people_limit {
        if index.enrolled_count(&class.id) as i64 >= limit {
            return EligibilityDecision::rejected(EligibilityReason::ClassFull);
        }
    }
    EligibilityDecision {
        allowed: true,
        reason: None,
    }
}

/// Conditional enrollment write. The eligibility rules are re-evaluated
/// against a freshly built index inside the store lock, so two concurrent
/// requests cannot both pass the capacity check before either insert lands.
pub fn enroll_student(
    store: &DocumentStore,
    student_id: &str,
    class_id: &str,
    now_ms: i64,
) -> Result<Value, CoreError> {
    store.with_documents_mut(|tx| {
        let student_exists = tx
            .docs(COLLECTION_USERS)
            .iter()
            .any(|d| d.get("id").and_then(|v| v.as_str()) == Some(student_id));
        if !student_exists {
            return Err(CoreError::not_found(COLLECTION_USERS, student_id));
        }

        let class = tx
            .docs(COLLECTION_CLASSES)
            .iter()
            .find(|d| d.get("id").and_then(|v| v.as_str()) == Some(class_id))
            .and_then(model::decode_class)
            .ok_or_else(|| CoreError::not_found(COLLECTION_CLASSES, class_id))?;

        let enrollments: Vec<_> = tx
            .docs(COLLECTION_ENROLMENTS)
            .iter()
            .filter_map(model::decode_enrollment)
            .collect();
        let index = EnrollmentIndex::build(&enrollments);

        let decision = check_eligibility(student_id, &class, &index, now_ms);
        if let Some(reason) = decision.reason {
            return Err(reason.into_error());
        }

        let doc = json!({
            "id": Uuid::new_v4().to_string(),
            "student": format!("{COLLECTION_USERS}/{student_id}"),
            "class": format!("{COLLECTION_CLASSES}/{class_id}"),
            "enrolledAt": now_ms,
        });
        tx.insert(COLLECTION_ENROLMENTS, doc.clone());
        tracing::info!(student = student_id, class = class_id, "enrollment created");
        Ok(doc)
    })
}

pub fn drop_enrollment(store: &DocumentStore, enrollment_id: &str) -> Result<(), CoreError> {
    store.remove(COLLECTION_ENROLMENTS, enrollment_id)?;
    tracing::info!(enrollment = enrollment_id, "enrollment dropped");
    Ok(())
}

/// Sets the attendance boolean. Idempotent: marking the same value twice is
/// a no-op for readers, so callers may retry on transport failure.
pub fn mark_attendance(
    store: &DocumentStore,
    enrollment_id: &str,
    present: bool,
) -> Result<(), CoreError> {
    store.set_field(
        COLLECTION_ENROLMENTS,
        enrollment_id,
        "attendance",
        Value::Bool(present),
    )
}
