use serde_json::Value;

/// Canonical identifier extracted from any of the persisted foreign-key
/// encodings. Documents accumulated three shapes over the system's history:
/// a path-like string ("classes/abc123"), a bare id string, and a reference
/// object exposing an `id` field. Nothing outside this module branches on
/// reference shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefOutcome {
    Resolved(EntityRef),
    /// Field absent or null. The record is unusable for joins but must not
    /// abort an aggregation pass.
    Missing,
    /// Shape we have never stored (number, array, object without an id).
    Malformed,
}

impl RefOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            RefOutcome::Resolved(r) => Some(&r.id),
            _ => None,
        }
    }
}

pub fn resolve(value: Option<&Value>) -> RefOutcome {
    let Some(value) = value else {
        return RefOutcome::Missing;
    };
    match value {
        Value::Null => RefOutcome::Missing,
        Value::Object(obj) => match obj.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => RefOutcome::Resolved(EntityRef { id: id.to_string() }),
            _ => {
                tracing::warn!(shape = "object", "malformed reference: object without id");
                RefOutcome::Malformed
            }
        },
        Value::String(s) => {
            let tail = match s.rsplit_once('/') {
                Some((_, tail)) => tail,
                None => s.as_str(),
            };
            if tail.is_empty() {
                tracing::warn!(raw = %s, "malformed reference: empty id segment");
                RefOutcome::Malformed
            } else {
                RefOutcome::Resolved(EntityRef {
                    id: tail.to_string(),
                })
            }
        }
        other => {
            tracing::warn!(shape = %kind_name(other), "malformed reference: unsupported shape");
            RefOutcome::Malformed
        }
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_all_three_persisted_encodings_to_the_same_id() {
        let as_path = json!("classes/c42");
        let as_bare = json!("c42");
        let as_object = json!({ "id": "c42", "path": "classes/c42" });

        for v in [&as_path, &as_bare, &as_object] {
            assert_eq!(resolve(Some(v)).id(), Some("c42"));
        }
    }

    #[test]
    fn path_resolution_uses_segment_after_last_slash() {
        let nested = json!("projects/p1/databases/d1/classes/c9");
        assert_eq!(resolve(Some(&nested)).id(), Some("c9"));
    }

    #[test]
    fn missing_and_null_are_unresolved_not_errors() {
        assert_eq!(resolve(None), RefOutcome::Missing);
        assert_eq!(resolve(Some(&Value::Null)), RefOutcome::Missing);
    }

    #[test]
    fn unsupported_shapes_are_malformed() {
        assert_eq!(resolve(Some(&json!(17))), RefOutcome::Malformed);
        assert_eq!(resolve(Some(&json!(["classes/c1"]))), RefOutcome::Malformed);
        assert_eq!(resolve(Some(&json!({ "ref": "c1" }))), RefOutcome::Malformed);
        assert_eq!(resolve(Some(&json!("classes/"))), RefOutcome::Malformed);
    }
}
