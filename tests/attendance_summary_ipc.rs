use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const HOUR: i64 = 3_600_000;
const NOW: i64 = 1_710_072_000_000;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seed_collection(workspace: &PathBuf, name: &str, docs: serde_json::Value) {
    let path = workspace.join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(&docs).expect("encode"))
        .expect("write collection file");
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn pct(summary: &serde_json::Value) -> f64 {
    summary["percentage"].as_f64().expect("numeric percentage")
}

/// Two classes under two teachers, a mix of marked/unmarked records, plus
/// an enrollment whose class was deleted out from under it. Reference
/// encodings deliberately vary: path string, bare id, ref object.
fn seeded_workspace(prefix: &str) -> PathBuf {
    let ws = temp_dir(prefix);
    seed_collection(
        &ws,
        "users",
        json!([
            { "id": "u1", "name": "Ana", "roles": ["student"] },
            { "id": "u2", "name": "Ben", "roles": ["student"] },
            { "id": "u3", "name": "Cleo", "roles": ["student"] },
            { "id": "u4", "name": "Dov", "roles": ["student"] },
            { "id": "t1", "name": "Prof Eve", "roles": ["teacher"], "subjects": ["Algebra"] },
            { "id": "t2", "name": "Prof Fox", "roles": ["teacher"], "subjects": ["Biology"] }
        ]),
    );
    seed_collection(
        &ws,
        "subjects",
        json!([
            { "id": "s1", "name": "Algebra" },
            { "id": "s2", "name": "Biology" }
        ]),
    );
    seed_collection(&ws, "classType", json!([{ "id": "ct1", "name": "lecture" }]));
    seed_collection(
        &ws,
        "classes",
        json!([
            {
                "id": "c1",
                "subject": "subjects/s1",
                "professor": "users/t1",
                "classType": "lecture",
                "start": NOW - 2 * HOUR,
                "end": NOW - HOUR
            },
            {
                "id": "c2",
                "subject": { "id": "s2" },
                "professor": "t2",
                "classType": "lecture",
                "start": NOW - 2 * HOUR,
                "end": NOW - HOUR
            }
        ]),
    );
    seed_collection(
        &ws,
        "enrolment",
        json!([
            { "id": "e1", "student": "users/u1", "class": "classes/c1", "attendance": true },
            { "id": "e2", "student": "u2", "class": "c1", "attendance": false },
            { "id": "e3", "student": { "id": "u3" }, "class": { "id": "c1" } },
            { "id": "e6", "student": "users/u4", "class": "classes/c1", "attendance": false },
            { "id": "e4", "student": "users/u1", "class": "classes/c2", "attendance": true },
            { "id": "e5", "student": "users/u1", "class": "classes/deleted", "attendance": true }
        ]),
    );
    ws
}

#[test]
fn summary_decomposes_marked_records_and_keeps_unmarked_separate() {
    let ws = seeded_workspace("rosterd-att-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );

    let before = request_ok(&mut stdin, &mut reader, "r2", "attendance.summary", json!({}));
    let s = &before["summary"];
    assert_eq!(s["present"], json!(3));
    assert_eq!(s["absent"], json!(2));
    assert_eq!(s["total"], json!(5), "total counts marked records only");
    assert_eq!(s["unmarked"], json!(1));
    assert!((pct(s) - 60.0).abs() < 1e-9);

    // Marking the unmarked record present moves exactly one unit.
    request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "attendance.mark",
        json!({ "enrollmentId": "e3", "present": true }),
    );
    let after = request_ok(&mut stdin, &mut reader, "r4", "attendance.summary", json!({}));
    let t = &after["summary"];
    assert_eq!(t["present"], json!(4));
    assert_eq!(t["absent"], json!(2));
    assert_eq!(t["total"], json!(6));
    assert_eq!(t["unmarked"], json!(0));
    // Admin view rounds to one decimal.
    assert!((pct(t) - 66.7).abs() < 1e-9);

    // Re-marking the same value is an idempotent retry.
    request_ok(
        &mut stdin,
        &mut reader,
        "r5",
        "attendance.mark",
        json!({ "enrollmentId": "e3", "present": true }),
    );
    let again = request_ok(&mut stdin, &mut reader, "r6", "attendance.summary", json!({}));
    assert_eq!(again["summary"], after["summary"]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn teacher_and_subject_filters_follow_the_class_reference_chain() {
    let ws = seeded_workspace("rosterd-att-filters");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );

    let by_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.summary",
        json!({ "filters": { "teacherId": "t1" } }),
    );
    let s = &by_teacher["summary"];
    assert_eq!(s["total"], json!(3));
    assert_eq!(s["present"], json!(1));
    assert_eq!(s["absent"], json!(2));
    assert!((pct(s) - 33.3).abs() < 1e-9);

    let by_subject = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "attendance.summary",
        json!({ "filters": { "subjectId": "s2" } }),
    );
    assert_eq!(by_subject["summary"]["total"], json!(1));
    assert!((pct(&by_subject["summary"]) - 100.0).abs() < 1e-9);

    // The dangling-class record can never match a class-joined filter.
    let by_deleted = request_ok(
        &mut stdin,
        &mut reader,
        "r4",
        "attendance.summary",
        json!({ "filters": { "teacherId": "nobody" } }),
    );
    assert_eq!(by_deleted["summary"]["percentage"], json!("N/A"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn roster_lists_every_enrollment_for_a_class_with_mark_state() {
    let ws = seeded_workspace("rosterd-att-roster");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.roster",
        json!({ "classId": "c1" }),
    );
    let rows = roster["roster"].as_array().expect("roster rows");
    assert_eq!(rows.len(), 4);
    let e3 = rows
        .iter()
        .find(|r| r["enrollmentId"] == json!("e3"))
        .expect("e3 row");
    assert_eq!(e3["studentName"], json!("Cleo"));
    assert_eq!(e3["attendance"], json!(null));

    // Mark from the roster, then re-read it.
    request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "attendance.mark",
        json!({ "enrollmentId": "e3", "present": false }),
    );
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "r4",
        "attendance.roster",
        json!({ "classId": "c1" }),
    );
    let e3 = again["roster"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["enrollmentId"] == json!("e3"))
        .expect("e3 row");
    assert_eq!(e3["attendance"], json!(false));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn student_summary_rounds_to_whole_numbers_and_uses_the_sentinel() {
    let ws = seeded_workspace("rosterd-att-student");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );

    // u1 is marked present in c1, c2 and the deleted class: 3/3.
    let u1 = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "attendance.studentSummary",
        json!({ "studentId": "u1" }),
    );
    assert_eq!(u1["summary"]["total"], json!(3));
    assert!((pct(&u1["summary"]) - 100.0).abs() < 1e-9);

    // u3 only has an unmarked record: no data, not zero.
    let u3 = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "attendance.studentSummary",
        json!({ "studentId": "u3" }),
    );
    assert_eq!(u3["summary"]["unmarked"], json!(1));
    assert_eq!(u3["summary"]["percentage"], json!("N/A"));

    // A student with no enrollments at all: same sentinel.
    let ghost = request_ok(
        &mut stdin,
        &mut reader,
        "r4",
        "attendance.studentSummary",
        json!({ "studentId": "nobody" }),
    );
    assert_eq!(ghost["summary"]["total"], json!(0));
    assert_eq!(ghost["summary"]["percentage"], json!("N/A"));

    drop(stdin);
    let _ = child.wait();
}
