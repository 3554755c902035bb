use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result_of(resp: serde_json::Value, method: &str) -> serde_json::Value {
    assert!(
        resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        resp
    );
    resp.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn setup(
    prefix: &str,
) -> (
    Child,
    ChildStdin,
    BufReader<ChildStdout>,
    PathBuf,
    String,
) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = result_of(resp, "workspace.select");
    let resp = request(
        &mut stdin,
        &mut reader,
        "setup-2",
        "schools.create",
        json!({ "name": "Ирээдүй" }),
    );
    let school_id = result_of(resp, "schools.create")
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    let resp = request(
        &mut stdin,
        &mut reader,
        "setup-3",
        "classes.create",
        json!({ "schoolId": school_id, "name": "11А" }),
    );
    let class_id = result_of(resp, "classes.create")
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    (child, stdin, reader, workspace, class_id)
}

fn settings_payload(attendance: f64, activity: f64, midterm: f64, final_w: f64) -> serde_json::Value {
    json!({
        "attendance": { "name": "Ирц", "weight": attendance },
        "activity": { "name": "Идэвх", "weight": activity },
        "midterm": { "name": "Явц", "weight": midterm },
        "final": { "name": "Улирал", "weight": final_w },
        "total": { "name": "Нийт", "weight": 100.0 }
    })
}

#[test]
fn first_access_seeds_default_components() {
    let (mut child, mut stdin, mut reader, workspace, class_id) =
        setup("schoold-components-defaults");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.componentsGet",
        json!({ "classId": class_id }),
    );
    let settings = result_of(resp, "grades.componentsGet")
        .get("settings")
        .cloned()
        .expect("settings");
    assert_eq!(
        settings
            .get("attendance")
            .and_then(|c| c.get("weight"))
            .and_then(|v| v.as_f64()),
        Some(10.0)
    );
    assert_eq!(
        settings
            .get("final")
            .and_then(|c| c.get("weight"))
            .and_then(|v| v.as_f64()),
        Some(50.0)
    );

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn weights_must_sum_to_one_hundred() {
    let (mut child, mut stdin, mut reader, workspace, class_id) = setup("schoold-components-sum");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.componentsUpdate",
        json!({ "classId": class_id, "settings": settings_payload(10.0, 10.0, 30.0, 49.0) }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.componentsUpdate",
        json!({ "classId": class_id, "settings": settings_payload(20.0, 20.0, 25.0, 35.0) }),
    );
    let _ = result_of(resp, "grades.componentsUpdate");

    // The accepted scheme round-trips, names included.
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.componentsGet",
        json!({ "classId": class_id }),
    );
    let settings = result_of(resp, "grades.componentsGet")
        .get("settings")
        .cloned()
        .expect("settings");
    assert_eq!(
        settings
            .get("midterm")
            .and_then(|c| c.get("name"))
            .and_then(|v| v.as_str()),
        Some("Явц")
    );
    assert_eq!(
        settings
            .get("activity")
            .and_then(|c| c.get("weight"))
            .and_then(|v| v.as_f64()),
        Some(20.0)
    );

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn negative_weights_are_rejected() {
    let (mut child, mut stdin, mut reader, workspace, class_id) = setup("schoold-components-neg");

    // Sums to 100 but one allocation is negative.
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.componentsUpdate",
        json!({ "classId": class_id, "settings": settings_payload(-10.0, 30.0, 30.0, 50.0) }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reweighting_does_not_rescale_stored_scores() {
    let (mut child, mut stdin, mut reader, workspace, class_id) =
        setup("schoold-components-rescale");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "classId": class_id, "lastName": "Ану", "firstName": "Тэст" }),
    );
    let student_id = result_of(resp, "students.create")
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.update",
        json!({
            "studentId": student_id,
            "semester": "1",
            "grades": { "attendance": 8, "activity": 7, "midterm": 25, "final": 35 }
        }),
    );
    let _ = result_of(resp, "grades.update");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.componentsUpdate",
        json!({ "classId": class_id, "settings": settings_payload(25.0, 25.0, 25.0, 25.0) }),
    );
    let _ = result_of(resp, "grades.componentsUpdate");

    // Totals stay raw point sums under the new weights; nothing is rescaled
    // retroactively. Inherited additive semantics, pinned on purpose.
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.table",
        json!({ "classId": class_id, "sortBy": "score", "semester": "1" }),
    );
    let rows = result_of(resp, "grades.table")
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("rows");
    assert_eq!(
        rows[0]
            .get("semesterScores")
            .and_then(|s| s.get("1"))
            .and_then(|v| v.as_f64()),
        Some(75.0)
    );

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
