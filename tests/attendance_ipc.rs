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

struct Fixture {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    workspace: PathBuf,
    class_id: String,
    next_id: u64,
}

impl Fixture {
    fn call_raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = format!("r{}", self.next_id);
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call_raw(method, params);
        assert!(
            resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn error_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let resp = self.call_raw(method, params);
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }

    fn add_student(&mut self, last: &str, first: &str) -> String {
        let class_id = self.class_id.clone();
        self.call(
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": first }),
        )
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
    }

    fn sheet(&mut self, date: &str) -> Vec<serde_json::Value> {
        let class_id = self.class_id.clone();
        self.call(
            "attendance.get",
            json!({ "classId": class_id, "date": date }),
        )
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("entries")
    }
}

fn setup(prefix: &str) -> Fixture {
    let workspace = temp_dir(prefix);
    let (child, stdin, reader) = spawn_sidecar();
    let mut fx = Fixture {
        child,
        stdin,
        reader,
        workspace: workspace.clone(),
        class_id: String::new(),
        next_id: 0,
    };
    let _ = fx.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school_id = fx
        .call("schools.create", json!({ "name": "Сэцэн Хан" }))
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    fx.class_id = fx
        .call(
            "classes.create",
            json!({ "schoolId": school_id, "name": "7Б" }),
        )
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    fx
}

#[test]
fn sheet_lists_roster_with_unmarked_students_as_null() {
    let mut fx = setup("schoold-attendance-sheet");

    let a = fx.add_student("Ану", "Сар");
    let b = fx.add_student("Бат", "Нар");
    let c = fx.add_student("Цэцэг", "Од");

    let _ = fx.call(
        "attendance.record",
        json!({ "studentId": a, "date": "2025-09-15", "status": "present" }),
    );
    let _ = fx.call(
        "attendance.record",
        json!({ "studentId": c, "date": "2025-09-15", "status": "late" }),
    );

    let entries = fx.sheet("2025-09-15");
    assert_eq!(entries.len(), 3);

    // Roster order is preserved; b was never marked.
    assert_eq!(
        entries[0].get("studentId").and_then(|v| v.as_str()),
        Some(a.as_str())
    );
    assert_eq!(
        entries[0].get("status").and_then(|v| v.as_str()),
        Some("present")
    );
    assert_eq!(
        entries[1].get("studentId").and_then(|v| v.as_str()),
        Some(b.as_str())
    );
    assert!(entries[1].get("status").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(
        entries[2].get("status").and_then(|v| v.as_str()),
        Some("late")
    );

    // Another day starts blank.
    let entries = fx.sheet("2025-09-16");
    assert!(entries.iter().all(|e| e
        .get("status")
        .map(|v| v.is_null())
        .unwrap_or(false)));

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn remarking_a_day_overwrites_the_status() {
    let mut fx = setup("schoold-attendance-remark");

    let a = fx.add_student("Ану", "Сар");

    let _ = fx.call(
        "attendance.record",
        json!({ "studentId": a, "date": "2025-09-15", "status": "absent" }),
    );
    // Case-insensitive on the way in.
    let _ = fx.call(
        "attendance.record",
        json!({ "studentId": a, "date": "2025-09-15", "status": "Excused" }),
    );

    let entries = fx.sheet("2025-09-15");
    assert_eq!(
        entries[0].get("status").and_then(|v| v.as_str()),
        Some("excused")
    );

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn bad_status_date_or_student_is_rejected() {
    let mut fx = setup("schoold-attendance-bad");

    let a = fx.add_student("Ану", "Сар");

    let code = fx.error_code(
        "attendance.record",
        json!({ "studentId": a, "date": "2025-09-15", "status": "vacationing" }),
    );
    assert_eq!(code, "bad_params");

    let code = fx.error_code(
        "attendance.record",
        json!({ "studentId": a, "date": "15.09.2025", "status": "present" }),
    );
    assert_eq!(code, "bad_params");

    let code = fx.error_code(
        "attendance.record",
        json!({ "studentId": "missing-student", "date": "2025-09-15", "status": "present" }),
    );
    assert_eq!(code, "not_found");

    let code = fx.error_code(
        "attendance.get",
        json!({ "classId": "missing-class", "date": "2025-09-15" }),
    );
    assert_eq!(code, "not_found");

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}
