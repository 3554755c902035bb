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
    school_id: String,
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

    fn call_err(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call_raw(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp.get("error").cloned().expect("error object")
    }

    fn add_season(&mut self, name: &str, start: &str, end: &str) -> String {
        let school_id = self.school_id.clone();
        self.call(
            "seasons.create",
            json!({ "schoolId": school_id, "name": name, "startDate": start, "endDate": end }),
        )
        .get("seasonId")
        .and_then(|v| v.as_str())
        .expect("seasonId")
        .to_string()
    }

    fn add_class(&mut self, name: &str) -> String {
        let school_id = self.school_id.clone();
        self.call(
            "classes.create",
            json!({ "schoolId": school_id, "name": name }),
        )
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string()
    }

    fn add_teacher(&mut self, last: &str, first: &str) -> String {
        let school_id = self.school_id.clone();
        self.call(
            "teachers.create",
            json!({ "schoolId": school_id, "lastName": last, "firstName": first }),
        )
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string()
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
        school_id: String::new(),
        next_id: 0,
    };
    let _ = fx.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    fx.school_id = fx
        .call("schools.create", json!({ "name": "Эрдмийн Далай" }))
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    fx
}

#[test]
fn season_dates_are_validated() {
    let mut fx = setup("schoold-season-dates");

    let school_id = fx.school_id.clone();
    let e = fx.call_err(
        "seasons.create",
        json!({ "schoolId": school_id, "name": "Намар", "startDate": "2025/09/01", "endDate": "2025-11-01" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let school_id = fx.school_id.clone();
    let e = fx.call_err(
        "seasons.create",
        json!({ "schoolId": school_id, "name": "Намар", "startDate": "2025-11-01", "endDate": "2025-09-01" }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let season_id = fx.add_season("Намар", "2025-09-01", "2025-11-01");

    // Patching one bound re-checks the whole window.
    let e = fx.call_err(
        "seasons.update",
        json!({ "seasonId": season_id, "patch": { "endDate": "2025-08-01" } }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("bad_params"));

    let _ = fx.call(
        "seasons.update",
        json!({ "seasonId": season_id, "patch": { "endDate": "2025-12-20" } }),
    );

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn set_active_keeps_exactly_one_season_active() {
    let mut fx = setup("schoold-season-active");

    let autumn = fx.add_season("Намар", "2025-09-01", "2025-11-01");
    let winter = fx.add_season("Өвөл", "2025-11-10", "2026-01-20");

    let school_id = fx.school_id.clone();
    let _ = fx.call(
        "seasons.setActive",
        json!({ "schoolId": school_id, "seasonId": autumn }),
    );
    let school_id = fx.school_id.clone();
    let res = fx.call(
        "seasons.setActive",
        json!({ "schoolId": school_id, "seasonId": winter }),
    );
    assert_eq!(
        res.get("activeSeasonId").and_then(|v| v.as_str()),
        Some(winter.as_str())
    );

    let school_id = fx.school_id.clone();
    let seasons = fx
        .call("seasons.list", json!({ "schoolId": school_id }))
        .get("seasons")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("seasons");
    let active: Vec<&str> = seasons
        .iter()
        .filter(|s| s.get("active").and_then(|v| v.as_bool()) == Some(true))
        .map(|s| s.get("id").and_then(|v| v.as_str()).expect("id"))
        .collect();
    assert_eq!(active, vec![winter.as_str()]);

    // A season from another school cannot be activated here.
    let other = fx
        .call("schools.create", json!({ "name": "Өөр сургууль" }))
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    let e = fx.call_err(
        "seasons.setActive",
        json!({ "schoolId": other, "seasonId": autumn }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn overlapping_lessons_in_one_class_are_rejected() {
    let mut fx = setup("schoold-schedule-class");

    let season = fx.add_season("Намар", "2025-09-01", "2025-11-01");
    let class = fx.add_class("8Д");

    let _ = fx.call(
        "schedule.create",
        json!({
            "classId": class, "seasonId": season, "subject": "Математик",
            "dayOfWeek": 1, "startMin": 480, "endMin": 560
        }),
    );

    let e = fx.call_err(
        "schedule.create",
        json!({
            "classId": class, "seasonId": season, "subject": "Физик",
            "dayOfWeek": 1, "startMin": 520, "endMin": 600
        }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("conflict"));
    let conflicts = e
        .get("details")
        .and_then(|d| d.get("conflicts"))
        .and_then(|v| v.as_array())
        .cloned()
        .expect("conflicts detail");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].get("subject").and_then(|v| v.as_str()),
        Some("Математик")
    );

    // Back-to-back is fine; intervals are half-open.
    let _ = fx.call(
        "schedule.create",
        json!({
            "classId": class, "seasonId": season, "subject": "Физик",
            "dayOfWeek": 1, "startMin": 560, "endMin": 640
        }),
    );

    // Same slot on another weekday is fine too.
    let _ = fx.call(
        "schedule.create",
        json!({
            "classId": class, "seasonId": season, "subject": "Физик",
            "dayOfWeek": 2, "startMin": 480, "endMin": 560
        }),
    );

    let lessons = fx
        .call(
            "schedule.list",
            json!({ "classId": class, "seasonId": season }),
        )
        .get("lessons")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("lessons");
    assert_eq!(lessons.len(), 3);
    assert_eq!(
        lessons[0].get("startMin").and_then(|v| v.as_i64()),
        Some(480)
    );

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn teacher_cannot_be_booked_into_two_classes_at_once() {
    let mut fx = setup("schoold-schedule-teacher");

    let season = fx.add_season("Намар", "2025-09-01", "2025-11-01");
    let class_a = fx.add_class("8Д");
    let class_b = fx.add_class("9В");
    let teacher = fx.add_teacher("Дорж", "Сүрэн");

    let _ = fx.call(
        "schedule.create",
        json!({
            "classId": class_a, "seasonId": season, "subject": "Хими",
            "teacherId": teacher, "dayOfWeek": 3, "startMin": 600, "endMin": 680
        }),
    );

    let e = fx.call_err(
        "schedule.create",
        json!({
            "classId": class_b, "seasonId": season, "subject": "Хими",
            "teacherId": teacher, "dayOfWeek": 3, "startMin": 640, "endMin": 720
        }),
    );
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("conflict"));

    // Without the shared teacher the same slot in the other class is allowed.
    let _ = fx.call(
        "schedule.create",
        json!({
            "classId": class_b, "seasonId": season, "subject": "Биологи",
            "dayOfWeek": 3, "startMin": 640, "endMin": 720
        }),
    );

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}

#[test]
fn seasons_with_lessons_refuse_deletion() {
    let mut fx = setup("schoold-season-delete");

    let season = fx.add_season("Намар", "2025-09-01", "2025-11-01");
    let class = fx.add_class("8Д");
    let lesson = fx
        .call(
            "schedule.create",
            json!({
                "classId": class, "seasonId": season, "subject": "Түүх",
                "dayOfWeek": 5, "startMin": 480, "endMin": 560
            }),
        )
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId")
        .to_string();

    let e = fx.call_err("seasons.delete", json!({ "seasonId": season }));
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("conflict"));

    let _ = fx.call("schedule.delete", json!({ "lessonId": lesson }));
    let _ = fx.call("seasons.delete", json!({ "seasonId": season }));

    let e = fx.call_err("schedule.delete", json!({ "lessonId": lesson }));
    assert_eq!(e.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let _ = fx.child.kill();
    let _ = std::fs::remove_dir_all(&fx.workspace);
}
