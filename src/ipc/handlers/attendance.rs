use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be an ISO date (YYYY-MM-DD)".to_string(),
        details: Some(json!({ "date": raw })),
    })
}

fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date_raw = get_required_str(params, "date")?;
    let status = get_required_str(params, "status")?.to_ascii_lowercase();

    let date = parse_date(&date_raw)?;
    if !STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be one of: present, absent, late, excused".to_string(),
            details: Some(json!({ "status": status })),
        });
    }

    let student_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if student_ok.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    conn.execute(
        "INSERT INTO attendance_days(student_id, date, status, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &student_id,
            date.to_string(),
            &status,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_days" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn attendance_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date(&date_raw)?;

    let class_ok: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if class_ok.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let mut status_by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, a.status
             FROM attendance_days a
             JOIN students s ON s.id = a.student_id
             WHERE s.class_id = ? AND a.date = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((&class_id, date.to_string()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (student_id, status) in rows {
        status_by_student.insert(student_id, status);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name FROM students
             WHERE class_id = ? ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let entries = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            Ok((id, last_name, first_name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let entries: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|(id, last_name, first_name)| {
            let status = status_by_student.get(&id).cloned();
            json!({
                "studentId": id,
                "lastName": last_name,
                "firstName": first_name,
                "status": status
            })
        })
        .collect();

    Ok(json!({ "date": date.to_string(), "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "attendance.record" => attendance_record,
        "attendance.get" => attendance_get,
        _ => return None,
    };

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    Some(match handler(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
