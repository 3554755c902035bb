use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school_id = req
        .params
        .get("schoolId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let (sql, binds): (&str, Vec<Value>) = match &school_id {
        Some(id) => (
            "SELECT id, school_id, last_name, first_name, email, subject
             FROM teachers WHERE school_id = ? ORDER BY last_name, first_name",
            vec![Value::Text(id.clone())],
        ),
        None => (
            "SELECT id, school_id, last_name, first_name, email, subject
             FROM teachers ORDER BY last_name, first_name",
            Vec::new(),
        ),
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let id: String = row.get(0)?;
            let school_id: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let first_name: String = row.get(3)?;
            let email: Option<String> = row.get(4)?;
            let subject: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "schoolId": school_id,
                "lastName": last_name,
                "firstName": first_name,
                "email": email,
                "subject": subject
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school_id = match req.params.get("schoolId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolId", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let school_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if school_exists.is_none() {
        return err(&req.id, "not_found", "school not found", None);
    }

    let teacher_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, school_id, last_name, first_name, email, subject, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &school_id,
            &last_name,
            &first_name,
            &email,
            &subject,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for (key, column) in [("lastName", "last_name"), ("firstName", "first_name")] {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", key),
                    None,
                );
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", key),
                    None,
                );
            }
            set_parts.push(format!("{} = ?", column));
            bind_values.push(Value::Text(s));
        }
    }
    for key in ["email", "subject"] {
        if let Some(v) = patch.get(key) {
            if v.is_null() {
                set_parts.push(format!("{} = ?", key));
                bind_values.push(Value::Null);
            } else if let Some(s) = v.as_str() {
                set_parts.push(format!("{} = ?", key));
                bind_values.push(Value::Text(s.trim().to_string()));
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string or null", key),
                    None,
                );
            }
        }
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    set_parts.push("updated_at = ?".into());
    bind_values.push(Value::Text(Utc::now().to_rfc3339()));

    let sql = format!("UPDATE teachers SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(teacher_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "teachers" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let lesson_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE teacher_id = ?",
        [&teacher_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if lesson_count > 0 {
        return err(
            &req.id,
            "conflict",
            "teacher is still scheduled for lessons",
            Some(json!({ "lessonCount": lesson_count })),
        );
    }

    // Homeroom links are soft; clear them rather than block the delete.
    if let Err(e) = conn.execute(
        "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let changed = match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
