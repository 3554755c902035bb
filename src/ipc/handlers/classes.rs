use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn teacher_in_school(
    conn: &Connection,
    teacher_id: &str,
    school_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
        (teacher_id, school_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
            "SELECT id, school_id, name, teacher_id FROM classes
             WHERE school_id = ? ORDER BY name",
            vec![Value::Text(id.clone())],
        ),
        None => (
            "SELECT id, school_id, name, teacher_id FROM classes ORDER BY name",
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
            let name: String = row.get(2)?;
            let teacher_id: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "schoolId": school_id,
                "name": name,
                "teacherId": teacher_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school_id = match req.params.get("schoolId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

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

    if let Some(tid) = &teacher_id {
        match teacher_in_school(conn, tid, &school_id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "teacher not found in this school",
                    None,
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let class_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, name, teacher_id, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &school_id, &name, &teacher_id, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let school_id: Option<String> = match conn
        .query_row(
            "SELECT school_id FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(school_id) = school_id else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("teacherId") {
        if v.is_null() {
            set_parts.push("teacher_id = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(tid) = v.as_str() {
            match teacher_in_school(conn, tid, &school_id) {
                Ok(true) => {}
                Ok(false) => {
                    return err(
                        &req.id,
                        "not_found",
                        "teacher not found in this school",
                        None,
                    )
                }
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
            set_parts.push("teacher_id = ?".into());
            bind_values.push(Value::Text(tid.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.teacherId must be a string or null",
                None,
            );
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

    let sql = format!("UPDATE classes SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(class_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "classes" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "class not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let student_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_count > 0 {
        return err(
            &req.id,
            "conflict",
            "class still has enrolled students",
            Some(json!({ "studentCount": student_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM lessons WHERE class_id = ?", [&class_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute(
        "DELETE FROM grade_components WHERE class_id = ?",
        [&class_id],
    ) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    let changed = match conn.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "class not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
