use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_schools_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, name, city, address FROM schools ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let city: Option<String> = row.get(2)?;
            let address: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "city": city,
                "address": address
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(schools) => ok(&req.id, json!({ "schools": schools })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schools_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let city = req
        .params
        .get("city")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let address = req
        .params
        .get("address")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());

    let school_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name, city, address, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&school_id, &name, &city, &address, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }

    ok(&req.id, json!({ "schoolId": school_id }))
}

fn handle_schools_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school_id = match req.params.get("schoolId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
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
    for key in ["city", "address"] {
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

    let sql = format!("UPDATE schools SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(school_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "schools" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "school not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_schools_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let school_id = match req.params.get("schoolId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing schoolId", None),
    };

    let class_count: i64 = match conn
        .query_row(
            "SELECT COUNT(*) FROM classes WHERE school_id = ?",
            [&school_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_count > 0 {
        return err(
            &req.id,
            "conflict",
            "school still has classes",
            Some(json!({ "classCount": class_count })),
        );
    }

    // Seasons and teachers hang off the school directly; clear them first.
    if let Err(e) = conn.execute("DELETE FROM seasons WHERE school_id = ?", [&school_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM teachers WHERE school_id = ?", [&school_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    let changed = match conn.execute("DELETE FROM schools WHERE id = ?", [&school_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "school not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.list" => Some(handle_schools_list(state, req)),
        "schools.create" => Some(handle_schools_create(state, req)),
        "schools.update" => Some(handle_schools_update(state, req)),
        "schools.delete" => Some(handle_schools_delete(state, req)),
        _ => None,
    }
}
