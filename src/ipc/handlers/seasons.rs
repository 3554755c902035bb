use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn parse_iso_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: format!("{} must be an ISO date (YYYY-MM-DD)", key),
        details: Some(json!({ key: raw })),
    })
}

fn school_exists(conn: &Connection, school_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn season_school(conn: &Connection, season_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT school_id FROM seasons WHERE id = ?",
        [season_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)
}

fn seasons_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "school not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date, active
             FROM seasons WHERE school_id = ? ORDER BY start_date",
        )
        .map_err(db_err)?;
    let seasons = stmt
        .query_map([&school_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let start_date: String = row.get(2)?;
            let end_date: String = row.get(3)?;
            let active: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "startDate": start_date,
                "endDate": end_date,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "seasons": seasons }))
}

fn seasons_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    let start_raw = get_required_str(params, "startDate")?;
    let end_raw = get_required_str(params, "endDate")?;
    let start = parse_iso_date(&start_raw, "startDate")?;
    let end = parse_iso_date(&end_raw, "endDate")?;
    if end <= start {
        return Err(HandlerErr {
            code: "bad_params",
            message: "endDate must be after startDate".to_string(),
            details: Some(json!({ "startDate": start_raw, "endDate": end_raw })),
        });
    }

    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "school not found".to_string(),
            details: None,
        });
    }

    let season_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO seasons(id, school_id, name, start_date, end_date, active)
         VALUES(?, ?, ?, ?, ?, 0)",
        (
            &season_id,
            &school_id,
            &name,
            start.to_string(),
            end.to_string(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "seasons" })),
    })?;

    Ok(json!({ "seasonId": season_id }))
}

fn seasons_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let season_id = get_required_str(params, "seasonId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing/invalid patch".to_string(),
            details: None,
        });
    };

    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT name, start_date, end_date FROM seasons WHERE id = ?",
            [&season_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((mut name, mut start_raw, mut end_raw)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "season not found".to_string(),
            details: None,
        });
    };

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "patch.name must be a string".to_string(),
                details: None,
            });
        };
        let s = s.trim();
        if s.is_empty() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "name must not be empty".to_string(),
                details: None,
            });
        }
        name = s.to_string();
    }
    if let Some(v) = patch.get("startDate") {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "patch.startDate must be a string".to_string(),
                details: None,
            });
        };
        start_raw = s.to_string();
    }
    if let Some(v) = patch.get("endDate") {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "patch.endDate must be a string".to_string(),
                details: None,
            });
        };
        end_raw = s.to_string();
    }

    // Validate the combined window, not just the patched half.
    let start = parse_iso_date(&start_raw, "startDate")?;
    let end = parse_iso_date(&end_raw, "endDate")?;
    if end <= start {
        return Err(HandlerErr {
            code: "bad_params",
            message: "endDate must be after startDate".to_string(),
            details: Some(json!({ "startDate": start_raw, "endDate": end_raw })),
        });
    }

    conn.execute(
        "UPDATE seasons SET name = ?, start_date = ?, end_date = ? WHERE id = ?",
        (&name, start.to_string(), end.to_string(), &season_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "seasons" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn seasons_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let season_id = get_required_str(params, "seasonId")?;

    let lesson_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM lessons WHERE season_id = ?",
            [&season_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if lesson_count > 0 {
        return Err(HandlerErr {
            code: "conflict",
            message: "season still has scheduled lessons".to_string(),
            details: Some(json!({ "lessonCount": lesson_count })),
        });
    }

    let changed = conn
        .execute("DELETE FROM seasons WHERE id = ?", [&season_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "season not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

fn seasons_set_active(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let season_id = get_required_str(params, "seasonId")?;

    match season_school(conn, &season_id)? {
        Some(owner) if owner == school_id => {}
        Some(_) | None => {
            return Err(HandlerErr {
                code: "not_found",
                message: "season not found in this school".to_string(),
                details: None,
            })
        }
    }

    // Single statement keeps the at-most-one-active invariant atomic.
    conn.execute(
        "UPDATE seasons SET active = CASE WHEN id = ? THEN 1 ELSE 0 END WHERE school_id = ?",
        (&season_id, &school_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "seasons" })),
    })?;

    Ok(json!({ "ok": true, "activeSeasonId": season_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "seasons.list" => seasons_list,
        "seasons.create" => seasons_create,
        "seasons.update" => seasons_update,
        "seasons.delete" => seasons_delete,
        "seasons.setActive" => seasons_set_active,
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
