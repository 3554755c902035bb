use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MINUTES_PER_DAY: i64 = 24 * 60;

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

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(format!("missing/invalid {}", key)))
}

#[derive(Debug, Clone)]
struct LessonRow {
    id: String,
    class_id: String,
    day_of_week: i64,
    start_min: i64,
    end_min: i64,
    subject: String,
    teacher_id: Option<String>,
}

impl LessonRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "classId": self.class_id,
            "dayOfWeek": self.day_of_week,
            "startMin": self.start_min,
            "endMin": self.end_min,
            "subject": self.subject,
            "teacherId": self.teacher_id
        })
    }
}

/// Half-open interval overlap on the same day of week.
fn overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

fn class_school(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT school_id FROM classes WHERE id = ?",
        [class_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)
}

fn schedule_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let season_id = get_required_str(params, "seasonId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, day_of_week, start_min, end_min, subject, teacher_id
             FROM lessons WHERE class_id = ? AND season_id = ?
             ORDER BY day_of_week, start_min",
        )
        .map_err(db_err)?;
    let lessons = stmt
        .query_map((&class_id, &season_id), |row| {
            Ok(LessonRow {
                id: row.get(0)?,
                class_id: row.get(1)?,
                day_of_week: row.get(2)?,
                start_min: row.get(3)?,
                end_min: row.get(4)?,
                subject: row.get(5)?,
                teacher_id: row.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let lessons: Vec<serde_json::Value> = lessons.iter().map(LessonRow::to_json).collect();
    Ok(json!({ "lessons": lessons }))
}

fn schedule_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let season_id = get_required_str(params, "seasonId")?;
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if subject.is_empty() {
        return Err(bad_params("subject must not be empty"));
    }
    let day_of_week = get_required_i64(params, "dayOfWeek")?;
    if !(1..=7).contains(&day_of_week) {
        return Err(bad_params("dayOfWeek must be between 1 and 7"));
    }
    let start_min = get_required_i64(params, "startMin")?;
    let end_min = get_required_i64(params, "endMin")?;
    if start_min < 0 || end_min > MINUTES_PER_DAY || start_min >= end_min {
        return Err(HandlerErr {
            code: "bad_params",
            message: "lesson times must satisfy 0 <= startMin < endMin <= 1440".to_string(),
            details: Some(json!({ "startMin": start_min, "endMin": end_min })),
        });
    }
    let teacher_id = params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let Some(school_id) = class_school(conn, &class_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    };

    let season_ok: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM seasons WHERE id = ? AND school_id = ?",
            (&season_id, &school_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if season_ok.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "season not found in this school".to_string(),
            details: None,
        });
    }

    if let Some(tid) = &teacher_id {
        let teacher_ok: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM teachers WHERE id = ? AND school_id = ?",
                (tid, &school_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if teacher_ok.is_none() {
            return Err(HandlerErr {
                code: "not_found",
                message: "teacher not found in this school".to_string(),
                details: None,
            });
        }
    }

    // Candidates for a clash: same class, or same teacher in any class, on the
    // same weekday within the season.
    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, day_of_week, start_min, end_min, subject, teacher_id
             FROM lessons
             WHERE season_id = ? AND day_of_week = ?
               AND (class_id = ? OR (teacher_id IS NOT NULL AND teacher_id = ?))",
        )
        .map_err(db_err)?;
    let candidates = stmt
        .query_map(
            (&season_id, day_of_week, &class_id, &teacher_id),
            |row| {
                Ok(LessonRow {
                    id: row.get(0)?,
                    class_id: row.get(1)?,
                    day_of_week: row.get(2)?,
                    start_min: row.get(3)?,
                    end_min: row.get(4)?,
                    subject: row.get(5)?,
                    teacher_id: row.get(6)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let clashes: Vec<serde_json::Value> = candidates
        .iter()
        .filter(|l| overlaps(start_min, end_min, l.start_min, l.end_min))
        .map(LessonRow::to_json)
        .collect();
    if !clashes.is_empty() {
        return Err(HandlerErr {
            code: "conflict",
            message: "lesson time overlaps an existing lesson".to_string(),
            details: Some(json!({ "conflicts": clashes })),
        });
    }

    let lesson_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, class_id, season_id, day_of_week, start_min, end_min, subject, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &lesson_id,
            &class_id,
            &season_id,
            day_of_week,
            start_min,
            end_min,
            &subject,
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "lessons" })),
    })?;

    Ok(json!({ "lessonId": lesson_id }))
}

fn schedule_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let lesson_id = get_required_str(params, "lessonId")?;

    let changed = conn
        .execute("DELETE FROM lessons WHERE id = ?", [&lesson_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "lesson not found".to_string(),
            details: None,
        });
    }

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "schedule.list" => schedule_list,
        "schedule.create" => schedule_create,
        "schedule.delete" => schedule_delete,
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
