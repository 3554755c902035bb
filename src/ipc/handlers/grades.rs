use crate::calc::{
    self, GradeComponentsSettings, SemesterGrades, SortOrder, Student, ViewMode, SEMESTER_KEYS,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

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

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

/// Load the class's grading scheme, seeding the stock one on first access.
fn load_components(
    conn: &Connection,
    class_id: &str,
) -> Result<GradeComponentsSettings, HandlerErr> {
    let row: Option<GradeComponentsSettings> = conn
        .query_row(
            "SELECT attendance_name, attendance_weight, activity_name, activity_weight,
                    midterm_name, midterm_weight, final_name, final_weight,
                    total_name, total_weight
             FROM grade_components WHERE class_id = ?",
            [class_id],
            |r| {
                Ok(GradeComponentsSettings {
                    attendance: calc::GradeComponent {
                        name: r.get(0)?,
                        weight: r.get(1)?,
                    },
                    activity: calc::GradeComponent {
                        name: r.get(2)?,
                        weight: r.get(3)?,
                    },
                    midterm: calc::GradeComponent {
                        name: r.get(4)?,
                        weight: r.get(5)?,
                    },
                    final_exam: calc::GradeComponent {
                        name: r.get(6)?,
                        weight: r.get(7)?,
                    },
                    total: calc::GradeComponent {
                        name: r.get(8)?,
                        weight: r.get(9)?,
                    },
                })
            },
        )
        .optional()
        .map_err(db_err)?;

    if let Some(settings) = row {
        return Ok(settings);
    }

    let defaults = GradeComponentsSettings::defaults();
    store_components(conn, class_id, &defaults)?;
    Ok(defaults)
}

fn store_components(
    conn: &Connection,
    class_id: &str,
    settings: &GradeComponentsSettings,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO grade_components(
            class_id,
            attendance_name, attendance_weight,
            activity_name, activity_weight,
            midterm_name, midterm_weight,
            final_name, final_weight,
            total_name, total_weight)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id) DO UPDATE SET
           attendance_name = excluded.attendance_name,
           attendance_weight = excluded.attendance_weight,
           activity_name = excluded.activity_name,
           activity_weight = excluded.activity_weight,
           midterm_name = excluded.midterm_name,
           midterm_weight = excluded.midterm_weight,
           final_name = excluded.final_name,
           final_weight = excluded.final_weight,
           total_name = excluded.total_name,
           total_weight = excluded.total_weight",
        rusqlite::params![
            class_id,
            settings.attendance.name,
            settings.attendance.weight,
            settings.activity.name,
            settings.activity.weight,
            settings.midterm.name,
            settings.midterm.weight,
            settings.final_exam.name,
            settings.final_exam.weight,
            settings.total.name,
            settings.total.weight,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "grade_components" })),
    })?;
    Ok(())
}

fn semester_grades_row(row: &rusqlite::Row<'_>) -> Result<(String, SemesterGrades), rusqlite::Error> {
    let semester: String = row.get(0)?;
    Ok((
        semester,
        SemesterGrades {
            attendance: row.get(1)?,
            activity: row.get(2)?,
            midterm: row.get(3)?,
            final_exam: row.get(4)?,
        },
    ))
}

fn load_students_with_grades(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<Student>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, email FROM students
             WHERE class_id = ? ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let mut students = stmt
        .query_map([class_id], |row| {
            Ok(Student {
                id: row.get(0)?,
                last_name: row.get(1)?,
                first_name: row.get(2)?,
                email: row.get(3)?,
                grades: BTreeMap::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT g.semester, g.attendance, g.activity, g.midterm, g.final, g.student_id
             FROM semester_grades g
             JOIN students s ON s.id = g.student_id
             WHERE s.class_id = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([class_id], |row| {
            let (semester, grades) = semester_grades_row(row)?;
            let student_id: String = row.get(5)?;
            Ok((student_id, semester, grades))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, s) in students.iter().enumerate() {
        index.insert(s.id.clone(), i);
    }
    for (student_id, semester, grades) in rows {
        if let Some(&i) = index.get(&student_id) {
            students[i].grades.insert(semester, grades);
        }
    }

    Ok(students)
}

fn components_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let settings = load_components(conn, &class_id)?;
    let settings = serde_json::to_value(&settings).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "settings": settings }))
}

fn components_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let Some(raw) = params.get("settings") else {
        return Err(bad_params("missing settings"));
    };
    let settings: GradeComponentsSettings =
        serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid settings: {}", e),
            details: None,
        })?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    for c in [
        &settings.attendance,
        &settings.activity,
        &settings.midterm,
        &settings.final_exam,
    ] {
        if c.name.trim().is_empty() {
            return Err(bad_params("component names must not be empty"));
        }
        if c.weight < 0.0 {
            return Err(HandlerErr {
                code: "bad_params",
                message: "component weights must not be negative".to_string(),
                details: Some(json!({ "component": c.name, "weight": c.weight })),
            });
        }
    }

    // The one place the 100-point invariant is enforced; the calculator never
    // re-checks it.
    let sum = settings.scoring_weight_sum();
    if (sum - 100.0).abs() > 1e-9 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "component weights must sum to 100".to_string(),
            details: Some(json!({ "weightSum": sum })),
        });
    }

    store_components(conn, &class_id, &settings)?;
    Ok(json!({ "ok": true }))
}

fn grades_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let semester = get_required_str(params, "semester")?;
    if !SEMESTER_KEYS.contains(&semester.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "semester must be one of: 1, 2, 3, 4".to_string(),
            details: Some(json!({ "semester": semester })),
        });
    }
    let Some(raw) = params.get("grades") else {
        return Err(bad_params("missing grades"));
    };
    let grades: SemesterGrades = serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
        code: "bad_params",
        message: format!("invalid grades: {}", e),
        details: None,
    })?;

    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    // Edit-time clamp: raw points live in [0, component weight]. Totals later
    // just add whatever is stored, so this is where the bound applies.
    let settings = load_components(conn, &class_id)?;
    let clamp = |v: Option<f64>, weight: f64| v.map(|x| x.clamp(0.0, weight));
    let stored = SemesterGrades {
        attendance: clamp(grades.attendance, settings.attendance.weight),
        activity: clamp(grades.activity, settings.activity.weight),
        midterm: clamp(grades.midterm, settings.midterm.weight),
        final_exam: clamp(grades.final_exam, settings.final_exam.weight),
    };

    conn.execute(
        "INSERT INTO semester_grades(student_id, semester, attendance, activity, midterm, final, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, semester) DO UPDATE SET
           attendance = excluded.attendance,
           activity = excluded.activity,
           midterm = excluded.midterm,
           final = excluded.final,
           updated_at = excluded.updated_at",
        rusqlite::params![
            student_id,
            semester,
            stored.attendance,
            stored.activity,
            stored.midterm,
            stored.final_exam,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "semester_grades" })),
    })?;

    let stored_json = serde_json::to_value(stored).unwrap_or_else(|_| json!({}));
    Ok(json!({ "ok": true, "stored": stored_json }))
}

fn grades_table(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let sort_by = get_required_str(params, "sortBy")?;

    let order: SortOrder = match params.get("order") {
        None => SortOrder::Asc,
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| bad_params("order must be 'asc' or 'desc'"))?,
    };
    let view_mode: ViewMode = match params.get("viewMode") {
        None => ViewMode::Semester,
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|_| bad_params("viewMode must be 'semester' or 'yearEnd'"))?,
    };
    let semester = match params.get("semester").and_then(|v| v.as_str()) {
        Some(s) if SEMESTER_KEYS.contains(&s) => s.to_string(),
        Some(s) => {
            return Err(HandlerErr {
                code: "bad_params",
                message: "semester must be one of: 1, 2, 3, 4".to_string(),
                details: Some(json!({ "semester": s })),
            })
        }
        None => "1".to_string(),
    };

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let settings = load_components(conn, &class_id)?;
    let students = load_students_with_grades(conn, &class_id)?;

    let mut yearly_averages: HashMap<String, f64> = HashMap::new();
    for s in &students {
        yearly_averages.insert(s.id.clone(), calc::yearly_average(&s.grades, &settings));
    }

    let sorted = match sort_by.as_str() {
        "score" => calc::sort_students_by_score(
            &students,
            &semester,
            &settings,
            &yearly_averages,
            view_mode,
            order,
        ),
        "name" => calc::sort_students_by_name(&students, order),
        other => {
            return Err(HandlerErr {
                code: "bad_params",
                message: "sortBy must be 'score' or 'name'".to_string(),
                details: Some(json!({ "sortBy": other })),
            })
        }
    };

    let rows: Vec<serde_json::Value> = sorted
        .iter()
        .map(|s| {
            let scores = calc::semester_scores(&s.grades, &settings);
            json!({
                "studentId": s.id,
                "lastName": s.last_name,
                "firstName": s.first_name,
                "email": s.email,
                "semesterScores": scores,
                "yearlyAverage": yearly_averages.get(&s.id).copied().unwrap_or(0.0)
            })
        })
        .collect();

    let settings_json = serde_json::to_value(&settings).unwrap_or_else(|_| json!({}));
    Ok(json!({
        "settings": settings_json,
        "semester": semester,
        "rows": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler = match req.method.as_str() {
        "grades.componentsGet" => components_get,
        "grades.componentsUpdate" => components_update,
        "grades.update" => grades_update,
        "grades.table" => grades_table,
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
