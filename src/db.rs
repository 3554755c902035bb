use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            city TEXT,
            address TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            subject TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            teacher_id TEXT,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_school ON classes(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS seasons(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seasons_school ON seasons(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            season_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_min INTEGER NOT NULL,
            end_min INTEGER NOT NULL,
            subject TEXT NOT NULL,
            teacher_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(season_id) REFERENCES seasons(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_class_season ON lessons(class_id, season_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_teacher ON lessons(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_days(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_id, date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_days_date ON attendance_days(date)",
        [],
    )?;

    // One grading scheme per class: five named components with point weights.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_components(
            class_id TEXT PRIMARY KEY,
            attendance_name TEXT NOT NULL,
            attendance_weight REAL NOT NULL,
            activity_name TEXT NOT NULL,
            activity_weight REAL NOT NULL,
            midterm_name TEXT NOT NULL,
            midterm_weight REAL NOT NULL,
            final_name TEXT NOT NULL,
            final_weight REAL NOT NULL,
            total_name TEXT NOT NULL,
            total_weight REAL NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_grades(
            student_id TEXT NOT NULL,
            semester TEXT NOT NULL,
            attendance REAL,
            activity REAL,
            midterm REAL,
            final REAL,
            updated_at TEXT,
            PRIMARY KEY(student_id, semester),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    ensure_students_email(&conn)?;
    ensure_teachers_subject(&conn)?;

    Ok(conn)
}

fn ensure_students_email(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces tracked students without an email column.
    if table_has_column(conn, "students", "email")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN email TEXT", [])?;
    Ok(())
}

fn ensure_teachers_subject(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "teachers", "subject")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE teachers ADD COLUMN subject TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
