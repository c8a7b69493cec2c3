use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "coursedesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            city TEXT,
            contact_name TEXT,
            phone TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS instructors(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_instances(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            institution_id TEXT NOT NULL,
            instructor_id TEXT NOT NULL,
            grade_label TEXT NOT NULL DEFAULT '',
            lesson_mode TEXT NOT NULL DEFAULT 'template',
            start_date TEXT NOT NULL,
            end_date TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(institution_id) REFERENCES institutions(id),
            FOREIGN KEY(instructor_id) REFERENCES instructors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_instances_course ON course_instances(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_instances_institution ON course_instances(institution_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_instances_instructor ON course_instances(instructor_id)",
        [],
    )?;

    // course_instance_id NULL marks a template lesson shared by every
    // instance of the course; non-NULL marks an instance-specific lesson.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            course_instance_id TEXT,
            sort_order INTEGER NOT NULL,
            title TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            duration_minutes INTEGER,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(course_instance_id) REFERENCES course_instances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_instance ON lessons(course_instance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course_sort ON lessons(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_patterns(
            course_instance_id TEXT PRIMARY KEY,
            days_of_week_json TEXT NOT NULL,
            time_slots_json TEXT NOT NULL,
            total_lessons INTEGER,
            lesson_duration_minutes INTEGER NOT NULL,
            FOREIGN KEY(course_instance_id) REFERENCES course_instances(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS physical_schedules(
            id TEXT PRIMARY KEY,
            course_instance_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            scheduled_start TEXT NOT NULL,
            scheduled_end TEXT NOT NULL,
            FOREIGN KEY(course_instance_id) REFERENCES course_instances(id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            UNIQUE(course_instance_id, lesson_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_physical_schedules_instance ON physical_schedules(course_instance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_physical_schedules_lesson ON physical_schedules(lesson_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_physical_schedules_start ON physical_schedules(course_instance_id, scheduled_start)",
        [],
    )?;

    // Task-completion records hang off a lesson within one instance and
    // optionally pin the concrete occurrence they were filed against.
    // They must be removed before that occurrence can be deleted.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_task_records(
            id TEXT PRIMARY KEY,
            course_instance_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            physical_schedule_id TEXT,
            title TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY(course_instance_id) REFERENCES course_instances(id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(physical_schedule_id) REFERENCES physical_schedules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_instance ON lesson_task_records(course_instance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_lesson ON lesson_task_records(lesson_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_records_schedule ON lesson_task_records(physical_schedule_id)",
        [],
    )?;

    // end_date NULL means a single blocked day.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS blocked_dates(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL DEFAULT '',
            start_date TEXT NOT NULL,
            end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before lessons carried their own duration need
    // the column added.
    ensure_lessons_duration_minutes(&conn)?;

    Ok(conn)
}

fn ensure_lessons_duration_minutes(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "duration_minutes")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE lessons ADD COLUMN duration_minutes INTEGER", [])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
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
