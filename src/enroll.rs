use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::notify;

/// How a bulk assignment picks its students. Decoded once at the request
/// boundary; every variant has already had its inputs validated there.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetMode {
    Block { program: String, year_level: i64 },
    Section { section: String },
    Name { query: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRef {
    pub student_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnrollmentOutcome {
    pub added: i64,
    pub skipped: i64,
}

/// Class fields needed for enrollment and the notification texts.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: String,
    pub class_code: String,
    pub course_code: String,
    pub course_name: String,
    pub semester: String,
    pub academic_year: String,
    pub instructor_user_id: String,
}

pub fn load_class(conn: &Connection, class_id: &str) -> anyhow::Result<Option<ClassInfo>> {
    let info = conn
        .query_row(
            "SELECT c.id, c.class_code, co.course_code, co.course_name, c.semester, c.academic_year, i.user_id
             FROM classes c
             JOIN courses co ON co.id = c.course_id
             JOIN instructors i ON i.id = c.instructor_id
             WHERE c.id = ?",
            [class_id],
            |row| {
                Ok(ClassInfo {
                    id: row.get(0)?,
                    class_code: row.get(1)?,
                    course_code: row.get(2)?,
                    course_name: row.get(3)?,
                    semester: row.get(4)?,
                    academic_year: row.get(5)?,
                    instructor_user_id: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(info)
}

/// Resolves the targeted students. A well-formed filter that matches nobody
/// returns an empty list, not an error.
pub fn resolve_target_students(
    conn: &Connection,
    mode: &TargetMode,
) -> anyhow::Result<Vec<StudentRef>> {
    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRef> {
        Ok(StudentRef {
            student_id: row.get(0)?,
            user_id: row.get(1)?,
        })
    }

    let rows = match mode {
        TargetMode::Block { program, year_level } => {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.user_id FROM students s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.program = ? AND s.year_level = ?",
            )?;
            let rows = stmt
                .query_map((program, year_level), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        TargetMode::Section { section } => {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.user_id FROM students s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.section = ?",
            )?;
            let rows = stmt
                .query_map([section], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        TargetMode::Name { query } => {
            // Matches full name, last name, or first name as a
            // case-insensitive substring.
            let like = format!("%{}%", query);
            let mut stmt = conn.prepare(
                "SELECT s.id, s.user_id FROM students s
                 JOIN users u ON u.id = s.user_id
                 WHERE (u.first_name || ' ' || u.last_name) LIKE ? COLLATE NOCASE
                    OR u.last_name LIKE ? COLLATE NOCASE
                    OR u.first_name LIKE ? COLLATE NOCASE",
            )?;
            let rows = stmt
                .query_map((&like, &like, &like), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Enrolls each target into the class, skipping students already enrolled.
/// A single failed insert counts the student as skipped and never aborts the
/// batch; the (student_id, class_id) unique constraint backs up the
/// existence check under concurrent assigns.
pub fn enroll_students(
    conn: &Connection,
    class: &ClassInfo,
    targets: &[StudentRef],
) -> EnrollmentOutcome {
    let mut outcome = EnrollmentOutcome::default();

    for st in targets {
        let already: Result<Option<i64>, _> = conn
            .query_row(
                "SELECT 1 FROM enrollments WHERE student_id = ? AND class_id = ?",
                (&st.student_id, &class.id),
                |r| r.get(0),
            )
            .optional();
        match already {
            Ok(Some(_)) => {
                outcome.skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(_) => {
                outcome.skipped += 1;
                continue;
            }
        }

        let inserted = conn.execute(
            "INSERT INTO enrollments(id, student_id, class_id, status, enrolled_at)
             VALUES(?, ?, ?, 'enrolled', ?)",
            (
                Uuid::new_v4().to_string(),
                &st.student_id,
                &class.id,
                Utc::now().to_rfc3339(),
            ),
        );
        match inserted {
            Ok(_) => {
                outcome.added += 1;
                let title = format!("Enrolled to {} - {}", class.course_code, class.class_code);
                let msg = format!(
                    "You have been enrolled in {} ({} {}).",
                    class.course_name, class.semester, class.academic_year
                );
                let _ = notify::create_notification(
                    conn,
                    &st.user_id,
                    &title,
                    &msg,
                    "info",
                    Some("class"),
                    Some(&class.id),
                );
            }
            Err(_) => {
                // Unique-constraint race or transient failure: count as
                // skipped, keep going.
                outcome.skipped += 1;
            }
        }
    }

    outcome
}

/// One summary notification for the instructor after a batch. Best-effort:
/// its failure never rolls back the enrollments above.
pub fn notify_instructor_summary(conn: &Connection, class: &ClassInfo, outcome: EnrollmentOutcome) {
    let title = format!(
        "Student list updated for {} - {}",
        class.course_code, class.class_code
    );
    let msg = if outcome.skipped > 0 {
        format!(
            "Admin assigned {} students ({} skipped).",
            outcome.added, outcome.skipped
        )
    } else {
        format!("Admin assigned {} students.", outcome.added)
    };
    let _ = notify::create_notification(
        conn,
        &class.instructor_user_id,
        &title,
        &msg,
        "success",
        Some("class"),
        Some(&class.id),
    );
}
