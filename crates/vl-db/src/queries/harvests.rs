//! Harvest completion marks.
//!
//! A mark means "a cover for this library was generated once"; it is never
//! cleared by the proxy. Operators delete the row (or the whole store) to
//! force a re-harvest.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use vl_core::{Error, Result};

use crate::models::{HarvestMark, MarkSource};

/// Whether `library_name` already has a completion mark.
pub fn is_done(conn: &Connection, library_name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM harvest_marks WHERE library_name = ?1",
        [library_name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| Error::database(e.to_string()))
}

/// Record a completion mark. Marking an already-marked library is a no-op.
///
/// Returns `true` when a new mark was written.
pub fn mark_done(conn: &Connection, library_name: &str, source: MarkSource) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO harvest_marks (library_name, source, completed_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![library_name, source.as_str(), &now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(inserted > 0)
}

/// All marks, oldest first.
pub fn list_marks(conn: &Connection) -> Result<Vec<HarvestMark>> {
    let mut stmt = conn
        .prepare(
            "SELECT library_name, source, completed_at FROM harvest_marks
             ORDER BY completed_at ASC, library_name ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([], HarvestMark::from_row)
        .map_err(|e| Error::database(e.to_string()))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Import a newline-separated completion log written by older releases.
///
/// Blank lines are skipped and a missing file imports nothing. Returns the
/// number of marks newly written.
pub fn import_legacy_log(conn: &Connection, path: &Path) -> Result<usize> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut imported = 0;
    for name in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if mark_done(conn, name, MarkSource::Legacy)? {
            imported += 1;
        }
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};

    #[test]
    fn mark_then_check() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        assert!(!is_done(&conn, "Anime").unwrap());
        assert!(mark_done(&conn, "Anime", MarkSource::Harvest).unwrap());
        assert!(is_done(&conn, "Anime").unwrap());
        assert!(!is_done(&conn, "anime").unwrap());
    }

    #[test]
    fn marking_twice_is_noop() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        assert!(mark_done(&conn, "Anime", MarkSource::Harvest).unwrap());
        assert!(!mark_done(&conn, "Anime", MarkSource::Legacy).unwrap());

        let marks = list_marks(&conn).unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].source, MarkSource::Harvest);
    }

    #[test]
    fn import_legacy_log_skips_blanks_and_duplicates() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        mark_done(&conn, "Marvel", MarkSource::Harvest).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("image_done.txt");
        std::fs::write(&log, "Anime\n\nMarvel\nKids\n").unwrap();

        assert_eq!(import_legacy_log(&conn, &log).unwrap(), 2);
        assert!(is_done(&conn, "Kids").unwrap());
        assert_eq!(import_legacy_log(&conn, &log).unwrap(), 0);

        let legacy: Vec<_> = list_marks(&conn)
            .unwrap()
            .into_iter()
            .filter(|m| m.source == MarkSource::Legacy)
            .map(|m| m.library_name)
            .collect();
        assert_eq!(legacy.len(), 2);
        assert!(legacy.contains(&"Anime".to_string()));
    }

    #[test]
    fn import_missing_log_is_empty() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let n = import_legacy_log(&conn, Path::new("/nonexistent/image_done.txt")).unwrap();
        assert_eq!(n, 0);
    }
}
