use rusqlite::{Connection, ErrorCode};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DB_FILE: &str = "atelier.db";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        salt TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'admin',
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        artist_name TEXT NOT NULL,
        title TEXT NOT NULL,
        years_of_experience INTEGER NOT NULL DEFAULT 0,
        about_description TEXT,
        about_photo TEXT,
        profile_3d_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS techniques (
        id TEXT PRIMARY KEY,
        profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        position INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS action_fields (
        id TEXT PRIMARY KEY,
        profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        position INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS social_links (
        id TEXT PRIMARY KEY,
        profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        platform TEXT NOT NULL,
        url TEXT NOT NULL,
        position INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        category TEXT NOT NULL,
        content TEXT NOT NULL,
        image TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tags (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS project_tags (
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (project_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        subject TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Owns the single SQLite connection. Constructed once by the process entry
/// point and shared through `AppState`.
pub struct Database {
    pub db_path: PathBuf,
    pub conn: Connection,
}

impl Database {
    pub fn open(data_dir: &Path) -> Result<Self, DatabaseError> {
        fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE);
        let fresh = !db_path.exists();

        let conn = Connection::open(&db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(SCHEMA)?;

        if fresh {
            info!(path = %db_path.display(), "Initialized new database");
        } else {
            info!(path = %db_path.display(), "Opened database");
        }

        Ok(Database { db_path, conn })
    }
}

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// True when `err` is a UNIQUE constraint violation (duplicate slug, email, ...).
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn scratch_db() -> (Database, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let db = Database::open(temp.path()).expect("open database");
        (db, temp)
    }

    #[test]
    fn open_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = Database::open(temp.path()).expect("first open");
        drop(first);
        let second = Database::open(temp.path()).expect("second open");
        assert!(second.db_path.ends_with(DB_FILE));

        let fk: i64 = second
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("pragma");
        assert_eq!(fk, 1);
    }

    #[test]
    fn detects_unique_violation() {
        let (db, _temp) = scratch_db();
        db.conn
            .execute("INSERT INTO tags (id, name) VALUES ('a', 'Blender')", [])
            .expect("insert");
        let err = db
            .conn
            .execute("INSERT INTO tags (id, name) VALUES ('b', 'Blender')", [])
            .expect_err("duplicate name");
        assert!(is_unique_violation(&err));
    }
}
