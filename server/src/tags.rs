//! Shared tag set for projects.
//!
//! Tags are created on first use and swept away once no project references
//! them. Names match exactly: "3D" and "3d" are different tags.

use crate::database::new_id;
use crate::models::Tag;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

/// Trims names, drops blanks and removes duplicates keeping first occurrence.
pub fn normalize_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

/// Looks up each name, creating missing tags. Expects normalized names.
pub fn resolve(conn: &Connection, names: &[String]) -> Result<Vec<Tag>, rusqlite::Error> {
    let mut tags = Vec::with_capacity(names.len());
    for name in names {
        let existing: Option<String> = conn
            .query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;

        let id = match existing {
            Some(id) => id,
            None => {
                let id = new_id();
                conn.execute("INSERT INTO tags (id, name) VALUES (?1, ?2)", params![id, name])?;
                id
            }
        };
        tags.push(Tag {
            id,
            name: name.clone(),
        });
    }
    Ok(tags)
}

/// Replaces the project's associations with exactly `tags`.
pub fn replace_for_project(
    conn: &Connection,
    project_id: &str,
    tags: &[Tag],
) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM project_tags WHERE project_id = ?1", [project_id])?;
    for tag in tags {
        conn.execute(
            "INSERT INTO project_tags (project_id, tag_id) VALUES (?1, ?2)",
            params![project_id, tag.id],
        )?;
    }
    Ok(())
}

pub fn for_project(conn: &Connection, project_id: &str) -> Result<Vec<Tag>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name FROM tags t
         JOIN project_tags pt ON pt.tag_id = t.id
         WHERE pt.project_id = ?1
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map([project_id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

pub fn list(conn: &Connection) -> Result<Vec<Tag>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

/// Deletes every tag no project references. Global, not scoped to the last
/// mutation, so it also clears orphans left behind by earlier failures.
pub fn sweep_orphans(conn: &Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM tags
         WHERE NOT EXISTS (SELECT 1 FROM project_tags pt WHERE pt.tag_id = tags.id)",
        [],
    )
}
