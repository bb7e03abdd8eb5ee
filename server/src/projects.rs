use crate::database::{is_unique_violation, new_id, now, Database};
use crate::error::AppError;
use crate::ingest::ImageIngestor;
use crate::models::{NewProject, Project, ProjectPatch};
use crate::tags;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

const MIN_FIELD_LEN: usize = 2;
const MIN_CONTENT_LEN: usize = 10;

const PROJECT_COLUMNS: &str = "id, slug, title, category, content, image, created_at, updated_at";

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        category: row.get(3)?,
        content: row.get(4)?,
        image: row.get(5)?,
        tags: Vec::new(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn fetch_by(conn: &Connection, column: &str, value: &str) -> rusqlite::Result<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE {column} = ?1");
    let Some(mut project) = conn.query_row(&sql, [value], project_from_row).optional()? else {
        return Ok(None);
    };
    project.tags = tags::for_project(conn, &project.id)?;
    Ok(Some(project))
}

/// All projects, newest first, with their tags.
pub fn list(db: &Database) -> Result<Vec<Project>, AppError> {
    let mut stmt = db.conn.prepare(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, rowid DESC"
    ))?;
    let mut projects = stmt
        .query_map([], project_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for project in &mut projects {
        project.tags = tags::for_project(&db.conn, &project.id)?;
    }
    Ok(projects)
}

pub fn find(db: &Database, id: &str) -> Result<Option<Project>, AppError> {
    Ok(fetch_by(&db.conn, "id", id)?)
}

pub fn find_by_slug(db: &Database, slug: &str) -> Result<Option<Project>, AppError> {
    Ok(fetch_by(&db.conn, "slug", slug)?)
}

pub fn create(db: &mut Database, input: NewProject) -> Result<Project, AppError> {
    let title = checked("Title", input.title, MIN_FIELD_LEN)?;
    let slug = checked("Slug", input.slug, MIN_FIELD_LEN)?;
    let category = checked("Category", input.category, MIN_FIELD_LEN)?;
    let content = checked("Content", input.content, MIN_CONTENT_LEN)?;
    let image = image_ref(input.image);
    let tag_names = tags::normalize_names(&input.tags);

    let id = new_id();
    let now = now();

    let tx = db.conn.transaction()?;
    tx.execute(
        "INSERT INTO projects (id, slug, title, category, content, image, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, slug, title, category, content, image, now],
    )
    .map_err(slug_conflict)?;
    let resolved = tags::resolve(&tx, &tag_names)?;
    tags::replace_for_project(&tx, &id, &resolved)?;
    tx.commit()?;

    info!(project = %id, slug = %slug, tags = resolved.len(), "Created project");
    sweep_orphan_tags(&db.conn);

    find(db, &id)?.ok_or_else(|| AppError::not_found("Project"))
}

/// Applies `patch`. Field changes and tag replacement commit together.
pub fn update(db: &mut Database, id: &str, patch: ProjectPatch) -> Result<Project, AppError> {
    let tx = db.conn.transaction()?;
    let current = fetch_by(&tx, "id", id)?.ok_or_else(|| AppError::not_found("Project"))?;

    let title = keep_or_check("Title", patch.title, current.title, MIN_FIELD_LEN)?;
    let slug = keep_or_check("Slug", patch.slug, current.slug, MIN_FIELD_LEN)?;
    let category = keep_or_check("Category", patch.category, current.category, MIN_FIELD_LEN)?;
    let content = keep_or_check("Content", patch.content, current.content, MIN_CONTENT_LEN)?;
    let image = match patch.image {
        Some(image) => image_ref(Some(image)),
        None => current.image,
    };

    tx.execute(
        "UPDATE projects
         SET slug = ?1, title = ?2, category = ?3, content = ?4, image = ?5, updated_at = ?6
         WHERE id = ?7",
        params![slug, title, category, content, image, now(), id],
    )
    .map_err(slug_conflict)?;

    if let Some(names) = patch.tags {
        let resolved = tags::resolve(&tx, &tags::normalize_names(&names))?;
        tags::replace_for_project(&tx, id, &resolved)?;
    }
    tx.commit()?;

    info!(project = %id, slug = %slug, "Updated project");
    sweep_orphan_tags(&db.conn);

    find(db, id)?.ok_or_else(|| AppError::not_found("Project"))
}

/// Removes the project, then its managed cover image, then orphaned tags.
/// Cleanup failures are logged; the delete itself has already succeeded.
pub fn delete(db: &mut Database, ingestor: &ImageIngestor, id: &str) -> Result<Project, AppError> {
    let project = fetch_by(&db.conn, "id", id)?.ok_or_else(|| AppError::not_found("Project"))?;

    // project_tags rows go with it (ON DELETE CASCADE)
    let removed = db.conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(AppError::not_found("Project"));
    }
    info!(project = %id, slug = %project.slug, "Deleted project");

    if let Some(image) = &project.image {
        match ingestor.release(image) {
            Ok(true) => info!(image = %image, "Removed project image"),
            Ok(false) => {}
            Err(e) => warn!(image = %image, error = %e, "Failed to remove project image"),
        }
    }

    sweep_orphan_tags(&db.conn);
    Ok(project)
}

fn sweep_orphan_tags(conn: &Connection) {
    match tags::sweep_orphans(conn) {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Swept orphan tags"),
        Err(e) => warn!(error = %e, "Orphan tag sweep failed"),
    }
}

fn checked(field: &str, value: String, min: usize) -> Result<String, AppError> {
    let value = value.trim();
    if value.chars().count() < min {
        return Err(AppError::InvalidInput(format!(
            "{field} must be at least {min} characters"
        )));
    }
    Ok(value.to_string())
}

fn keep_or_check(
    field: &str,
    value: Option<String>,
    current: String,
    min: usize,
) -> Result<String, AppError> {
    match value {
        Some(value) => checked(field, value, min),
        None => Ok(current),
    }
}

fn image_ref(image: Option<String>) -> Option<String> {
    image
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
}

fn slug_conflict(err: rusqlite::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict("A project with this slug already exists".to_string())
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::scratch_db;
    use crate::ingest::tests::png_bytes;

    fn new_project(slug: &str, tags: &[&str]) -> NewProject {
        NewProject {
            title: "Cosmic Flow".to_string(),
            slug: slug.to_string(),
            category: "Animation".to_string(),
            content: "Particles drifting through space.".to_string(),
            image: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn tag_names(db: &Database) -> Vec<String> {
        tags::list(&db.conn)
            .expect("tags")
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    fn tags_patch(tags: &[&str]) -> ProjectPatch {
        ProjectPatch {
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn deleting_last_project_sweeps_its_tags() {
        let (mut db, temp) = scratch_db();
        let ingestor = ImageIngestor::new(temp.path().join("uploads"), "/uploads");

        let project = create(&mut db, new_project("cosmic-flow", &["Blender", "3D"])).expect("create");
        assert_eq!(tag_names(&db), vec!["3D", "Blender"]);

        delete(&mut db, &ingestor, &project.id).expect("delete");
        assert!(tag_names(&db).is_empty());
        assert!(find(&db, &project.id).expect("find").is_none());
    }

    #[test]
    fn shared_tags_survive_deleting_one_project() {
        let (mut db, temp) = scratch_db();
        let ingestor = ImageIngestor::new(temp.path().join("uploads"), "/uploads");

        let first = create(&mut db, new_project("first", &["Blender", "Solo"])).expect("first");
        create(&mut db, new_project("second", &["Blender"])).expect("second");

        delete(&mut db, &ingestor, &first.id).expect("delete");
        assert_eq!(tag_names(&db), vec!["Blender"]);
    }

    #[test]
    fn updating_tags_replaces_the_set_and_sweeps() {
        let (mut db, _temp) = scratch_db();
        let project = create(&mut db, new_project("swap", &["A", "B"])).expect("create");

        let updated = update(&mut db, &project.id, tags_patch(&["B", "C"])).expect("update");

        let names: Vec<&str> = updated.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(tag_names(&db), vec!["B", "C"]);
    }

    #[test]
    fn update_without_tags_keeps_them() {
        let (mut db, _temp) = scratch_db();
        let project = create(&mut db, new_project("keep", &["A"])).expect("create");

        let patch = ProjectPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let updated = update(&mut db, &project.id, patch).expect("update");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.tags.len(), 1);
        assert_eq!(updated.created_at, project.created_at);

        let cleared = update(&mut db, &project.id, tags_patch(&[])).expect("clear");
        assert!(cleared.tags.is_empty());
        assert!(tag_names(&db).is_empty());
    }

    #[test]
    fn duplicate_tag_names_collapse_and_case_is_kept() {
        let (mut db, _temp) = scratch_db();
        let project =
            create(&mut db, new_project("dupes", &["3D", "3d", " 3D ", ""])).expect("create");
        let names: Vec<&str> = project.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["3D", "3d"]);
    }

    #[test]
    fn delete_removes_managed_image_only() {
        let (mut db, temp) = scratch_db();
        let ingestor = ImageIngestor::new(temp.path().join("uploads"), "/uploads");
        let asset = ingestor
            .ingest(&png_bytes(12, 12, [1, 2, 3]), "image/png", None, None)
            .expect("ingest");

        let mut managed = new_project("managed", &[]);
        managed.image = Some(asset.url.clone());
        let managed = create(&mut db, managed).expect("create managed");

        let mut external = new_project("external", &[]);
        external.image = Some("https://images.example.com/photo.jpg".to_string());
        let external = create(&mut db, external).expect("create external");

        let other = ingestor
            .ingest(&png_bytes(12, 12, [4, 5, 6]), "image/png", None, None)
            .expect("other asset");

        delete(&mut db, &ingestor, &external.id).expect("delete external");
        assert!(asset.path.exists());
        assert!(other.path.exists());

        delete(&mut db, &ingestor, &managed.id).expect("delete managed");
        assert!(!asset.path.exists());
        assert!(other.path.exists());
    }

    #[test]
    fn duplicate_slug_is_a_conflict() {
        let (mut db, _temp) = scratch_db();
        create(&mut db, new_project("taken", &["A"])).expect("create");
        let err = create(&mut db, new_project("taken", &["B"])).expect_err("duplicate");
        assert!(matches!(err, AppError::Conflict(_)));
        // the failed create left no tag behind
        assert_eq!(tag_names(&db), vec!["A"]);
    }

    #[test]
    fn validation_and_missing_projects() {
        let (mut db, temp) = scratch_db();
        let ingestor = ImageIngestor::new(temp.path().join("uploads"), "/uploads");

        let mut short = new_project("short", &[]);
        short.content = "too short".to_string();
        assert!(matches!(create(&mut db, short), Err(AppError::InvalidInput(_))));

        assert!(matches!(
            update(&mut db, "missing", ProjectPatch::default()),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete(&mut db, &ingestor, "missing"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn lists_newest_first_and_finds_by_slug() {
        let (mut db, _temp) = scratch_db();
        create(&mut db, new_project("older", &[])).expect("older");
        create(&mut db, new_project("newer", &["X"])).expect("newer");

        let slugs: Vec<String> = list(&db).expect("list").into_iter().map(|p| p.slug).collect();
        assert_eq!(slugs, vec!["newer", "older"]);

        let found = find_by_slug(&db, "newer").expect("find").expect("present");
        assert_eq!(found.tags[0].name, "X");
        assert!(find_by_slug(&db, "nope").expect("find").is_none());
    }
}
