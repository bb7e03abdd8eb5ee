use crate::database::{new_id, now, Database};
use crate::error::AppError;
use crate::models::{ActionField, Profile, ProfileInput, SocialLink, Technique};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

const MIN_NAME_LEN: usize = 2;

/// The singleton profile with its lists, or `None` before the first save.
pub fn get(db: &Database) -> Result<Option<Profile>, AppError> {
    Ok(load(&db.conn)?)
}

fn load(conn: &Connection) -> rusqlite::Result<Option<Profile>> {
    let profile = conn
        .query_row(
            "SELECT id, artist_name, title, years_of_experience, about_description,
                    about_photo, profile_3d_url, created_at, updated_at
             FROM profiles ORDER BY created_at ASC LIMIT 1",
            [],
            |row| {
                Ok(Profile {
                    id: row.get(0)?,
                    artist_name: row.get(1)?,
                    title: row.get(2)?,
                    years_of_experience: row.get(3)?,
                    about_description: row.get(4)?,
                    about_photo: row.get(5)?,
                    profile_3d_url: row.get(6)?,
                    techniques: Vec::new(),
                    action_fields: Vec::new(),
                    social_links: Vec::new(),
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()?;

    let Some(mut profile) = profile else {
        return Ok(None);
    };

    profile.techniques = names(conn, "techniques", &profile.id)?
        .into_iter()
        .map(|name| Technique { name })
        .collect();
    profile.action_fields = names(conn, "action_fields", &profile.id)?
        .into_iter()
        .map(|name| ActionField { name })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT platform, url FROM social_links WHERE profile_id = ?1 ORDER BY position",
    )?;
    profile.social_links = stmt
        .query_map([&profile.id], |row| {
            Ok(SocialLink {
                platform: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<Result<_, _>>()?;

    Ok(Some(profile))
}

fn names(conn: &Connection, table: &str, profile_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM {table} WHERE profile_id = ?1 ORDER BY position"
    ))?;
    let rows = stmt.query_map([profile_id], |row| row.get(0))?;
    rows.collect()
}

/// Creates the profile on first save, otherwise updates it. Each list present
/// in `input` replaces the stored one; absent lists are left as they are.
pub fn update(db: &mut Database, input: ProfileInput) -> Result<Profile, AppError> {
    let input = validate(input)?;
    let now = now();

    let tx = db.conn.transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM profiles ORDER BY created_at ASC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let profile_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE profiles
                 SET artist_name = ?1, title = ?2, years_of_experience = ?3,
                     about_description = ?4, about_photo = ?5, profile_3d_url = ?6,
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    input.artist_name,
                    input.title,
                    input.years_of_experience,
                    input.about_description,
                    input.about_photo,
                    input.profile_3d_url,
                    now,
                    id
                ],
            )?;
            id
        }
        None => {
            let id = new_id();
            tx.execute(
                "INSERT INTO profiles (id, artist_name, title, years_of_experience,
                     about_description, about_photo, profile_3d_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    input.artist_name,
                    input.title,
                    input.years_of_experience,
                    input.about_description,
                    input.about_photo,
                    input.profile_3d_url,
                    now
                ],
            )?;
            id
        }
    };

    if let Some(techniques) = &input.techniques {
        let names: Vec<&str> = techniques.iter().map(|t| t.name.as_str()).collect();
        replace_names(&tx, "techniques", &profile_id, &names)?;
    }
    if let Some(fields) = &input.action_fields {
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        replace_names(&tx, "action_fields", &profile_id, &names)?;
    }
    if let Some(links) = &input.social_links {
        tx.execute("DELETE FROM social_links WHERE profile_id = ?1", [&profile_id])?;
        for (position, link) in links.iter().enumerate() {
            tx.execute(
                "INSERT INTO social_links (id, profile_id, platform, url, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id(), profile_id, link.platform, link.url, position as i64],
            )?;
        }
    }

    let profile = load(&tx)?.ok_or_else(|| AppError::not_found("Profile"))?;
    tx.commit()?;

    info!(profile = %profile.id, "Saved profile");
    Ok(profile)
}

fn replace_names(
    conn: &Connection,
    table: &str,
    profile_id: &str,
    names: &[&str],
) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {table} WHERE profile_id = ?1"), [profile_id])?;
    let sql = format!(
        "INSERT INTO {table} (id, profile_id, name, position) VALUES (?1, ?2, ?3, ?4)"
    );
    for (position, name) in names.iter().enumerate() {
        conn.execute(&sql, params![new_id(), profile_id, name, position as i64])?;
    }
    Ok(())
}

struct ValidProfile {
    artist_name: String,
    title: String,
    years_of_experience: u32,
    about_description: Option<String>,
    about_photo: Option<String>,
    profile_3d_url: Option<String>,
    techniques: Option<Vec<Technique>>,
    action_fields: Option<Vec<ActionField>>,
    social_links: Option<Vec<SocialLink>>,
}

fn validate(input: ProfileInput) -> Result<ValidProfile, AppError> {
    let artist_name = input.artist_name.trim().to_string();
    if artist_name.chars().count() < MIN_NAME_LEN {
        return Err(AppError::InvalidInput(
            "Artist name must be at least 2 characters".to_string(),
        ));
    }
    let title = input.title.trim().to_string();
    if title.chars().count() < MIN_NAME_LEN {
        return Err(AppError::InvalidInput(
            "Title must be at least 2 characters".to_string(),
        ));
    }
    let years_of_experience = u32::try_from(input.years_of_experience).map_err(|_| {
        AppError::InvalidInput("Years of experience must be a positive number".to_string())
    })?;

    let profile_3d_url = optional_text(input.profile_3d_url);
    if let Some(url) = &profile_3d_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::InvalidInput("Please enter a valid URL".to_string()));
        }
    }

    Ok(ValidProfile {
        artist_name,
        title,
        years_of_experience,
        about_description: optional_text(input.about_description),
        about_photo: optional_text(input.about_photo),
        profile_3d_url,
        techniques: input.techniques,
        action_fields: input.action_fields,
        social_links: input.social_links,
    })
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
