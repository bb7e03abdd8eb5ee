use crate::database::{new_id, now, Database};
use crate::error::AppError;
use crate::models::{Message, NewMessage};
use rusqlite::params;
use tracing::info;

pub const DEFAULT_SUBJECT: &str = "New portfolio message";

/// Stores a contact-form submission.
pub fn create(db: &Database, input: NewMessage) -> Result<Message, AppError> {
    let name = input.name.trim();
    let email = input.email.trim();
    let content = input.content.trim();
    if name.is_empty() || email.is_empty() || content.is_empty() {
        return Err(AppError::InvalidInput(
            "Please fill in all required fields.".to_string(),
        ));
    }
    let subject = input
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);

    let message = Message {
        id: new_id(),
        name: name.to_string(),
        email: email.to_string(),
        subject: subject.to_string(),
        content: content.to_string(),
        created_at: now(),
    };

    db.conn.execute(
        "INSERT INTO messages (id, name, email, subject, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.name,
            message.email,
            message.subject,
            message.content,
            message.created_at
        ],
    )?;

    info!(message = %message.id, "Received contact message");
    Ok(message)
}

/// Newest first.
pub fn list(db: &Database) -> Result<Vec<Message>, AppError> {
    let mut stmt = db.conn.prepare(
        "SELECT id, name, email, subject, content, created_at
         FROM messages ORDER BY created_at DESC, rowid DESC",
    )?;
    let messages = stmt
        .query_map([], |row| {
            Ok(Message {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                subject: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

pub fn delete(db: &Database, id: &str) -> Result<(), AppError> {
    let removed = db.conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(AppError::not_found("Message"));
    }
    info!(message = %id, "Deleted message");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::scratch_db;

    fn message(content: &str) -> NewMessage {
        NewMessage {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            subject: None,
            content: content.to_string(),
        }
    }

    #[test]
    fn defaults_subject_and_lists_newest_first() {
        let (db, _temp) = scratch_db();
        let first = create(&db, message("hello")).expect("first");
        let second = create(&db, message("again")).expect("second");
        assert_eq!(first.subject, DEFAULT_SUBJECT);

        let ids: Vec<String> = list(&db).expect("list").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn requires_name_email_and_content() {
        let (db, _temp) = scratch_db();
        let mut bad = message("hi");
        bad.email = "  ".to_string();
        assert!(matches!(create(&db, bad), Err(AppError::InvalidInput(_))));
        assert!(matches!(create(&db, message("")), Err(AppError::InvalidInput(_))));
        assert!(list(&db).expect("list").is_empty());
    }

    #[test]
    fn delete_unknown_is_not_found() {
        let (db, _temp) = scratch_db();
        let stored = create(&db, message("bye")).expect("create");
        delete(&db, &stored.id).expect("delete");
        assert!(matches!(delete(&db, &stored.id), Err(AppError::NotFound(_))));
    }
}
