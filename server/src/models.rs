use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub category: String,
    pub content: String,
    pub image: Option<String>,
    pub tags: Vec<Tag>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub title: String,
    pub slug: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update. `None` keeps the stored value; `tags: Some(vec![])` clears
/// the project's tags and `image: Some("")` clears its image.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technique {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionField {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialLink {
    pub platform: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub artist_name: String,
    pub title: String,
    pub years_of_experience: u32,
    pub about_description: Option<String>,
    pub about_photo: Option<String>,
    pub profile_3d_url: Option<String>,
    pub techniques: Vec<Technique>,
    pub action_fields: Vec<ActionField>,
    pub social_links: Vec<SocialLink>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub artist_name: String,
    pub title: String,
    #[serde(default)]
    pub years_of_experience: i64,
    #[serde(default)]
    pub about_description: Option<String>,
    #[serde(default)]
    pub about_photo: Option<String>,
    #[serde(default)]
    pub profile_3d_url: Option<String>,
    pub techniques: Option<Vec<Technique>>,
    pub action_fields: Option<Vec<ActionField>>,
    pub social_links: Option<Vec<SocialLink>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: String,
}

/// A file written by the image ingestor.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub content_key: String,
    pub path: std::path::PathBuf,
    pub mime_type: &'static str,
    pub url: String,
}
