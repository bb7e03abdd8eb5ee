use crate::auth::{self, AdminSession, CurrentUser};
use crate::error::AppError;
use crate::models::{Message, NewMessage, NewProject, Profile, ProfileInput, Project, ProjectPatch, Tag};
use crate::state::AppState;
use crate::{messages, profile, projects, tags};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

type ApiResult<T> = Result<Json<T>, AppError>;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::InvalidInput(e.body_text()))
}

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

pub async fn health() -> &'static str {
    "ok"
}

// Profile

pub async fn get_portfolio(State(state): State<AppState>) -> ApiResult<Option<Profile>> {
    let profile = {
        let db = state.db()?;
        profile::get(&db)?
    };
    Ok(Json(profile))
}

pub async fn update_portfolio(
    State(state): State<AppState>,
    _admin: AdminSession,
    payload: Result<Json<ProfileInput>, JsonRejection>,
) -> ApiResult<Profile> {
    let input = json_body(payload)?;
    let profile = {
        let mut db = state.db()?;
        profile::update(&mut db, input)?
    };
    Ok(Json(profile))
}

// Projects

pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Vec<Project>> {
    let projects = {
        let db = state.db()?;
        projects::list(&db)?
    };
    Ok(Json(projects))
}

pub async fn get_project_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Project> {
    let project = {
        let db = state.db()?;
        projects::find_by_slug(&db, &slug)?
    };
    project
        .map(Json)
        .ok_or_else(|| AppError::not_found("Project"))
}

pub async fn create_project(
    State(state): State<AppState>,
    _admin: AdminSession,
    payload: Result<Json<NewProject>, JsonRejection>,
) -> ApiResult<Project> {
    let input = json_body(payload)?;
    let project = {
        let mut db = state.db()?;
        projects::create(&mut db, input)?
    };
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<String>,
    payload: Result<Json<ProjectPatch>, JsonRejection>,
) -> ApiResult<Project> {
    let patch = json_body(payload)?;
    let project = {
        let mut db = state.db()?;
        projects::update(&mut db, &id, patch)?
    };
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    {
        let mut db = state.db()?;
        projects::delete(&mut db, &state.ingestor, &id)?;
    }
    Ok(success())
}

pub async fn list_tags(State(state): State<AppState>) -> ApiResult<Vec<Tag>> {
    let tags = {
        let db = state.db()?;
        tags::list(&db.conn)?
    };
    Ok(Json(tags))
}

// Messages

pub async fn create_message(
    State(state): State<AppState>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let input = json_body(payload)?;
    let message = {
        let db = state.db()?;
        messages::create(&db, input)?
    };
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> ApiResult<Vec<Message>> {
    let messages = {
        let db = state.db()?;
        messages::list(&db)?
    };
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    {
        let db = state.db()?;
        messages::delete(&db, &id)?;
    }
    Ok(success())
}

// Upload

#[derive(Serialize)]
pub struct UploadResponse {
    pub url: String,
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::TooLarge
    } else {
        AppError::InvalidInput(err.body_text())
    }
}

/// Multipart fields: `file` (required), `oldUrl`, `customFilename`.
pub async fn upload(
    State(state): State<AppState>,
    _admin: AdminSession,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<UploadResponse> {
    let mut multipart = multipart.map_err(|e| AppError::InvalidInput(e.body_text()))?;

    let mut file = None;
    let mut old_url = None;
    let mut custom_filename = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((bytes, content_type));
            }
            Some("oldUrl") => old_url = Some(field.text().await.map_err(multipart_error)?),
            Some("customFilename") => {
                custom_filename = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    let (bytes, content_type) =
        file.ok_or_else(|| AppError::InvalidInput("No file uploaded".to_string()))?;
    let old_url = old_url.filter(|u| !u.trim().is_empty());
    let custom_filename = custom_filename
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    // Decoding and encoding are CPU bound
    let ingestor = state.ingestor.clone();
    let asset = tokio::task::spawn_blocking(move || {
        ingestor.ingest(
            &bytes,
            &content_type,
            old_url.as_deref(),
            custom_filename.as_deref(),
        )
    })
    .await
    .map_err(|e| AppError::Internal(format!("Upload worker failed: {e}")))??;

    Ok(Json(UploadResponse { url: asset.url }))
}

// Auth

#[derive(Deserialize)]
pub struct SignIn {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmail {
    pub new_email: String,
}

pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignIn>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let credentials = json_body(payload)?;
    let user = {
        let db = state.db()?;
        auth::authenticate(&db, &credentials.email, &credentials.password)?
    };
    let user = user.ok_or(AppError::Unauthorized)?;

    let token = state.sessions.issue(&user.id)?;
    info!(user = %user.id, "Signed in");
    Ok((
        [(header::SET_COOKIE, state.sessions.cookie(&token))],
        Json(json!({ "user": user })),
    ))
}

pub async fn sign_out(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::SET_COOKIE, state.sessions.clear_cookie())], success())
}

pub async fn session(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "user": user }))
}

pub async fn change_password(
    State(state): State<AppState>,
    AdminSession(user): AdminSession,
    payload: Result<Json<ChangePassword>, JsonRejection>,
) -> ApiResult<Value> {
    let input = json_body(payload)?;
    {
        let db = state.db()?;
        auth::change_password(&db, &user.id, &input.current_password, &input.new_password)?;
    }
    Ok(success())
}

pub async fn change_email(
    State(state): State<AppState>,
    AdminSession(user): AdminSession,
    payload: Result<Json<ChangeEmail>, JsonRejection>,
) -> ApiResult<Value> {
    let input = json_body(payload)?;
    let user = {
        let db = state.db()?;
        auth::change_email(&db, &user.id, &input.new_email)?
    };
    Ok(Json(json!({ "user": user })))
}
