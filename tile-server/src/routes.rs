/// Request handlers. Registry work runs on the blocking pool with the lock held there.
use std::sync::Arc;

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use constants::server::TILE_UPLOAD_FIELD;
use parking_lot::Mutex;
use scene_tiling::{
    FsVersionStore, SceneRegistry, TileFile, Tileset, TilingError, TilingResult, VersionStore,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

pub type AppState = Arc<Mutex<SceneRegistry<FsVersionStore>>>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Tiling(TilingError),
    /// The blocking task running the registry call failed.
    Task(String),
}

impl From<TilingError> for ApiError {
    fn from(e: TilingError) -> Self {
        Self::Tiling(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Tiling(e) => status_for(e),
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(message) => message.clone(),
            Self::Tiling(e) => e.to_string(),
            Self::Task(message) => message.clone(),
        }
    }
}

fn status_for(error: &TilingError) -> StatusCode {
    match error {
        TilingError::DuplicateTag(_) => StatusCode::CONFLICT,
        TilingError::UnknownParentVersion(_) => StatusCode::NOT_FOUND,
        TilingError::MalformedManifest(_)
        | TilingError::InvalidTag(_)
        | TilingError::InvalidSceneName(_)
        | TilingError::TooManyParents(_)
        | TilingError::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Run `work` against the registry off the async workers; store writes block on fsync.
async fn with_registry<T, F>(state: AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut SceneRegistry<FsVersionStore>) -> TilingResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&mut state.lock()))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?
        .map_err(ApiError::from)
}

/// Manifest sent either as a JSON string (multipart and legacy clients) or inline.
fn parse_tileset(value: Value) -> Result<Tileset, ApiError> {
    match value {
        Value::String(text) => Ok(Tileset::from_json(&text)?),
        Value::Object(_) => Ok(Tileset::from_value(value)?),
        _ => Err(ApiError::BadRequest("tileset must be a JSON object".into())),
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field.ok_or_else(|| ApiError::BadRequest(format!("missing field {name:?}")))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

/// Multipart upload: tile files under `b3dm`, plus `tileset`, `currentVersion`,
/// `newVersion` and `currentScene` text fields.
pub async fn update_tiles_version(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart?;
    let mut tiles = Vec::new();
    let mut tileset = None;
    let mut current = None;
    let mut new = None;
    let mut scene = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == TILE_UPLOAD_FIELD {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| ApiError::BadRequest("tile upload without a file name".into()))?;
            let bytes = field.bytes().await.map_err(multipart_error)?;
            tiles.push(TileFile {
                name: file_name,
                bytes: bytes.to_vec(),
            });
            continue;
        }

        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "tileset" => tileset = Some(text),
            "currentVersion" => current = Some(text),
            "newVersion" => new = Some(text),
            "currentScene" => scene = Some(text),
            _ => {}
        }
    }

    let tileset = parse_tileset(Value::String(required(tileset, "tileset")?))?;
    let current = required(current, "currentVersion")?;
    let new = required(new, "newVersion")?;
    let scene = required(scene, "currentScene")?;

    let count = tiles.len();
    let (scene, current, new) = with_registry(state, move |registry| {
        registry.update_tiles_version(&scene, &current, &new, &tileset, &tiles)?;
        Ok((scene, current, new))
    })
    .await?;
    info!(scene, from = %current, to = %new, tiles = count, "upload committed");
    Ok(Json(json!({ "status": "Ok" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRequest {
    scene_name: String,
}

pub async fn get_all_version(
    State(state): State<AppState>,
    body: Result<Json<SceneRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    let versions = with_registry(state, move |registry| {
        Ok(registry.versions(&request.scene_name)?.to_file())
    })
    .await?;
    Ok(Json(json!({ "versions": versions })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    scene_name: String,
    version_left: String,
    version_right: String,
    version_merge: String,
    tileset: Value,
}

/// Records a merge whose manifest the client already resolved.
pub async fn merge_versions(
    State(state): State<AppState>,
    body: Result<Json<MergeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    let tileset = parse_tileset(request.tileset)?;

    with_registry(state, move |registry| {
        registry.merge_versions(
            &request.scene_name,
            &request.version_left,
            &request.version_right,
            &request.version_merge,
            &tileset,
        )
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn get_all_scene(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let scenes = with_registry(state, |registry| registry.store().list_scenes()).await?;
    Ok(Json(json!({ "scenes": scenes })))
}
