use crate::error::ApiError;
use crate::handlers::ws::subscribe_handler;
use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use ephemera_core::{AppKind, Child, Engine, Entity, FullState, Runtime};
use serde::{Deserialize, Serialize};
use tracing::info;

type ApiResult<T> = Result<T, ApiError>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Shared state for the routes of one app kind
#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub payload: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned once from `create`; the only place the admin token appears.
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
    pub admin_token: String,
    pub entity: Entity,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub admin_token: String,
    pub payload: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AdminRequest {
    pub admin_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub admin_token: String,
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct PayloadRequest {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct ChildUpdateRequest {
    pub payload: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CompletedRequest {
    pub completed: bool,
}

/// Routes for every app kind, each nested under its plural path segment.
pub fn api_routes(runtime: &Runtime) -> Router {
    AppKind::ALL
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.nest(
                &format!("/{}", kind.path_segment()),
                kind_routes(runtime.engine(kind)),
            )
        })
}

fn kind_routes(engine: Engine) -> Router {
    Router::new()
        .route("/", post(create_entity))
        .route(
            "/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
        .route("/{id}/state", get(get_state))
        .route("/{id}/extend", post(extend_entity))
        .route("/{id}/children", get(list_children).post(add_child))
        .route(
            "/{id}/children/{child_id}",
            put(update_child)
                .patch(set_child_completed)
                .delete(remove_child),
        )
        .route("/{id}/participants/{participant}", put(upsert_participant))
        .route("/{id}/subscribe", get(subscribe_handler))
        .with_state(ApiState { engine })
}

async fn create_entity(
    State(state): State<ApiState>,
    body: JsonBody<CreateRequest>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let created = state.engine.create(&req.payload, req.expires_at)?;
    info!(
        kind = state.engine.kind().as_str(),
        id = %created.entity.id,
        "Entity created via API"
    );
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id: created.entity.id.clone(),
            admin_token: created.admin_token,
            entity: created.entity,
        }),
    ))
}

async fn get_entity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Entity>> {
    Ok(Json(state.engine.get(&id)?))
}

async fn get_state(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FullState>> {
    Ok(Json(state.engine.snapshot(&id)?))
}

async fn update_entity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: JsonBody<UpdateRequest>,
) -> ApiResult<Json<Entity>> {
    let Json(req) = body?;
    let entity =
        state
            .engine
            .update(&id, &req.admin_token, &req.payload, req.expected_version)?;
    Ok(Json(entity))
}

async fn delete_entity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: JsonBody<AdminRequest>,
) -> ApiResult<StatusCode> {
    let Json(req) = body?;
    state.engine.delete(&id, &req.admin_token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn extend_entity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: JsonBody<ExtendRequest>,
) -> ApiResult<Json<Entity>> {
    let Json(req) = body?;
    Ok(Json(state.engine.extend(&id, &req.admin_token, req.days)?))
}

async fn list_children(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Child>>> {
    Ok(Json(state.engine.list_children(&id)?))
}

async fn add_child(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: JsonBody<PayloadRequest>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let child = state.engine.add_child(&id, &req.payload)?;
    Ok((StatusCode::CREATED, Json(child)))
}

async fn update_child(
    State(state): State<ApiState>,
    Path((id, child_id)): Path<(String, String)>,
    body: JsonBody<ChildUpdateRequest>,
) -> ApiResult<Json<Child>> {
    let Json(req) = body?;
    let child = state
        .engine
        .update_child(&id, &child_id, &req.payload, req.expected_version)?;
    Ok(Json(child))
}

async fn set_child_completed(
    State(state): State<ApiState>,
    Path((id, child_id)): Path<(String, String)>,
    body: JsonBody<CompletedRequest>,
) -> ApiResult<Json<Child>> {
    let Json(req) = body?;
    let child = state
        .engine
        .set_child_completed(&id, &child_id, req.completed)?;
    Ok(Json(child))
}

async fn remove_child(
    State(state): State<ApiState>,
    Path((id, child_id)): Path<(String, String)>,
    body: JsonBody<AdminRequest>,
) -> ApiResult<StatusCode> {
    let Json(req) = body?;
    state.engine.remove_child(&id, &req.admin_token, &child_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_participant(
    State(state): State<ApiState>,
    Path((id, participant)): Path<(String, String)>,
    body: JsonBody<PayloadRequest>,
) -> ApiResult<Json<Child>> {
    let Json(req) = body?;
    let child = state
        .engine
        .upsert_participant_child(&id, &participant, &req.payload)?;
    Ok(Json(child))
}
