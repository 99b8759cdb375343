use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::AppState;
use dossier_domain::model::{HistoryEntry, Profile};
use dossier_service::{
	Error as ServiceError, FactsOptions, ObserveRequest, ObserveResponse, PatchRequest,
	PatchResponse,
};
use dossier_storage::HistoryQuery;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/observe", post(observe))
		.route("/v1/patch", post(patch))
		.route("/v1/profiles/{subject}", get(get_profile).delete(delete_profile))
		.route("/v1/profiles/{subject}/history", get(history))
		.route("/v1/profiles/{subject}/prompt", get(prompt))
		.route("/v1/profiles/{subject}/filters", get(filters))
		.with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
	state
		.service
		.store()
		.health_check()
		.await
		.map_err(ServiceError::from)?;

	Ok(StatusCode::OK)
}

async fn observe(
	State(state): State<AppState>,
	Json(payload): Json<ObserveRequest>,
) -> Result<Json<ObserveResponse>, ApiError> {
	let response = state.service.observe(payload).await?;

	Ok(Json(response))
}

async fn patch(
	State(state): State<AppState>,
	Json(payload): Json<PatchRequest>,
) -> Result<Json<PatchResponse>, ApiError> {
	let response = state.service.patch(payload).await?;

	Ok(Json(response))
}

async fn get_profile(
	State(state): State<AppState>,
	Path(subject): Path<String>,
) -> Result<Json<Profile>, ApiError> {
	let profile = state
		.service
		.get(&subject)
		.await?
		.ok_or_else(|| ApiError::not_found(&subject))?;

	Ok(Json(profile))
}

async fn delete_profile(
	State(state): State<AppState>,
	Path(subject): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
	let deleted = state.service.delete(&subject).await?;

	Ok(Json(DeleteResponse { deleted }))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
	field: Option<String>,
	cursor: Option<String>,
	limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
	entries: Vec<HistoryEntry>,
	#[serde(skip_serializing_if = "Option::is_none")]
	next_cursor: Option<String>,
}

async fn history(
	State(state): State<AppState>,
	Path(subject): Path<String>,
	Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
	let page = state
		.service
		.history(&subject, HistoryQuery {
			field: params.field,
			cursor: params.cursor,
			limit: params.limit,
		})
		.await?;

	Ok(Json(HistoryResponse { entries: page.entries, next_cursor: page.next_cursor }))
}

#[derive(Debug, Deserialize)]
struct SelectParams {
	/// Comma-separated field names.
	select: Option<String>,
	include_nulls: Option<bool>,
}
impl SelectParams {
	fn fields(&self) -> Option<Vec<String>> {
		self.select.as_deref().map(|raw| {
			raw.split(',')
				.map(str::trim)
				.filter(|field| !field.is_empty())
				.map(str::to_string)
				.collect()
		})
	}
}

#[derive(Debug, Serialize)]
struct PromptResponse {
	facts: Option<String>,
}

async fn prompt(
	State(state): State<AppState>,
	Path(subject): Path<String>,
	Query(params): Query<SelectParams>,
) -> Result<Json<PromptResponse>, ApiError> {
	let facts = state
		.service
		.facts_for_prompt(&subject, FactsOptions {
			select: params.fields(),
			include_nulls: params.include_nulls.unwrap_or(false),
		})
		.await?;

	Ok(Json(PromptResponse { facts }))
}

async fn filters(
	State(state): State<AppState>,
	Path(subject): Path<String>,
	Query(params): Query<SelectParams>,
) -> Result<Json<Map<String, Value>>, ApiError> {
	let filters = state.service.filters(&subject, params.fields()).await?;

	Ok(Json(filters))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
	deleted: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
}
impl ApiError {
	fn not_found(subject: &str) -> Self {
		Self {
			status: StatusCode::NOT_FOUND,
			error_code: "not_found",
			message: format!("No profile for subject {subject:?}."),
		}
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let (status, error_code) = match &err {
			ServiceError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
			ServiceError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_failed"),
			ServiceError::SchemaNotRegistered =>
				(StatusCode::INTERNAL_SERVER_ERROR, "schema_not_registered"),
			ServiceError::ExtractorNotConfigured =>
				(StatusCode::INTERNAL_SERVER_ERROR, "extractor_not_configured"),
			ServiceError::Extractor(_) => (StatusCode::BAD_GATEWAY, "extractor_failed"),
			ServiceError::Persistence { .. } => (StatusCode::CONFLICT, "concurrent_write"),
			ServiceError::Storage(dossier_storage::Error::NotFound(_)) =>
				(StatusCode::NOT_FOUND, "not_found"),
			ServiceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_failed"),
		};

		Self { status, error_code, message: err.to_string() }
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code.to_string(), message: self.message };

		(self.status, Json(body)).into_response()
	}
}
