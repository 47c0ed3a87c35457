//! REST endpoints for onboarding status and pet profile.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::catalog::FieldId;
use super::manager::OnboardingManager;
use super::record::{Answers, ProfileFields};
use crate::store::ProfileGateway;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
    pub gateway: ProfileGateway,
}

/// Onboarding status returned by the REST endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingStatus {
    pub identifier: String,
    pub step: usize,
    pub total_steps: usize,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_field: Option<FieldId>,
    pub answers: Answers,
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Storage unavailable"})),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": what}))).into_response()
}

/// GET /api/onboarding/{identifier}/status
async fn get_status(
    State(state): State<OnboardingRouteState>,
    Path(identifier): Path<String>,
) -> Response {
    match state.manager.status(&identifier).await {
        Ok(Some(record)) => {
            let catalog = state.manager.catalog();
            Json(OnboardingStatus {
                pending_field: catalog
                    .get(record.step)
                    .filter(|_| !record.complete)
                    .map(|q| q.field),
                total_steps: catalog.len(),
                identifier: record.identifier,
                step: record.step,
                complete: record.complete,
                completed_at: record.completed_at,
                answers: record.state,
            })
            .into_response()
        }
        Ok(None) => not_found("Unknown user"),
        Err(e) => {
            error!(identifier, error = %e, "Status lookup failed");
            internal_error()
        }
    }
}

/// GET /api/onboarding/{identifier}/profile
///
/// Returns the pet profile, or 404 if onboarding has not produced one.
async fn get_profile(
    State(state): State<OnboardingRouteState>,
    Path(identifier): Path<String>,
) -> Response {
    match state.gateway.load_profile_for(&identifier).await {
        Ok(Some(pet)) => Json(ProfileBody::from(pet.fields)).into_response(),
        Ok(None) => not_found("No profile exists yet"),
        Err(e) => {
            error!(identifier, error = %e, "Profile lookup failed");
            internal_error()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    name: String,
    #[serde(rename = "type")]
    pet_type: String,
    breed: Option<String>,
    dob: Option<String>,
    preferences: serde_json::Value,
}

impl From<ProfileFields> for ProfileBody {
    fn from(fields: ProfileFields) -> Self {
        Self {
            preferences: fields.preferences_json(),
            name: fields.name,
            pet_type: fields.pet_type,
            breed: fields.breed,
            dob: fields.dob,
        }
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/{identifier}/status", get(get_status))
        .route("/api/onboarding/{identifier}/profile", get(get_profile))
        .with_state(state)
}
