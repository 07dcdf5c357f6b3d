use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::domain::notification::{NotificationKind, TripInfo, UpdateDetails};
use crate::usecase::error::UsecaseError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct TripInfoRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 200))]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TripUpdateRequest {
    pub kind: NotificationKind,
    #[serde(default)]
    pub details: serde_json::Value,
    #[validate(nested)]
    pub trip: TripInfoRequest,
}

impl TripUpdateRequest {
    fn into_parts(self) -> Result<(UpdateDetails, TripInfo), UsecaseError> {
        let details = match self.details {
            serde_json::Value::Null => UpdateDetails::empty(self.kind),
            value => UpdateDetails::from_request_value(self.kind, value).map_err(|e| {
                UsecaseError::Validation(format!("Invalid {} details: {}", self.kind, e))
            })?,
        };

        Ok((
            details,
            TripInfo {
                name: self.trip.name,
                location: self.trip.location,
            },
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct TripUpdateResponse {
    pub recipients: usize,
}

/// Called by the trip services after an activity, transportation, lodging or
/// checklist was created. The authenticated user is the updater.
#[tracing::instrument(skip(state, payload), fields(user_id = %user.user_id, %trip_id))]
pub async fn report_trip_update(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(trip_id): Path<Uuid>,
    Json(payload): Json<TripUpdateRequest>,
) -> Result<impl IntoResponse, UsecaseError> {
    if let Err(validation_errors) = payload.validate() {
        tracing::warn!(?validation_errors, "validation failed");
        return Err(UsecaseError::Validation(format!(
            "Validation error: {:?}",
            validation_errors
        )));
    }

    let (details, trip) = payload.into_parts()?;

    let recipients = state
        .enqueue_usecase
        .notify_trip_members(trip_id, user.user_id, details, trip)
        .await;

    tracing::debug!(recipients, "trip update accepted");
    Ok((StatusCode::ACCEPTED, Json(TripUpdateResponse { recipients })))
}
