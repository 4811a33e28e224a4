//! Downstream connection status.

use axum::extract::State;
use axum::Json;
use cb_integrations::IntegrationStatus;

use crate::error::ApiResult;
use crate::AppState;

/// Configuration and mode of each downstream integration.
#[utoipa::path(
    get,
    path = "/citybus/integrations/status",
    tag = "integrations",
    responses(
        (status = 200, description = "One entry per downstream", body = [IntegrationStatus]),
    )
)]
pub async fn integrations_status(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<IntegrationStatus>>> {
    Ok(Json(state.integrations.as_ref().clone()))
}
