use axum::{extract::State, response::Json, routing::get, Router};

use crate::{errors::ServiceError, models::DrugInfo, ApiResponse, AppState};

/// Build the catalog Router scoped under `/api`.
pub fn drug_routes() -> Router<AppState> {
    Router::new().route("/drugs", get(list_drugs))
}

/// The distinct drug catalog, used to populate dashboard filters
#[utoipa::path(
    get,
    path = "/api/drugs",
    responses(
        (status = 200, description = "Drug catalog retrieved successfully", body = ApiResponse<Vec<DrugInfo>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Catalog"
)]
pub async fn list_drugs(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DrugInfo>>>, ServiceError> {
    Ok(Json(ApiResponse::success(state.store.catalog().to_vec())))
}
