use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new().route("/api/v1/dashboard", get(dashboard)).with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    /// Admin-only: inspect another user's dashboard. Ignored for
    /// non-admin principals.
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub user: DashboardUser,
    pub total_quotations: i64,
    pub pending_approval: i64,
    pub clients_created: i64,
    pub conversion_stats: ConversionStats,
}

#[derive(Debug, Serialize)]
pub struct DashboardUser {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub under_development: i64,
    pub booked: i64,
    pub lost: i64,
}

async fn dashboard(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let target = if principal.is_admin() {
        query.user_id.unwrap_or_else(|| principal.id.clone())
    } else {
        principal.id.clone()
    };

    let counts = state.quotations.dashboard_counts(&target).await?;
    let clients_created = state.clients.count_created_by(&target).await?;

    Ok(Json(DashboardResponse {
        user: DashboardUser { id: target },
        total_quotations: counts.total_quotations,
        pending_approval: counts.pending_approval,
        clients_created,
        conversion_stats: ConversionStats {
            under_development: counts.under_development,
            booked: counts.booked,
            lost: counts.lost,
        },
    }))
}
