//! Quotation HTTP surface.
//!
//! Endpoints (all require an authenticated principal; admin-only noted):
//! - `POST   /api/v1/quotations`                 — create
//! - `GET    /api/v1/quotations`                 — scoped list
//! - `GET    /api/v1/quotations/admin/all`       — unscoped list (admin)
//! - `GET    /api/v1/quotations/export`          — CSV export of the filtered list
//! - `GET    /api/v1/quotations/{id}`            — fetch one
//! - `PUT    /api/v1/quotations/{id}`            — partial update
//! - `DELETE /api/v1/quotations/{id}`            — hard delete + artifact removal
//! - `PATCH  /api/v1/quotations/{id}/status`     — approve/reject (admin)
//! - `PATCH  /api/v1/quotations/{id}/converted`  — sales-pipeline stage
//! - `GET    /api/v1/quotations/{id}/document`   — PDF download (render-on-demand)

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quotar_core::domain::quotation::{
    ConversionStage, CreateQuotation, DecisionAction, Quotation, QuotationId, UpdateQuotation,
};
use quotar_core::listing::{PageInfo, QuotationListParams};
use quotar_db::repositories::CatalogLookup;

use crate::auth::{require_admin, CurrentPrincipal};
use crate::error::{ApiError, ErrorBody};
use crate::pdf::PdfError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/quotations", post(create_quotation).get(list_quotations))
        .route("/api/v1/quotations/admin/all", get(list_all_quotations))
        .route("/api/v1/quotations/export", get(export_quotations))
        .route(
            "/api/v1/quotations/{id}",
            get(get_quotation)
                .put(update_quotation)
                .patch(update_quotation)
                .delete(delete_quotation),
        )
        .route("/api/v1/quotations/{id}/status", patch(decide_quotation))
        .route("/api/v1/quotations/{id}/converted", patch(set_converted))
        .route("/api/v1/quotations/{id}/document", get(download_document))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationResponse {
    pub message: String,
    pub quotation: Quotation,
    /// Present when the record was saved but the synchronous document
    /// render failed; the caller retries via the document endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub quotations: Vec<Quotation>,
    pub pagination: PageInfo,
    pub filters: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct ConvertedRequest {
    pub converted: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_quotation(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(input): Json<CreateQuotation>,
) -> Result<(StatusCode, Json<QuotationResponse>), ApiError> {
    let quotation = state.quotations.create(input, &principal).await?;

    info!(
        event_name = "quotation.created",
        quotation_id = %quotation.id,
        reference_number = %quotation.reference_number,
        created_by = %principal.id,
        "quotation created"
    );

    let (quotation, render_error) = render_and_swap(&state, quotation).await;
    Ok((
        StatusCode::CREATED,
        Json(QuotationResponse {
            message: "Quotation created successfully".to_string(),
            quotation,
            render_error,
        }),
    ))
}

async fn list_quotations(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(params): Query<QuotationListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = state.quotations.list(&params, &principal).await?;
    Ok(Json(ListResponse {
        quotations: page.records,
        pagination: page.pagination,
        filters: filters_echo(&params),
    }))
}

/// Admin-only variant of the list; the regular endpoint is already
/// unscoped for admins, this route exists so the admin console has an
/// explicit, role-gated path.
async fn list_all_quotations(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(params): Query<QuotationListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    require_admin(&principal)?;
    let page = state.quotations.list(&params, &principal).await?;
    Ok(Json(ListResponse {
        quotations: page.records,
        pagination: page.pagination,
        filters: filters_echo(&params),
    }))
}

async fn get_quotation(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> Result<Json<Quotation>, ApiError> {
    let quotation = state.quotations.get(&QuotationId(id), &principal).await?;
    Ok(Json(quotation))
}

async fn update_quotation(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    Json(patch): Json<UpdateQuotation>,
) -> Result<Json<QuotationResponse>, ApiError> {
    let quotation = state.quotations.update(&QuotationId(id), patch, &principal).await?;

    info!(
        event_name = "quotation.updated",
        quotation_id = %quotation.id,
        reference_number = %quotation.reference_number,
        updated_by = %principal.id,
        "quotation updated"
    );

    let (quotation, render_error) = render_and_swap(&state, quotation).await;
    Ok(Json(QuotationResponse {
        message: "Quotation updated successfully".to_string(),
        quotation,
        render_error,
    }))
}

async fn delete_quotation(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let artifact = state.quotations.delete(&QuotationId(id.clone()), &principal).await?;
    if let Some(artifact) = artifact {
        state.renderer.remove_artifact(&artifact).await;
    }

    info!(
        event_name = "quotation.deleted",
        quotation_id = %id,
        deleted_by = %principal.id,
        "quotation deleted"
    );

    Ok(Json(MessageResponse { message: "Quotation deleted successfully".to_string() }))
}

async fn decide_quotation(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<QuotationResponse>, ApiError> {
    require_admin(&principal)?;

    let action = DecisionAction::parse(&body.action)?;
    let quotation = state.quotations.decide(&QuotationId(id), action, &principal).await?;

    info!(
        event_name = "quotation.decided",
        quotation_id = %quotation.id,
        status = %quotation.status,
        decided_by = %principal.id,
        "quotation approval decision recorded"
    );

    Ok(Json(QuotationResponse {
        message: format!("Quotation {}", quotation.status),
        quotation,
        render_error: None,
    }))
}

async fn set_converted(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
    Json(body): Json<ConvertedRequest>,
) -> Result<Json<QuotationResponse>, ApiError> {
    let stage = ConversionStage::parse(&body.converted)?;
    let quotation = state.quotations.set_converted(&QuotationId(id), stage, &principal).await?;

    Ok(Json(QuotationResponse {
        message: "Conversion status updated".to_string(),
        quotation,
        render_error: None,
    }))
}

async fn download_document(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let quotation = state.quotations.get(&QuotationId(id), &principal).await?;

    // Serve the current artifact when it exists; render on demand when the
    // pointer is absent or the file is gone.
    let file_name = match &quotation.document_file {
        Some(name) if state.renderer.artifact_path(name).exists() => name.clone(),
        _ => try_render(&state, &quotation).await?,
    };

    let bytes = tokio::fs::read(state.renderer.artifact_path(&file_name))
        .await
        .map_err(|error| {
            warn!(
                event_name = "quotation.document.read_failed",
                file_name = %file_name,
                error = %error,
                "stored artifact could not be read"
            );
            ApiError::render_failure("stored document could not be read; please retry")
        })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\""))
        .body(Body::from(bytes))
        .map_err(|_| ApiError::render_failure("failed to build document response"))
}

async fn export_quotations(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(params): Query<QuotationListParams>,
) -> Result<Response, ApiError> {
    let rows = state.quotations.export(&params, &principal).await?;

    let mut csv = String::from(
        "Reference Number,Title,Client,Company,Status,Converted,Total Amount,Created By,Created At\n",
    );
    for row in rows {
        let record = [
            row.reference_number.as_str(),
            row.title.as_str(),
            row.client_name.as_str(),
            row.company_name.as_str(),
            row.status.as_str(),
            row.converted.as_str(),
            &row.total_amount.to_string(),
            row.created_by.as_str(),
            &row.created_at.to_rfc3339(),
        ]
        .map(escape_csv_field)
        .join(",");
        csv.push_str(&record);
        csv.push('\n');
    }

    let file_name = format!("quotations-export-{}.csv", Utc::now().format("%Y%m%d"));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\""))
        .body(Body::from(csv))
        .map_err(|_| ApiError::render_failure("failed to build export response"))
}

// ---------------------------------------------------------------------------
// Render pipeline
// ---------------------------------------------------------------------------

/// Render after a committed write. The save is never rolled back on a
/// render failure; the failure rides along in the response instead.
async fn render_and_swap(
    state: &AppState,
    mut quotation: Quotation,
) -> (Quotation, Option<ErrorBody>) {
    match try_render(state, &quotation).await {
        Ok(file_name) => {
            quotation.document_file = Some(file_name);
            (quotation, None)
        }
        Err(api_error) => (quotation, Some(api_error.body)),
    }
}

/// Write a new artifact, swap the record's pointer, then best-effort
/// delete the superseded file, in that order: a concurrent reader holding
/// the old name can still fetch a consistent (if stale) artifact until the
/// delete lands.
async fn try_render(state: &AppState, quotation: &Quotation) -> Result<String, ApiError> {
    let client = state
        .catalog
        .find_client(&quotation.client_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::render_failure("client record missing for rendering"))?;

    let file_name = state
        .renderer
        .render(quotation, &client)
        .await
        .map_err(|error| render_failure(&quotation.reference_number, error))?;

    let previous = state.quotations.replace_document_file(&quotation.id, &file_name).await?;
    if let Some(previous) = previous {
        state.renderer.remove_artifact(&previous).await;
    }

    Ok(file_name)
}

fn render_failure(reference_number: &str, error: PdfError) -> ApiError {
    warn!(
        event_name = "quotation.document.render_failed",
        reference_number = %reference_number,
        error = %error,
        "document rendering failed; record remains saved"
    );
    let message = match error {
        PdfError::Timeout(secs) => {
            format!("document rendering timed out after {secs}s; the record is saved, retry the document")
        }
        _ => "document rendering failed; the record is saved, retry the document".to_string(),
    };
    ApiError::render_failure(message)
}

fn filters_echo(params: &QuotationListParams) -> serde_json::Value {
    serde_json::json!({
        "search": params.search.clone(),
        "clientId": params.client_id.clone(),
        "fromMonth": params.from_month.clone(),
        "toMonth": params.to_month.clone(),
        "status": params.status.clone(),
        "converted": params.converted.clone(),
        "companyName": params.company_name.clone(),
        "companyCode": params.company_code.clone(),
        "companyStage": params.company_stage.clone(),
        "createdBy": params.created_by.clone(),
    })
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use quotar_core::config::AppConfig;
    use quotar_core::domain::client::{Client, ClientId, CompanyStage};
    use quotar_core::domain::principal::{Principal, Role};
    use quotar_core::domain::product::{Product, ProductId};
    use quotar_core::domain::quotation::{CreateQuotation, LineItemInput, QuotationStatus};
    use quotar_core::listing::QuotationListParams;

    use super::{
        create_quotation, decide_quotation, download_document, escape_csv_field, list_quotations,
        set_converted, ConvertedRequest, DecisionRequest,
    };
    use crate::auth::CurrentPrincipal;
    use crate::pdf::PdfRenderer;
    use crate::state::AppState;

    async fn test_state(tag: &str) -> AppState {
        let url = format!("sqlite:file:{tag}?mode=memory&cache=shared");
        let pool = quotar_db::connect_with_settings(&url, 1, 5).await.expect("connect");
        quotar_db::migrations::run_pending(&pool).await.expect("migrate");
        seed_catalog(&pool).await;

        let config = AppConfig::default();
        let renderer = PdfRenderer::with_embedded_templates(
            std::env::temp_dir().join(format!("quotar-test-{tag}")),
            5,
            config.company.clone(),
        );
        AppState::new(pool, renderer, config.company, None)
    }

    async fn seed_catalog(pool: &quotar_db::DbPool) {
        let now = Utc::now();
        quotar_db::repositories::SqlClientRepository::new(pool.clone())
            .insert(&Client {
                id: ClientId("client-1".to_string()),
                name: "Meera Nair".to_string(),
                emails: vec!["meera@globex.example".to_string()],
                phones: vec!["+91-9810000002".to_string()],
                position: None,
                address: None,
                place: None,
                city: None,
                state: None,
                pin: None,
                company_name: "Globex Industries".to_string(),
                company_code: "GLB02".to_string(),
                company_stage: CompanyStage::Building,
                created_by: "u-manager".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed client");

        quotar_db::repositories::SqlProductRepository::new(pool.clone())
            .insert(&Product {
                id: ProductId("prod-1".to_string()),
                title: "Axial Flow Fan".to_string(),
                model: Some("AF-450".to_string()),
                make: None,
                image: None,
                specification: None,
                price: Some(Decimal::new(10_000, 2)),
                notes: None,
                terms_and_conditions: None,
                description: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed product");
    }

    fn manager() -> CurrentPrincipal {
        CurrentPrincipal(Principal { id: "u-manager".to_string(), role: Role::Manager, name: None })
    }

    fn admin() -> CurrentPrincipal {
        CurrentPrincipal(Principal { id: "u-admin".to_string(), role: Role::Admin, name: None })
    }

    fn create_input() -> CreateQuotation {
        CreateQuotation {
            title: "Ventilation upgrade".to_string(),
            subject: "Supply of axial fans".to_string(),
            formal_message: "We are pleased to quote as under.".to_string(),
            client_id: "client-1".to_string(),
            line_items: vec![LineItemInput {
                product_id: "prod-1".to_string(),
                unit: "nos".to_string(),
                quantity: 2,
                unit_price: Decimal::new(10_000, 2),
                ..LineItemInput::default()
            }],
            related_products: Vec::new(),
            suggested_products: Vec::new(),
            machine_installation: None,
            notes: None,
            billing_details: "GST extra".to_string(),
            supply: "4 weeks".to_string(),
            installation_and_commissioning: "Client scope".to_string(),
            terms_and_conditions: "Ex-works".to_string(),
            signature_image: None,
            tax_enabled: None,
            tax_rate_percent: None,
            total_amount: None,
        }
    }

    #[tokio::test]
    async fn create_saves_record_and_surfaces_render_failure_distinctly() {
        let state = test_state("handlers_create").await;

        let (status, Json(response)) =
            create_quotation(State(state.clone()), manager(), Json(create_input()))
                .await
                .expect("create");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response.quotation.total_amount, Decimal::new(20_000, 2));
        // No wkhtmltopdf in the test environment: the save stands and the
        // failure is reported with its own kind.
        let render_error = response.render_error.expect("render failure expected");
        assert_eq!(render_error.kind, "render_failure");

        let stored = state
            .quotations
            .get(&response.quotation.id, &manager().0)
            .await
            .expect("record persisted despite render failure");
        assert_eq!(stored.reference_number, response.quotation.reference_number);
    }

    #[tokio::test]
    async fn decide_is_admin_only_and_terminal() {
        let state = test_state("handlers_decide").await;

        let (_, Json(created)) =
            create_quotation(State(state.clone()), manager(), Json(create_input()))
                .await
                .expect("create");
        let id = created.quotation.id.0.clone();

        let error = decide_quotation(
            State(state.clone()),
            manager(),
            Path(id.clone()),
            Json(DecisionRequest { action: "approve".to_string() }),
        )
        .await
        .expect_err("manager may not decide");
        assert_eq!(error.status, StatusCode::FORBIDDEN);

        let Json(approved) = decide_quotation(
            State(state.clone()),
            admin(),
            Path(id.clone()),
            Json(DecisionRequest { action: "approve".to_string() }),
        )
        .await
        .expect("admin approves");
        assert_eq!(approved.quotation.status, QuotationStatus::Accepted);

        let error = decide_quotation(
            State(state.clone()),
            admin(),
            Path(id),
            Json(DecisionRequest { action: "reject".to_string() }),
        )
        .await
        .expect_err("terminal status conflicts");
        assert_eq!(error.status, StatusCode::CONFLICT);
        assert_eq!(error.body.kind, "conflict");
    }

    #[tokio::test]
    async fn converted_rejects_unknown_stages() {
        let state = test_state("handlers_converted").await;

        let (_, Json(created)) =
            create_quotation(State(state.clone()), manager(), Json(create_input()))
                .await
                .expect("create");
        let id = created.quotation.id.0.clone();

        let error = set_converted(
            State(state.clone()),
            manager(),
            Path(id.clone()),
            Json(ConvertedRequest { converted: "won".to_string() }),
        )
        .await
        .expect_err("unknown stage");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let Json(updated) = set_converted(
            State(state),
            manager(),
            Path(id),
            Json(ConvertedRequest { converted: "booked".to_string() }),
        )
        .await
        .expect("valid stage");
        assert_eq!(updated.quotation.converted.as_str(), "booked");
    }

    #[tokio::test]
    async fn document_download_reports_render_failure_when_converter_missing() {
        let state = test_state("handlers_document").await;

        let (_, Json(created)) =
            create_quotation(State(state.clone()), manager(), Json(create_input()))
                .await
                .expect("create");

        let error = download_document(State(state), manager(), Path(created.quotation.id.0))
            .await
            .expect_err("render-on-demand cannot succeed without wkhtmltopdf");
        assert_eq!(error.body.kind, "render_failure");
    }

    #[tokio::test]
    async fn list_scopes_and_echoes_filters() {
        let state = test_state("handlers_list").await;

        create_quotation(State(state.clone()), manager(), Json(create_input()))
            .await
            .expect("create");

        let params = QuotationListParams {
            status: Some("draft".to_string()),
            ..QuotationListParams::default()
        };
        let Json(response) = list_quotations(State(state), manager(), Query(params))
            .await
            .expect("list");

        assert_eq!(response.pagination.total, 1);
        assert_eq!(response.filters["status"], "draft");
    }

    #[test]
    fn csv_fields_are_escaped() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("has,comma"), "\"has,comma\"");
        assert_eq!(escape_csv_field("has \"quote\""), "\"has \"\"quote\"\"\"");
        assert_eq!(escape_csv_field("line\nbreak"), "\"line\nbreak\"");
    }
}
