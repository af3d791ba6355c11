use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{QueryBuilder, Row};
use tracing::warn;
use uuid::Uuid;

use quotar_core::domain::client::ClientId;
use quotar_core::domain::principal::Principal;
use quotar_core::domain::product::{Product, ProductId};
use quotar_core::domain::quotation::{
    ConversionStage, CreateQuotation, DecisionAction, GalleryItem, LineItem, LineItemInput,
    MachineInstallation, MachineInstallationInput, Quotation, QuotationId, QuotationStatus,
    UpdateQuotation,
};
use quotar_core::errors::DomainError;
use quotar_core::listing::{PageInfo, Pagination, QuotationListParams, SortField};
use quotar_core::{pricing, reference};

use super::client::parse_timestamp;
use super::{CatalogLookup, RepositoryError};
use crate::DbPool;

/// How many times a colliding reference number is re-derived before the
/// create is surfaced as a conflict. Collisions only happen when two
/// creations race within the same month bucket, so a handful of retries is
/// plenty.
const MAX_REFERENCE_ATTEMPTS: u32 = 5;

pub struct SqlQuotationRepository {
    pool: DbPool,
    catalog: Arc<dyn CatalogLookup>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationPage {
    pub records: Vec<Quotation>,
    pub pagination: PageInfo,
}

/// Flat display row for the spreadsheet export.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub reference_number: String,
    pub title: String,
    pub client_name: String,
    pub company_name: String,
    pub status: QuotationStatus,
    pub converted: ConversionStage,
    pub total_amount: Decimal,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total_quotations: i64,
    pub pending_approval: i64,
    pub under_development: i64,
    pub booked: i64,
    pub lost: i64,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool, catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { pool, catalog }
    }

    /// Create a quotation: fail-fast validation, catalog resolution,
    /// computed totals, and reference-number assignment under the
    /// unique-constraint retry discipline.
    pub async fn create(
        &self,
        input: CreateQuotation,
        principal: &Principal,
    ) -> Result<Quotation, RepositoryError> {
        validate_create(&input)?;

        let client_id = ClientId(input.client_id.trim().to_string());
        if self.catalog.find_client(&client_id).await?.is_none() {
            return Err(DomainError::validation(
                "client",
                format!("client `{client_id}` not found"),
            )
            .into());
        }

        let line_items = self.resolve_line_items(&input.line_items).await?;
        let machine_installation = input.machine_installation.as_ref().map(build_installation);
        let total_amount = pricing::grand_total(&line_items, machine_installation.as_ref());

        let quotation = Quotation {
            id: QuotationId(Uuid::new_v4().to_string()),
            reference_number: String::new(), // assigned at insert
            title: input.title.trim().to_string(),
            subject: input.subject.trim().to_string(),
            formal_message: input.formal_message.trim().to_string(),
            client_id,
            line_items,
            related_products: input.related_products,
            suggested_products: input.suggested_products,
            machine_installation,
            notes: input.notes,
            billing_details: input.billing_details.trim().to_string(),
            supply: input.supply.trim().to_string(),
            installation_and_commissioning: input.installation_and_commissioning.trim().to_string(),
            terms_and_conditions: input.terms_and_conditions.trim().to_string(),
            signature_image: input.signature_image,
            tax_enabled: input.tax_enabled.unwrap_or(false),
            tax_rate_percent: input.tax_rate_percent.unwrap_or(Decimal::from(18)),
            total_amount,
            document_file: None,
            status: QuotationStatus::Draft,
            converted: ConversionStage::UnderDevelopment,
            created_by: principal.id.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        self.insert_with_reference(quotation).await
    }

    /// Insert the aggregate, deriving the month-scoped sequence from the
    /// highest surviving reference in the bucket. Two racing creations can
    /// derive the same number; the unique index rejects the loser, which
    /// re-derives and retries.
    async fn insert_with_reference(
        &self,
        mut quotation: Quotation,
    ) -> Result<Quotation, RepositoryError> {
        let month_prefix = reference::month_prefix(quotation.created_at);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let highest: Option<String> = sqlx::query_scalar(
                "SELECT MAX(reference_number) FROM quotation WHERE reference_number LIKE ?",
            )
            .bind(format!("{month_prefix}%"))
            .fetch_one(&self.pool)
            .await?;

            let sequence = highest
                .as_deref()
                .and_then(|reference| reference.rsplit('-').next())
                .and_then(|suffix| suffix.parse::<u32>().ok())
                .unwrap_or(0)
                + 1;
            quotation.reference_number =
                reference::format_reference(quotation.created_at, sequence);

            match self.try_insert(&quotation).await {
                Ok(()) => return Ok(quotation),
                Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                    if attempt >= MAX_REFERENCE_ATTEMPTS {
                        return Err(RepositoryError::ReferenceConflict {
                            reference: quotation.reference_number,
                        });
                    }
                    warn!(
                        event_name = "quotation.reference.collision",
                        reference = %quotation.reference_number,
                        attempt,
                        "reference number collided with a concurrent creation; retrying"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn try_insert(&self, quotation: &Quotation) -> Result<(), sqlx::Error> {
        let machine_installation = encode_installation(&quotation.machine_installation);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quotation
                (id, reference_number, title, subject, formal_message, client_id,
                 machine_installation, notes, billing_details, supply,
                 installation_and_commissioning, terms_and_conditions, signature_image,
                 tax_enabled, tax_rate_percent, total_amount, document_file, status, converted,
                 created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&quotation.id.0)
        .bind(&quotation.reference_number)
        .bind(&quotation.title)
        .bind(&quotation.subject)
        .bind(&quotation.formal_message)
        .bind(&quotation.client_id.0)
        .bind(machine_installation)
        .bind(&quotation.notes)
        .bind(&quotation.billing_details)
        .bind(&quotation.supply)
        .bind(&quotation.installation_and_commissioning)
        .bind(&quotation.terms_and_conditions)
        .bind(&quotation.signature_image)
        .bind(quotation.tax_enabled)
        .bind(quotation.tax_rate_percent.to_string())
        .bind(quotation.total_amount.to_string())
        .bind(&quotation.document_file)
        .bind(quotation.status.as_str())
        .bind(quotation.converted.as_str())
        .bind(&quotation.created_by)
        .bind(fmt_timestamp(quotation.created_at))
        .bind(fmt_timestamp(quotation.updated_at))
        .execute(&mut *tx)
        .await?;

        write_lines(&mut tx, &quotation.id, &quotation.line_items).await?;
        write_galleries(
            &mut tx,
            &quotation.id,
            &quotation.related_products,
            &quotation.suggested_products,
        )
        .await?;

        tx.commit().await
    }

    /// Fetch one quotation, scoped to the principal: non-admins only ever
    /// see their own records, so someone else's id behaves as not-found.
    pub async fn get(
        &self,
        id: &QuotationId,
        principal: &Principal,
    ) -> Result<Quotation, RepositoryError> {
        let mut query = QueryBuilder::new(
            "SELECT id, reference_number, title, subject, formal_message, client_id,
                    machine_installation, notes, billing_details, supply,
                    installation_and_commissioning, terms_and_conditions, signature_image,
                    tax_enabled, tax_rate_percent, total_amount, document_file, status, converted,
                    created_by, created_at, updated_at
             FROM quotation WHERE id = ",
        );
        query.push_bind(&id.0);
        if !principal.is_admin() {
            query.push(" AND created_by = ");
            query.push_bind(&principal.id);
        }

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::not_found("quotation"))?;

        self.hydrate(row).await
    }

    /// Partial update. Only supplied fields change; a supplied `line_items`
    /// or `machine_installation` re-runs catalog resolution and recomputes
    /// the stored total, otherwise the total is untouched.
    pub async fn update(
        &self,
        id: &QuotationId,
        patch: UpdateQuotation,
        principal: &Principal,
    ) -> Result<Quotation, RepositoryError> {
        validate_update(&patch)?;

        let mut quotation = self.get(id, principal).await?;

        if let Some(title) = patch.title {
            quotation.title = title.trim().to_string();
        }
        if let Some(subject) = patch.subject {
            quotation.subject = subject.trim().to_string();
        }
        if let Some(formal_message) = patch.formal_message {
            quotation.formal_message = formal_message.trim().to_string();
        }
        if let Some(client_id) = patch.client_id {
            let client_id = ClientId(client_id.trim().to_string());
            if self.catalog.find_client(&client_id).await?.is_none() {
                return Err(DomainError::validation(
                    "client",
                    format!("client `{client_id}` not found"),
                )
                .into());
            }
            quotation.client_id = client_id;
        }
        if let Some(notes) = patch.notes {
            quotation.notes = Some(notes);
        }
        if let Some(billing_details) = patch.billing_details {
            quotation.billing_details = billing_details.trim().to_string();
        }
        if let Some(supply) = patch.supply {
            quotation.supply = supply.trim().to_string();
        }
        if let Some(installation_and_commissioning) = patch.installation_and_commissioning {
            quotation.installation_and_commissioning =
                installation_and_commissioning.trim().to_string();
        }
        if let Some(terms_and_conditions) = patch.terms_and_conditions {
            quotation.terms_and_conditions = terms_and_conditions.trim().to_string();
        }
        if let Some(signature_image) = patch.signature_image {
            quotation.signature_image = Some(signature_image);
        }
        if let Some(tax_enabled) = patch.tax_enabled {
            quotation.tax_enabled = tax_enabled;
        }
        if let Some(tax_rate_percent) = patch.tax_rate_percent {
            quotation.tax_rate_percent = tax_rate_percent;
        }
        if let Some(related_products) = patch.related_products {
            quotation.related_products = related_products;
        }
        if let Some(suggested_products) = patch.suggested_products {
            quotation.suggested_products = suggested_products;
        }

        let lines_changed = patch.line_items.is_some();
        if let Some(line_inputs) = patch.line_items {
            quotation.line_items = self.resolve_line_items(&line_inputs).await?;
        }
        let installation_changed = patch.machine_installation.is_some();
        if let Some(installation) = patch.machine_installation.as_ref() {
            quotation.machine_installation = Some(build_installation(installation));
        }
        if lines_changed || installation_changed {
            quotation.total_amount = pricing::grand_total(
                &quotation.line_items,
                quotation.machine_installation.as_ref(),
            );
        }

        quotation.updated_at = Utc::now();

        let machine_installation = encode_installation(&quotation.machine_installation);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE quotation SET
                title = ?, subject = ?, formal_message = ?, client_id = ?,
                machine_installation = ?, notes = ?, billing_details = ?, supply = ?,
                installation_and_commissioning = ?, terms_and_conditions = ?,
                signature_image = ?, tax_enabled = ?, tax_rate_percent = ?, total_amount = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&quotation.title)
        .bind(&quotation.subject)
        .bind(&quotation.formal_message)
        .bind(&quotation.client_id.0)
        .bind(machine_installation)
        .bind(&quotation.notes)
        .bind(&quotation.billing_details)
        .bind(&quotation.supply)
        .bind(&quotation.installation_and_commissioning)
        .bind(&quotation.terms_and_conditions)
        .bind(&quotation.signature_image)
        .bind(quotation.tax_enabled)
        .bind(quotation.tax_rate_percent.to_string())
        .bind(quotation.total_amount.to_string())
        .bind(fmt_timestamp(quotation.updated_at))
        .bind(&quotation.id.0)
        .execute(&mut *tx)
        .await?;

        if lines_changed {
            sqlx::query("DELETE FROM quotation_line WHERE quotation_id = ?")
                .bind(&quotation.id.0)
                .execute(&mut *tx)
                .await?;
            write_lines(&mut tx, &quotation.id, &quotation.line_items).await?;
        }

        sqlx::query("DELETE FROM quotation_gallery WHERE quotation_id = ?")
            .bind(&quotation.id.0)
            .execute(&mut *tx)
            .await?;
        write_galleries(
            &mut tx,
            &quotation.id,
            &quotation.related_products,
            &quotation.suggested_products,
        )
        .await?;

        tx.commit().await?;

        Ok(quotation)
    }

    /// Hard delete. Lines and galleries go with the row via FK cascade;
    /// the previous artifact name is handed back so the caller can remove
    /// the file.
    pub async fn delete(
        &self,
        id: &QuotationId,
        principal: &Principal,
    ) -> Result<Option<String>, RepositoryError> {
        let quotation = self.get(id, principal).await?;

        sqlx::query("DELETE FROM quotation WHERE id = ?")
            .bind(&quotation.id.0)
            .execute(&self.pool)
            .await?;

        Ok(quotation.document_file)
    }

    /// Apply an approval decision. Role enforcement happens at the HTTP
    /// layer; here only the state machine speaks.
    pub async fn decide(
        &self,
        id: &QuotationId,
        action: DecisionAction,
        principal: &Principal,
    ) -> Result<Quotation, RepositoryError> {
        let mut quotation = self.get(id, principal).await?;
        quotation.status = quotation.status.decide(action)?;
        quotation.updated_at = Utc::now();

        sqlx::query("UPDATE quotation SET status = ?, updated_at = ? WHERE id = ?")
            .bind(quotation.status.as_str())
            .bind(fmt_timestamp(quotation.updated_at))
            .bind(&quotation.id.0)
            .execute(&self.pool)
            .await?;

        Ok(quotation)
    }

    /// Reassign the sales-pipeline stage. No transition restrictions.
    pub async fn set_converted(
        &self,
        id: &QuotationId,
        stage: ConversionStage,
        principal: &Principal,
    ) -> Result<Quotation, RepositoryError> {
        let mut quotation = self.get(id, principal).await?;
        quotation.converted = stage;
        quotation.updated_at = Utc::now();

        sqlx::query("UPDATE quotation SET converted = ?, updated_at = ? WHERE id = ?")
            .bind(quotation.converted.as_str())
            .bind(fmt_timestamp(quotation.updated_at))
            .bind(&quotation.id.0)
            .execute(&self.pool)
            .await?;

        Ok(quotation)
    }

    /// Point the quotation at a freshly written artifact, returning the
    /// previous artifact name for best-effort cleanup.
    pub async fn replace_document_file(
        &self,
        id: &QuotationId,
        file_name: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let previous: Option<Option<String>> =
            sqlx::query_scalar("SELECT document_file FROM quotation WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;
        let previous = previous.ok_or(RepositoryError::not_found("quotation"))?;

        sqlx::query("UPDATE quotation SET document_file = ? WHERE id = ?")
            .bind(file_name)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(previous.filter(|name| name != file_name))
    }

    /// Scoped, filtered, paginated listing.
    pub async fn list(
        &self,
        params: &QuotationListParams,
        principal: &Principal,
    ) -> Result<QuotationPage, RepositoryError> {
        let pagination = Pagination::from_params(params);
        let filter = match self.build_filter(params, principal).await? {
            Some(filter) => filter,
            None => {
                // Company filters intersected with an explicit client id to
                // nothing: a defined-empty result, not an error.
                return Ok(QuotationPage { records: Vec::new(), pagination: pagination.page_info(0) });
            }
        };

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM quotation q WHERE 1=1");
        filter.push_conditions(&mut count_query);
        let total: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select_query = QueryBuilder::new(
            "SELECT q.id, q.reference_number, q.title, q.subject, q.formal_message, q.client_id,
                    q.machine_installation, q.notes, q.billing_details, q.supply,
                    q.installation_and_commissioning, q.terms_and_conditions, q.signature_image,
                    q.tax_enabled, q.tax_rate_percent, q.total_amount, q.document_file, q.status,
                    q.converted, q.created_by, q.created_at, q.updated_at
             FROM quotation q WHERE 1=1",
        );
        filter.push_conditions(&mut select_query);
        select_query.push(format!(
            " ORDER BY {} {} LIMIT {} OFFSET {}",
            order_expression(pagination.sort_field),
            pagination.sort_direction.sql(),
            pagination.limit,
            pagination.offset(),
        ));

        let rows = select_query.build().fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate(row).await?);
        }

        Ok(QuotationPage { records, pagination: pagination.page_info(total as u64) })
    }

    /// Flat rows for the spreadsheet export; same filter semantics as
    /// `list`, no pagination.
    pub async fn export(
        &self,
        params: &QuotationListParams,
        principal: &Principal,
    ) -> Result<Vec<ExportRow>, RepositoryError> {
        let filter = match self.build_filter(params, principal).await? {
            Some(filter) => filter,
            None => return Ok(Vec::new()),
        };

        let mut query = QueryBuilder::new(
            "SELECT q.reference_number, q.title, q.status, q.converted, q.total_amount,
                    q.created_by, q.created_at,
                    COALESCE(c.name, '') AS client_name,
                    COALESCE(c.company_name, '') AS company_name
             FROM quotation q
             LEFT JOIN client c ON c.id = q.client_id
             WHERE 1=1",
        );
        filter.push_conditions(&mut query);
        query.push(" ORDER BY q.created_at DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(ExportRow {
                    reference_number: row.get("reference_number"),
                    title: row.get("title"),
                    client_name: row.get("client_name"),
                    company_name: row.get("company_name"),
                    status: parse_status(&row)?,
                    converted: parse_converted(&row)?,
                    total_amount: parse_decimal(&row, "total_amount")?,
                    created_by: row.get("created_by"),
                    created_at: parse_timestamp(
                        &row.get::<String, _>("created_at"),
                        "quotation.created_at",
                    )?,
                })
            })
            .collect()
    }

    /// Per-user dashboard counters.
    pub async fn dashboard_counts(&self, user_id: &str) -> Result<DashboardCounts, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total_quotations,
                SUM(CASE WHEN status = 'draft' THEN 1 ELSE 0 END) AS pending_approval,
                SUM(CASE WHEN converted = 'under-development' THEN 1 ELSE 0 END) AS under_development,
                SUM(CASE WHEN converted = 'booked' THEN 1 ELSE 0 END) AS booked,
                SUM(CASE WHEN converted = 'lost' THEN 1 ELSE 0 END) AS lost
             FROM quotation WHERE created_by = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardCounts {
            total_quotations: row.get::<i64, _>("total_quotations"),
            pending_approval: row.get::<Option<i64>, _>("pending_approval").unwrap_or(0),
            under_development: row.get::<Option<i64>, _>("under_development").unwrap_or(0),
            booked: row.get::<Option<i64>, _>("booked").unwrap_or(0),
            lost: row.get::<Option<i64>, _>("lost").unwrap_or(0),
        })
    }

    /// Translate list parameters plus the principal into SQL conditions.
    /// Returns `None` for the defined-empty case (company filters resolved
    /// to a client set that excludes the explicitly requested client).
    async fn build_filter(
        &self,
        params: &QuotationListParams,
        principal: &Principal,
    ) -> Result<Option<ListFilter>, RepositoryError> {
        let status = params.status_filter()?;
        let converted = params.converted_filter()?;
        let (created_from, created_until) = params.created_window()?;

        // Non-admin scoping is unconditional; an admin may narrow by an
        // explicit creator id.
        let created_by = if principal.is_admin() {
            params.created_by.clone()
        } else {
            Some(principal.id.clone())
        };

        let explicit_client =
            params.client_id.as_deref().map(str::trim).filter(|id| !id.is_empty());

        let client_ids = if params.has_company_filter() {
            let company_stage = params
                .company_stage
                .as_deref()
                .map(str::trim)
                .filter(|stage| !stage.is_empty())
                .map(quotar_core::domain::client::CompanyStage::parse)
                .transpose()?;
            let matched = self
                .catalog
                .client_ids_by_company(
                    params.company_name.as_deref(),
                    params.company_code.as_deref(),
                    company_stage,
                )
                .await?;

            match explicit_client {
                Some(explicit) if !matched.iter().any(|id| id.0 == explicit) => return Ok(None),
                Some(explicit) => Some(vec![explicit.to_string()]),
                None => Some(matched.into_iter().map(|id| id.0).collect()),
            }
        } else {
            explicit_client.map(|explicit| vec![explicit.to_string()])
        };

        Ok(Some(ListFilter {
            created_by,
            client_ids,
            search_pattern: params.search_pattern(),
            status,
            converted,
            created_from,
            created_until,
        }))
    }

    async fn resolve_line_items(
        &self,
        inputs: &[LineItemInput],
    ) -> Result<Vec<LineItem>, RepositoryError> {
        let mut line_items = Vec::with_capacity(inputs.len());
        for input in inputs {
            let product_id = ProductId(input.product_id.trim().to_string());
            let product = self.catalog.find_product(&product_id).await?.ok_or_else(|| {
                DomainError::validation(
                    "lineItems",
                    format!("product `{product_id}` not found"),
                )
            })?;
            line_items.push(build_line(input, &product));
        }
        Ok(line_items)
    }

    async fn hydrate(&self, row: sqlx::sqlite::SqliteRow) -> Result<Quotation, RepositoryError> {
        let id = QuotationId(row.get::<String, _>("id"));
        let line_items = self.load_lines(&id).await?;
        let (related_products, suggested_products) = self.load_galleries(&id).await?;
        quotation_from_row(row, line_items, related_products, suggested_products)
    }

    async fn load_lines(&self, id: &QuotationId) -> Result<Vec<LineItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, title, model, specification, image, unit, quantity, unit_price,
                    line_total, notes, terms_and_conditions
             FROM quotation_line WHERE quotation_id = ? ORDER BY position",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LineItem {
                    product_id: ProductId(row.get("product_id")),
                    title: row.get("title"),
                    model: row.get("model"),
                    specification: row.get("specification"),
                    image: row.get("image"),
                    unit: row.get("unit"),
                    quantity: row.get::<i64, _>("quantity") as u32,
                    unit_price: parse_decimal(&row, "unit_price")?,
                    line_total: parse_decimal(&row, "line_total")?,
                    notes: row.get("notes"),
                    terms_and_conditions: row.get("terms_and_conditions"),
                })
            })
            .collect()
    }

    async fn load_galleries(
        &self,
        id: &QuotationId,
    ) -> Result<(Vec<GalleryItem>, Vec<GalleryItem>), RepositoryError> {
        let rows = sqlx::query(
            "SELECT kind, image, model, specification
             FROM quotation_gallery WHERE quotation_id = ? ORDER BY kind, position",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut related = Vec::new();
        let mut suggested = Vec::new();
        for row in rows {
            let item = GalleryItem {
                image: row.get("image"),
                model: row.get("model"),
                specification: row.get("specification"),
            };
            match row.get::<String, _>("kind").as_str() {
                "related" => related.push(item),
                "suggested" => suggested.push(item),
                other => {
                    return Err(RepositoryError::Decode(format!(
                        "unknown gallery kind `{other}`"
                    )))
                }
            }
        }

        Ok((related, suggested))
    }
}

struct ListFilter {
    created_by: Option<String>,
    client_ids: Option<Vec<String>>,
    search_pattern: Option<String>,
    status: Option<QuotationStatus>,
    converted: Option<ConversionStage>,
    created_from: Option<DateTime<Utc>>,
    created_until: Option<DateTime<Utc>>,
}

impl ListFilter {
    fn push_conditions(&self, query: &mut QueryBuilder<'_, sqlx::Sqlite>) {
        if let Some(created_by) = &self.created_by {
            query.push(" AND q.created_by = ");
            query.push_bind(created_by.clone());
        }

        match &self.client_ids {
            Some(ids) if ids.is_empty() => {
                query.push(" AND 0=1");
            }
            Some(ids) => {
                query.push(" AND q.client_id IN (");
                let mut separated = query.separated(", ");
                for id in ids {
                    separated.push_bind(id.clone());
                }
                query.push(")");
            }
            None => {}
        }

        if let Some(pattern) = &self.search_pattern {
            query.push(" AND (LOWER(q.title) LIKE ");
            query.push_bind(pattern.clone());
            query.push(" OR LOWER(q.subject) LIKE ");
            query.push_bind(pattern.clone());
            query.push(")");
        }

        if let Some(status) = self.status {
            query.push(" AND q.status = ");
            query.push_bind(status.as_str());
        }

        if let Some(converted) = self.converted {
            query.push(" AND q.converted = ");
            query.push_bind(converted.as_str());
        }

        if let Some(start) = self.created_from {
            query.push(" AND q.created_at >= ");
            query.push_bind(fmt_timestamp(start));
        }
        if let Some(end) = self.created_until {
            query.push(" AND q.created_at < ");
            query.push_bind(fmt_timestamp(end));
        }
    }
}

fn order_expression(field: SortField) -> String {
    match field {
        // Amounts are stored as TEXT; order them numerically.
        SortField::TotalAmount => "CAST(q.total_amount AS REAL)".to_string(),
        other => format!("q.{}", other.column()),
    }
}

fn validate_create(input: &CreateQuotation) -> Result<(), DomainError> {
    require_non_empty("title", &input.title)?;
    require_non_empty("subject", &input.subject)?;
    require_non_empty("formalMessage", &input.formal_message)?;
    require_non_empty("client", &input.client_id)?;
    require_non_empty("billingDetails", &input.billing_details)?;
    require_non_empty("supply", &input.supply)?;
    require_non_empty("installationAndCommissioning", &input.installation_and_commissioning)?;
    require_non_empty("termsAndConditions", &input.terms_and_conditions)?;
    validate_tax_rate(input.tax_rate_percent)?;
    validate_line_inputs(&input.line_items)?;
    if let Some(installation) = &input.machine_installation {
        validate_installation(installation)?;
    }
    Ok(())
}

fn validate_update(patch: &UpdateQuotation) -> Result<(), DomainError> {
    if let Some(title) = &patch.title {
        require_non_empty("title", title)?;
    }
    if let Some(subject) = &patch.subject {
        require_non_empty("subject", subject)?;
    }
    if let Some(formal_message) = &patch.formal_message {
        require_non_empty("formalMessage", formal_message)?;
    }
    if let Some(client_id) = &patch.client_id {
        require_non_empty("client", client_id)?;
    }
    if let Some(billing_details) = &patch.billing_details {
        require_non_empty("billingDetails", billing_details)?;
    }
    if let Some(supply) = &patch.supply {
        require_non_empty("supply", supply)?;
    }
    if let Some(installation_and_commissioning) = &patch.installation_and_commissioning {
        require_non_empty("installationAndCommissioning", installation_and_commissioning)?;
    }
    if let Some(terms_and_conditions) = &patch.terms_and_conditions {
        require_non_empty("termsAndConditions", terms_and_conditions)?;
    }
    validate_tax_rate(patch.tax_rate_percent)?;
    if let Some(line_items) = &patch.line_items {
        validate_line_inputs(line_items)?;
    }
    if let Some(installation) = &patch.machine_installation {
        validate_installation(installation)?;
    }
    Ok(())
}

fn validate_line_inputs(inputs: &[LineItemInput]) -> Result<(), DomainError> {
    for input in inputs {
        require_non_empty("lineItems", &input.product_id)?;
        require_non_empty("lineItems", &input.unit)?;
        if input.quantity == 0 {
            return Err(DomainError::validation(
                "lineItems",
                "line item quantity must be greater than zero",
            ));
        }
        if input.unit_price < Decimal::ZERO {
            return Err(DomainError::validation(
                "lineItems",
                "line item unit price must not be negative",
            ));
        }
    }
    Ok(())
}

fn validate_installation(input: &MachineInstallationInput) -> Result<(), DomainError> {
    require_non_empty("machineInstallation", &input.unit)?;
    if input.quantity == 0 {
        return Err(DomainError::validation(
            "machineInstallation",
            "installation quantity must be greater than zero",
        ));
    }
    if input.unit_price < Decimal::ZERO {
        return Err(DomainError::validation(
            "machineInstallation",
            "installation unit price must not be negative",
        ));
    }
    Ok(())
}

fn validate_tax_rate(rate: Option<Decimal>) -> Result<(), DomainError> {
    if let Some(rate) = rate {
        if rate < Decimal::ZERO || rate > Decimal::from(100) {
            return Err(DomainError::validation(
                "taxRatePercent",
                "tax rate must be between 0 and 100",
            ));
        }
    }
    Ok(())
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        Err(DomainError::validation(field, format!("{field} is required")))
    } else {
        Ok(())
    }
}

/// Build a stored line from its input and the resolved product, applying
/// both copy rules: display fields snapshot the product when the caller
/// left them blank, while `notes`/`terms_and_conditions` always track the
/// live product record.
fn build_line(input: &LineItemInput, product: &Product) -> LineItem {
    let non_blank = |value: &Option<String>| {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
    };

    LineItem {
        product_id: product.id.clone(),
        title: non_blank(&input.title).unwrap_or_else(|| product.title.clone()),
        model: non_blank(&input.model).or_else(|| product.model.clone()),
        specification: non_blank(&input.specification).or_else(|| product.specification.clone()),
        image: non_blank(&input.image).or_else(|| product.image.clone()),
        unit: input.unit.trim().to_string(),
        quantity: input.quantity,
        unit_price: input.unit_price,
        line_total: pricing::line_total(input.quantity, input.unit_price),
        notes: product.notes.clone(),
        terms_and_conditions: product.terms_and_conditions.clone(),
    }
}

fn build_installation(input: &MachineInstallationInput) -> MachineInstallation {
    MachineInstallation {
        quantity: input.quantity,
        unit: input.unit.trim().to_string(),
        unit_price: input.unit_price,
        total: pricing::line_total(input.quantity, input.unit_price),
    }
}

async fn write_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    quotation_id: &QuotationId,
    line_items: &[LineItem],
) -> Result<(), sqlx::Error> {
    for (position, line) in line_items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quotation_line
                (id, quotation_id, position, product_id, title, model, specification, image,
                 unit, quantity, unit_price, line_total, notes, terms_and_conditions)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&quotation_id.0)
        .bind(position as i64)
        .bind(&line.product_id.0)
        .bind(&line.title)
        .bind(&line.model)
        .bind(&line.specification)
        .bind(&line.image)
        .bind(&line.unit)
        .bind(line.quantity as i64)
        .bind(line.unit_price.to_string())
        .bind(line.line_total.to_string())
        .bind(&line.notes)
        .bind(&line.terms_and_conditions)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn write_galleries(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    quotation_id: &QuotationId,
    related: &[GalleryItem],
    suggested: &[GalleryItem],
) -> Result<(), sqlx::Error> {
    for (kind, items) in [("related", related), ("suggested", suggested)] {
        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quotation_gallery
                    (id, quotation_id, kind, position, image, model, specification)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&quotation_id.0)
            .bind(kind)
            .bind(position as i64)
            .bind(&item.image)
            .bind(&item.model)
            .bind(&item.specification)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

fn quotation_from_row(
    row: sqlx::sqlite::SqliteRow,
    line_items: Vec<LineItem>,
    related_products: Vec<GalleryItem>,
    suggested_products: Vec<GalleryItem>,
) -> Result<Quotation, RepositoryError> {
    let machine_installation = row
        .get::<Option<String>, _>("machine_installation")
        .map(|raw| {
            serde_json::from_str::<MachineInstallation>(&raw).map_err(|error| {
                RepositoryError::Decode(format!("quotation.machine_installation: {error}"))
            })
        })
        .transpose()?;

    Ok(Quotation {
        id: QuotationId(row.get("id")),
        reference_number: row.get("reference_number"),
        title: row.get("title"),
        subject: row.get("subject"),
        formal_message: row.get("formal_message"),
        client_id: ClientId(row.get("client_id")),
        line_items,
        related_products,
        suggested_products,
        machine_installation,
        notes: row.get("notes"),
        billing_details: row.get("billing_details"),
        supply: row.get("supply"),
        installation_and_commissioning: row.get("installation_and_commissioning"),
        terms_and_conditions: row.get("terms_and_conditions"),
        signature_image: row.get("signature_image"),
        tax_enabled: row.get("tax_enabled"),
        tax_rate_percent: parse_decimal(&row, "tax_rate_percent")?,
        total_amount: parse_decimal(&row, "total_amount")?,
        document_file: row.get("document_file"),
        status: parse_status(&row)?,
        converted: parse_converted(&row)?,
        created_by: row.get("created_by"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "quotation.created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "quotation.updated_at")?,
    })
}

fn encode_installation(installation: &Option<MachineInstallation>) -> Option<String> {
    installation.as_ref().and_then(|block| serde_json::to_string(block).ok())
}

fn parse_decimal(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("quotation.{column}: {error}")))
}

fn parse_status(row: &sqlx::sqlite::SqliteRow) -> Result<QuotationStatus, RepositoryError> {
    QuotationStatus::parse(&row.get::<String, _>("status"))
        .map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn parse_converted(row: &sqlx::sqlite::SqliteRow) -> Result<ConversionStage, RepositoryError> {
    ConversionStage::parse(&row.get::<String, _>("converted"))
        .map_err(|error| RepositoryError::Decode(error.to_string()))
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that range
/// comparisons in SQL stay lexicographic.
pub(crate) fn fmt_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use quotar_core::domain::client::{Client, ClientId, CompanyStage};
    use quotar_core::domain::principal::{Principal, Role};
    use quotar_core::domain::product::{Product, ProductId};
    use quotar_core::domain::quotation::{
        ConversionStage, CreateQuotation, DecisionAction, LineItemInput, MachineInstallationInput,
        QuotationStatus, UpdateQuotation,
    };
    use quotar_core::errors::DomainError;
    use quotar_core::listing::QuotationListParams;
    use quotar_core::reference;

    use super::SqlQuotationRepository;
    use crate::repositories::{RepositoryError, SqlCatalog, SqlClientRepository, SqlProductRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    const CLIENT_ACME: &str = "client-acme";
    const CLIENT_GLOBEX: &str = "client-globex";
    const PRODUCT_FAN: &str = "prod-fan";
    const PRODUCT_DUCT: &str = "prod-duct";

    /// Each test gets its own named shared-cache database so concurrent
    /// connections within a test see the same data without tests seeing
    /// each other.
    async fn repository(tag: &str, max_connections: u32) -> (SqlQuotationRepository, DbPool) {
        let url = format!("sqlite:file:{tag}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, max_connections, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        seed_catalog(&pool).await;
        let catalog = Arc::new(SqlCatalog::new(pool.clone()));
        (SqlQuotationRepository::new(pool.clone(), catalog), pool)
    }

    async fn seed_catalog(pool: &DbPool) {
        let clients = SqlClientRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());
        let now = Utc::now();

        clients
            .insert(&Client {
                id: ClientId(CLIENT_ACME.to_string()),
                name: "Rakesh Sharma".to_string(),
                emails: vec!["rakesh@acmefab.example".to_string()],
                phones: vec!["+91-9810000001".to_string()],
                position: Some("Plant Head".to_string()),
                address: Some("Plot 14, Industrial Area".to_string()),
                place: None,
                city: Some("Noida".to_string()),
                state: Some("UP".to_string()),
                pin: Some("201301".to_string()),
                company_name: "Acme Fabricators".to_string(),
                company_code: "ACME01".to_string(),
                company_stage: CompanyStage::Running,
                created_by: "u-manager".to_string(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed acme client");

        clients
            .insert(&Client {
                id: ClientId(CLIENT_GLOBEX.to_string()),
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
            .expect("seed globex client");

        products
            .insert(&Product {
                id: ProductId(PRODUCT_FAN.to_string()),
                title: "Axial Flow Fan".to_string(),
                model: Some("AF-450".to_string()),
                make: Some("Windtech".to_string()),
                image: Some("uploads/products/af-450.png".to_string()),
                specification: Some("450mm sweep, 1400 RPM, 3-phase".to_string()),
                price: Some(Decimal::new(10_000, 2)),
                notes: Some("Commissioning included in quoted price".to_string()),
                terms_and_conditions: Some("Warranty 12 months from dispatch".to_string()),
                description: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed fan product");

        products
            .insert(&Product {
                id: ProductId(PRODUCT_DUCT.to_string()),
                title: "GI Ducting".to_string(),
                model: None,
                make: None,
                image: None,
                specification: Some("24 gauge galvanized".to_string()),
                price: Some(Decimal::new(45_000, 2)),
                notes: None,
                terms_and_conditions: None,
                description: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed duct product");
    }

    fn admin() -> Principal {
        Principal { id: "u-admin".to_string(), role: Role::Admin, name: Some("Admin".to_string()) }
    }

    fn manager() -> Principal {
        Principal {
            id: "u-manager".to_string(),
            role: Role::Manager,
            name: Some("Manager".to_string()),
        }
    }

    fn other_manager() -> Principal {
        Principal { id: "u-other".to_string(), role: Role::Manager, name: None }
    }

    fn line(product_id: &str, quantity: u32, unit_price: Decimal) -> LineItemInput {
        LineItemInput {
            product_id: product_id.to_string(),
            unit: "nos".to_string(),
            quantity,
            unit_price,
            ..LineItemInput::default()
        }
    }

    fn create_input(title: &str, client_id: &str, lines: Vec<LineItemInput>) -> CreateQuotation {
        CreateQuotation {
            title: title.to_string(),
            subject: "Supply of ventilation equipment".to_string(),
            formal_message: "We thank you for your enquiry and are pleased to quote as under."
                .to_string(),
            client_id: client_id.to_string(),
            line_items: lines,
            related_products: Vec::new(),
            suggested_products: Vec::new(),
            machine_installation: None,
            notes: None,
            billing_details: "GST 18% extra as applicable".to_string(),
            supply: "4-6 weeks from technically and commercially clear order".to_string(),
            installation_and_commissioning: "In client scope under our supervision".to_string(),
            terms_and_conditions: "Prices ex-works Noida. Payment 50% advance.".to_string(),
            signature_image: None,
            tax_enabled: None,
            tax_rate_percent: None,
            total_amount: None,
        }
    }

    fn sequence_of(reference_number: &str) -> u32 {
        reference_number.rsplit('-').next().and_then(|s| s.parse().ok()).expect("sequence suffix")
    }

    #[tokio::test]
    async fn create_computes_totals_and_assigns_first_reference_of_month() {
        let (repo, _pool) = repository("create_first_reference", 1).await;

        let mut input =
            create_input("HVAC retrofit", CLIENT_ACME, vec![line(PRODUCT_FAN, 2, Decimal::new(10_000, 2))]);
        // Caller-supplied totals are never trusted.
        input.total_amount = Some(Decimal::new(999_900, 2));

        let created = repo.create(input, &manager()).await.expect("create");

        assert_eq!(created.total_amount, Decimal::new(20_000, 2));
        assert_eq!(created.status, QuotationStatus::Draft);
        assert_eq!(created.converted, ConversionStage::UnderDevelopment);
        assert_eq!(created.created_by, "u-manager");
        assert_eq!(
            created.reference_number,
            format!("{}0001", reference::month_prefix(created.created_at)),
        );
        assert!(created.document_file.is_none());

        // Display snapshot and live-bound fields both come from the product.
        let line_item = &created.line_items[0];
        assert_eq!(line_item.title, "Axial Flow Fan");
        assert_eq!(line_item.model.as_deref(), Some("AF-450"));
        assert_eq!(line_item.notes.as_deref(), Some("Commissioning included in quoted price"));
        assert_eq!(
            line_item.terms_and_conditions.as_deref(),
            Some("Warranty 12 months from dispatch"),
        );
    }

    #[tokio::test]
    async fn create_fails_fast_on_the_first_invalid_field() {
        let (repo, _pool) = repository("create_fail_fast", 1).await;

        // Both the title and the client are invalid; the first one wins.
        let input = create_input("   ", "no-such-client", Vec::new());
        let error = repo.create(input, &manager()).await.expect_err("should fail");

        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::Validation { field: "title", .. })
        ));
        assert_eq!(error.kind(), "validation_error");
    }

    #[tokio::test]
    async fn create_rejects_unknown_client_and_product() {
        let (repo, _pool) = repository("create_unknown_refs", 1).await;

        let error = repo
            .create(create_input("Quote", "no-such-client", Vec::new()), &manager())
            .await
            .expect_err("unknown client");
        assert!(error.to_string().contains("no-such-client"));
        assert_eq!(error.kind(), "validation_error");

        let error = repo
            .create(
                create_input("Quote", CLIENT_ACME, vec![line("no-such-product", 1, Decimal::ONE)]),
                &manager(),
            )
            .await
            .expect_err("unknown product");
        assert!(error.to_string().contains("no-such-product"));
        assert_eq!(error.kind(), "validation_error");
    }

    #[tokio::test]
    async fn sequence_increments_within_the_month() {
        let (repo, _pool) = repository("sequence_increments", 1).await;

        let first = repo
            .create(create_input("First", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("first create");
        let second = repo
            .create(create_input("Second", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("second create");

        assert_eq!(sequence_of(&second.reference_number), sequence_of(&first.reference_number) + 1);
    }

    #[tokio::test]
    async fn concurrent_creates_produce_distinct_references() {
        let (repo, pool) = repository("concurrent_creates", 5).await;
        let catalog = Arc::new(SqlCatalog::new(pool.clone()));
        let second_repo = SqlQuotationRepository::new(pool.clone(), catalog);

        let left_manager = manager();
        let right_manager = manager();
        let (left, right) = tokio::join!(
            repo.create(create_input("Left", CLIENT_ACME, Vec::new()), &left_manager),
            second_repo.create(create_input("Right", CLIENT_ACME, Vec::new()), &right_manager),
        );

        let left = left.expect("left create");
        let right = right.expect("right create");
        assert_ne!(left.reference_number, right.reference_number);

        let sequences =
            [sequence_of(&left.reference_number), sequence_of(&right.reference_number)];
        assert!(sequences.contains(&1) && sequences.contains(&2));
    }

    #[tokio::test]
    async fn deleted_sequence_numbers_are_not_backfilled() {
        let (repo, _pool) = repository("sequence_gaps", 1).await;
        let principal = manager();

        let _first = repo
            .create(create_input("First", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("first");
        let second = repo
            .create(create_input("Second", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("second");
        let third = repo
            .create(create_input("Third", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("third");
        assert_eq!(sequence_of(&third.reference_number), 3);

        repo.delete(&second.id, &principal).await.expect("delete second");

        let fourth = repo
            .create(create_input("Fourth", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("fourth");
        assert_eq!(sequence_of(&fourth.reference_number), 4, "gap from deletion must persist");
    }

    #[tokio::test]
    async fn update_partial_preserves_omitted_fields() {
        let (repo, _pool) = repository("update_partial", 1).await;
        let principal = manager();

        let created = repo
            .create(
                create_input("Original title", CLIENT_ACME, vec![line(PRODUCT_FAN, 3, Decimal::new(5_000, 2))]),
                &principal,
            )
            .await
            .expect("create");

        let updated = repo
            .update(
                &created.id,
                UpdateQuotation {
                    title: Some("Amended title".to_string()),
                    ..UpdateQuotation::default()
                },
                &principal,
            )
            .await
            .expect("update");

        assert_eq!(updated.title, "Amended title");
        assert_eq!(updated.line_items, created.line_items);
        assert_eq!(updated.total_amount, created.total_amount);
        assert_eq!(updated.status, created.status);
        assert_eq!(updated.converted, created.converted);
        assert_eq!(updated.reference_number, created.reference_number);
        assert_eq!(updated.created_by, created.created_by);
    }

    #[tokio::test]
    async fn update_with_lines_recomputes_total_and_refreshes_live_fields() {
        let (repo, pool) = repository("update_lines", 1).await;
        let principal = manager();

        let created = repo
            .create(
                create_input("Quote", CLIENT_ACME, vec![line(PRODUCT_FAN, 1, Decimal::new(10_000, 2))]),
                &principal,
            )
            .await
            .expect("create");

        // The product's legal boilerplate changes after the quotation was
        // written; the next line write must pick up the live values.
        sqlx::query("UPDATE product SET notes = ?, terms_and_conditions = ? WHERE id = ?")
            .bind("Commissioning charged separately")
            .bind("Warranty 6 months from dispatch")
            .bind(PRODUCT_FAN)
            .execute(&pool)
            .await
            .expect("amend product");

        let mut custom_line = line(PRODUCT_FAN, 2, Decimal::new(12_500, 2));
        custom_line.title = Some("Axial Flow Fan (site variant)".to_string());

        let mut patch = UpdateQuotation { line_items: Some(vec![custom_line]), ..UpdateQuotation::default() };
        patch.total_amount = Some(Decimal::ONE);

        let updated = repo.update(&created.id, patch, &principal).await.expect("update");

        assert_eq!(updated.total_amount, Decimal::new(25_000, 2));
        let line_item = &updated.line_items[0];
        assert_eq!(line_item.title, "Axial Flow Fan (site variant)");
        assert_eq!(line_item.notes.as_deref(), Some("Commissioning charged separately"));
        assert_eq!(line_item.terms_and_conditions.as_deref(), Some("Warranty 6 months from dispatch"));
    }

    #[tokio::test]
    async fn update_with_installation_keeps_totals_consistent() {
        let (repo, _pool) = repository("update_installation", 1).await;
        let principal = manager();

        let created = repo
            .create(
                create_input("Quote", CLIENT_ACME, vec![line(PRODUCT_FAN, 1, Decimal::new(10_000, 2))]),
                &principal,
            )
            .await
            .expect("create");

        let updated = repo
            .update(
                &created.id,
                UpdateQuotation {
                    machine_installation: Some(MachineInstallationInput {
                        quantity: 1,
                        unit: "job".to_string(),
                        unit_price: Decimal::new(7_500, 2),
                    }),
                    ..UpdateQuotation::default()
                },
                &principal,
            )
            .await
            .expect("update");

        assert_eq!(updated.total_amount, Decimal::new(17_500, 2));
    }

    #[tokio::test]
    async fn decide_approves_a_draft_then_conflicts_forever() {
        let (repo, _pool) = repository("decide_terminal", 1).await;
        let principal = manager();

        let created = repo
            .create(create_input("Quote", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("create");

        let approved =
            repo.decide(&created.id, DecisionAction::Approve, &admin()).await.expect("approve");
        assert_eq!(approved.status, QuotationStatus::Accepted);

        let error = repo
            .decide(&created.id, DecisionAction::Reject, &admin())
            .await
            .expect_err("terminal decision should conflict");
        assert_eq!(error.kind(), "conflict");

        let current = repo.get(&created.id, &admin()).await.expect("get");
        assert_eq!(current.status, QuotationStatus::Accepted);
    }

    #[tokio::test]
    async fn converted_is_freely_reassignable_in_any_status() {
        let (repo, _pool) = repository("converted_free", 1).await;
        let principal = manager();

        let created = repo
            .create(create_input("Quote", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("create");
        repo.decide(&created.id, DecisionAction::Approve, &admin()).await.expect("approve");

        let booked = repo
            .set_converted(&created.id, ConversionStage::Booked, &principal)
            .await
            .expect("book");
        assert_eq!(booked.status, QuotationStatus::Accepted);
        assert_eq!(booked.converted, ConversionStage::Booked);

        let lost = repo
            .set_converted(&created.id, ConversionStage::Lost, &principal)
            .await
            .expect("lose");
        assert_eq!(lost.converted, ConversionStage::Lost);
    }

    #[tokio::test]
    async fn non_admins_cannot_see_or_delete_other_users_records() {
        let (repo, _pool) = repository("ownership", 1).await;

        let created = repo
            .create(create_input("Quote", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("create");

        let error = repo.get(&created.id, &other_manager()).await.expect_err("foreign get");
        assert_eq!(error.kind(), "not_found");

        let error = repo.delete(&created.id, &other_manager()).await.expect_err("foreign delete");
        assert_eq!(error.kind(), "not_found");

        // An admin sees everything.
        repo.get(&created.id, &admin()).await.expect("admin get");
    }

    #[tokio::test]
    async fn list_scopes_non_admins_to_their_own_records() {
        let (repo, _pool) = repository("list_scoping", 1).await;

        repo.create(create_input("Mine A", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("mine a");
        repo.create(create_input("Mine B", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("mine b");
        repo.create(create_input("Theirs", CLIENT_GLOBEX, Vec::new()), &other_manager())
            .await
            .expect("theirs");

        // A non-admin cannot widen the scope, even with an explicit filter.
        let params = QuotationListParams {
            created_by: Some("u-other".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &manager()).await.expect("list");
        assert_eq!(page.pagination.total, 2);
        assert!(page.records.iter().all(|quotation| quotation.created_by == "u-manager"));

        // Admins are unscoped by default and may narrow explicitly.
        let page = repo.list(&QuotationListParams::default(), &admin()).await.expect("admin list");
        assert_eq!(page.pagination.total, 3);

        let params = QuotationListParams {
            created_by: Some("u-other".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &admin()).await.expect("admin narrowed list");
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.records[0].created_by, "u-other");
    }

    #[tokio::test]
    async fn list_filters_combine_with_and_semantics() {
        let (repo, _pool) = repository("list_filters", 1).await;
        let principal = manager();

        let draft = repo
            .create(create_input("Cooling tower refurbishment", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("draft");
        let accepted = repo
            .create(create_input("Fresh air system", CLIENT_GLOBEX, Vec::new()), &principal)
            .await
            .expect("accepted");
        repo.decide(&accepted.id, DecisionAction::Approve, &admin()).await.expect("approve");

        let params = QuotationListParams {
            status: Some("draft".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("status filter");
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.records[0].id, draft.id);

        let params = QuotationListParams {
            search: Some("FRESH AIR".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("search filter");
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.records[0].id, accepted.id);

        let params = QuotationListParams {
            search: Some("air".to_string()),
            status: Some("draft".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("combined filter");
        assert_eq!(page.pagination.total, 0);

        let params = QuotationListParams {
            status: Some("shipped".to_string()),
            ..QuotationListParams::default()
        };
        let error = repo.list(&params, &principal).await.expect_err("unknown status");
        assert_eq!(error.kind(), "validation_error");
    }

    #[tokio::test]
    async fn company_filters_resolve_to_client_sets() {
        let (repo, _pool) = repository("company_filters", 1).await;
        let principal = manager();

        repo.create(create_input("Acme quote", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("acme quote");
        repo.create(create_input("Globex quote", CLIENT_GLOBEX, Vec::new()), &principal)
            .await
            .expect("globex quote");

        let params = QuotationListParams {
            company_name: Some("acme".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("company name filter");
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.records[0].title, "Acme quote");

        // An explicit client id outside the resolved company set is a
        // defined-empty result, not an error.
        let params = QuotationListParams {
            client_id: Some(CLIENT_ACME.to_string()),
            company_code: Some("GLB02".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("disjoint intersection");
        assert_eq!(page.pagination.total, 0);
        assert!(page.records.is_empty());

        // The same explicit id inside the set narrows normally.
        let params = QuotationListParams {
            client_id: Some(CLIENT_GLOBEX.to_string()),
            company_code: Some("GLB02".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("consistent intersection");
        assert_eq!(page.pagination.total, 1);
    }

    #[tokio::test]
    async fn pagination_reports_totals_and_page_counts() {
        let (repo, _pool) = repository("pagination", 1).await;
        let principal = manager();

        for index in 0..3 {
            repo.create(create_input(&format!("Quote {index}"), CLIENT_ACME, Vec::new()), &principal)
                .await
                .expect("create");
        }

        let params =
            QuotationListParams { limit: Some(2), ..QuotationListParams::default() };
        let first_page = repo.list(&params, &principal).await.expect("first page");
        assert_eq!(first_page.records.len(), 2);
        assert_eq!(first_page.pagination.total, 3);
        assert_eq!(first_page.pagination.pages, 2);

        let params = QuotationListParams {
            limit: Some(2),
            page: Some(2),
            ..QuotationListParams::default()
        };
        let second_page = repo.list(&params, &principal).await.expect("second page");
        assert_eq!(second_page.records.len(), 1);
    }

    #[tokio::test]
    async fn month_range_filter_excludes_records_outside_the_window() {
        let (repo, _pool) = repository("month_range", 1).await;
        let principal = manager();

        repo.create(create_input("Quote", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("create");

        let params = QuotationListParams {
            from_month: Some("2099-01".to_string()),
            ..QuotationListParams::default()
        };
        let page = repo.list(&params, &principal).await.expect("future window");
        assert_eq!(page.pagination.total, 0);
    }

    #[tokio::test]
    async fn replace_document_file_returns_the_previous_artifact() {
        let (repo, _pool) = repository("artifact_pointer", 1).await;
        let principal = manager();

        let created = repo
            .create(create_input("Quote", CLIENT_ACME, Vec::new()), &principal)
            .await
            .expect("create");

        let previous = repo
            .replace_document_file(&created.id, "QT-2508-0001-1000.pdf")
            .await
            .expect("first pointer swap");
        assert_eq!(previous, None);

        let previous = repo
            .replace_document_file(&created.id, "QT-2508-0001-2000.pdf")
            .await
            .expect("second pointer swap");
        assert_eq!(previous.as_deref(), Some("QT-2508-0001-1000.pdf"));

        let deleted_artifact = repo.delete(&created.id, &principal).await.expect("delete");
        assert_eq!(deleted_artifact.as_deref(), Some("QT-2508-0001-2000.pdf"));
    }

    #[tokio::test]
    async fn export_rows_carry_client_display_fields() {
        let (repo, _pool) = repository("export_rows", 1).await;
        let principal = manager();

        repo.create(
            create_input("Export me", CLIENT_ACME, vec![line(PRODUCT_DUCT, 1, Decimal::new(45_000, 2))]),
            &principal,
        )
        .await
        .expect("create");

        let rows = repo.export(&QuotationListParams::default(), &principal).await.expect("export");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Export me");
        assert_eq!(rows[0].client_name, "Rakesh Sharma");
        assert_eq!(rows[0].company_name, "Acme Fabricators");
        assert_eq!(rows[0].total_amount, Decimal::new(45_000, 2));
    }

    #[tokio::test]
    async fn dashboard_counts_are_scoped_to_the_user() {
        let (repo, _pool) = repository("dashboard_counts", 1).await;

        let mine = repo
            .create(create_input("Mine", CLIENT_ACME, Vec::new()), &manager())
            .await
            .expect("mine");
        repo.create(create_input("Theirs", CLIENT_ACME, Vec::new()), &other_manager())
            .await
            .expect("theirs");
        repo.set_converted(&mine.id, ConversionStage::Booked, &manager()).await.expect("book");

        let counts = repo.dashboard_counts("u-manager").await.expect("counts");
        assert_eq!(counts.total_quotations, 1);
        assert_eq!(counts.pending_approval, 1);
        assert_eq!(counts.booked, 1);
        assert_eq!(counts.under_development, 0);
        assert_eq!(counts.lost, 0);
    }
}
