use async_trait::async_trait;
use thiserror::Error;

use quotar_core::domain::client::{Client, ClientId, CompanyStage};
use quotar_core::domain::product::{Product, ProductId};
use quotar_core::errors::DomainError;

pub mod client;
pub mod product;
pub mod quotation;

pub use client::SqlClientRepository;
pub use product::SqlProductRepository;
pub use quotation::{DashboardCounts, ExportRow, QuotationPage, SqlQuotationRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("reference number assignment kept colliding; last attempt was `{reference}`")]
    ReferenceConflict { reference: String },
}

impl RepositoryError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    /// Stable machine-readable kind for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(domain) => domain.kind(),
            Self::Database(_) | Self::Decode(_) => "upstream_unavailable",
            Self::NotFound { .. } => "not_found",
            Self::ReferenceConflict { .. } => "conflict",
        }
    }
}

/// The catalog side of the system as the quotation path sees it: id
/// resolution for referential validation, denormalized copy-in, and the
/// indirect company filters of the list view.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError>;

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Resolve company-level filters to the set of matching client ids.
    async fn client_ids_by_company(
        &self,
        company_name: Option<&str>,
        company_code: Option<&str>,
        company_stage: Option<CompanyStage>,
    ) -> Result<Vec<ClientId>, RepositoryError>;
}

/// SQL-backed catalog lookup, delegating to the client and product
/// repositories.
pub struct SqlCatalog {
    clients: SqlClientRepository,
    products: SqlProductRepository,
}

impl SqlCatalog {
    pub fn new(pool: crate::DbPool) -> Self {
        Self {
            clients: SqlClientRepository::new(pool.clone()),
            products: SqlProductRepository::new(pool),
        }
    }
}

#[async_trait]
impl CatalogLookup for SqlCatalog {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        self.clients.find_by_id(id).await
    }

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        self.products.find_by_id(id).await
    }

    async fn client_ids_by_company(
        &self,
        company_name: Option<&str>,
        company_code: Option<&str>,
        company_stage: Option<CompanyStage>,
    ) -> Result<Vec<ClientId>, RepositoryError> {
        self.clients.ids_matching_company(company_name, company_code, company_stage).await
    }
}
