use std::sync::Arc;

use secrecy::SecretString;

use quotar_core::config::CompanyConfig;
use quotar_db::repositories::{SqlCatalog, SqlClientRepository, SqlQuotationRepository};
use quotar_db::DbPool;

use crate::pdf::PdfRenderer;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub quotations: Arc<SqlQuotationRepository>,
    pub catalog: Arc<SqlCatalog>,
    pub clients: Arc<SqlClientRepository>,
    pub renderer: Arc<PdfRenderer>,
    pub company: CompanyConfig,
    pub gateway_secret: Option<SecretString>,
}

impl AppState {
    pub fn new(
        db_pool: DbPool,
        renderer: PdfRenderer,
        company: CompanyConfig,
        gateway_secret: Option<SecretString>,
    ) -> Self {
        let catalog = Arc::new(SqlCatalog::new(db_pool.clone()));
        let quotations =
            Arc::new(SqlQuotationRepository::new(db_pool.clone(), catalog.clone()));
        let clients = Arc::new(SqlClientRepository::new(db_pool.clone()));

        Self {
            db_pool,
            quotations,
            catalog,
            clients,
            renderer: Arc::new(renderer),
            company,
            gateway_secret,
        }
    }
}
