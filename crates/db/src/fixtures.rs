use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use quotar_core::domain::client::{Client, ClientId, CompanyStage};
use quotar_core::domain::principal::{Principal, Role};
use quotar_core::domain::product::{Product, ProductId};
use quotar_core::domain::quotation::{CreateQuotation, GalleryItem, LineItemInput};

use crate::repositories::{
    RepositoryError, SqlCatalog, SqlClientRepository, SqlProductRepository, SqlQuotationRepository,
};
use crate::DbPool;

const DEMO_CLIENT_ID: &str = "client-demo-sterling";
const DEMO_PRODUCT_IDS: &[&str] = &["prod-demo-axial-fan", "prod-demo-led-highbay"];
const DEMO_PRINCIPAL_ID: &str = "user-demo-manager";

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub already_seeded: bool,
    pub clients_seeded: usize,
    pub products_seeded: usize,
    pub quotations_seeded: usize,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

/// Deterministic demo dataset: one client, two catalog products, and one
/// draft quotation created through the regular repository path so it gets
/// a real reference number and computed totals.
pub struct DemoDataset;

impl DemoDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let clients = SqlClientRepository::new(pool.clone());
        let products = SqlProductRepository::new(pool.clone());

        if clients.find_by_id(&ClientId(DEMO_CLIENT_ID.to_string())).await?.is_some() {
            return Ok(SeedResult {
                already_seeded: true,
                clients_seeded: 0,
                products_seeded: 0,
                quotations_seeded: 0,
            });
        }

        let now = Utc::now();
        clients
            .insert(&Client {
                id: ClientId(DEMO_CLIENT_ID.to_string()),
                name: "Suresh Menon".to_string(),
                emails: vec!["suresh.menon@sterlingmills.example".to_string()],
                phones: vec!["+91-9810012345".to_string()],
                position: Some("General Manager - Projects".to_string()),
                address: Some("B-42, Phase II".to_string()),
                place: Some("Okhla Industrial Area".to_string()),
                city: Some("New Delhi".to_string()),
                state: Some("Delhi".to_string()),
                pin: Some("110020".to_string()),
                company_name: "Sterling Mills".to_string(),
                company_code: "STM01".to_string(),
                company_stage: CompanyStage::Running,
                created_by: DEMO_PRINCIPAL_ID.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        products
            .insert(&Product {
                id: ProductId(DEMO_PRODUCT_IDS[0].to_string()),
                title: "Axial Flow Fan".to_string(),
                model: Some("AF-630".to_string()),
                make: Some("Windtech".to_string()),
                image: Some("uploads/products/af-630.png".to_string()),
                specification: Some("630mm sweep, 960 RPM, 3-phase, cast aluminium impeller"
                    .to_string()),
                price: Some(Decimal::new(18_500_00, 2)),
                notes: Some("Includes mounting frame and bird screen".to_string()),
                terms_and_conditions: Some(
                    "Warranty 12 months from dispatch or 9 months from commissioning, \
                     whichever is earlier"
                        .to_string(),
                ),
                description: Some("Heavy-duty exhaust fan for process ventilation".to_string()),
                created_at: now,
                updated_at: now,
            })
            .await?;

        products
            .insert(&Product {
                id: ProductId(DEMO_PRODUCT_IDS[1].to_string()),
                title: "LED High Bay Luminaire".to_string(),
                model: Some("HB-150W".to_string()),
                make: Some("Lumina".to_string()),
                image: None,
                specification: Some("150W, 21000 lm, IP65, 5 year driver warranty".to_string()),
                price: Some(Decimal::new(6_200_00, 2)),
                notes: None,
                terms_and_conditions: Some("Warranty 60 months on driver, 24 on housing"
                    .to_string()),
                description: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let quotations =
            SqlQuotationRepository::new(pool.clone(), Arc::new(SqlCatalog::new(pool.clone())));
        let principal = Principal {
            id: DEMO_PRINCIPAL_ID.to_string(),
            role: Role::Manager,
            name: Some("Demo Manager".to_string()),
        };

        quotations
            .create(
                CreateQuotation {
                    title: "Ventilation and lighting upgrade".to_string(),
                    subject: "Supply of axial fans and LED high bays for the finishing shed"
                        .to_string(),
                    formal_message:
                        "We thank you for your valued enquiry and are pleased to submit our most \
                         competitive offer as under."
                            .to_string(),
                    client_id: DEMO_CLIENT_ID.to_string(),
                    line_items: vec![
                        LineItemInput {
                            product_id: DEMO_PRODUCT_IDS[0].to_string(),
                            unit: "nos".to_string(),
                            quantity: 6,
                            unit_price: Decimal::new(18_500_00, 2),
                            ..LineItemInput::default()
                        },
                        LineItemInput {
                            product_id: DEMO_PRODUCT_IDS[1].to_string(),
                            unit: "nos".to_string(),
                            quantity: 24,
                            unit_price: Decimal::new(5_950_00, 2),
                            ..LineItemInput::default()
                        },
                    ],
                    related_products: vec![GalleryItem {
                        image: Some("uploads/products/af-450.png".to_string()),
                        model: Some("AF-450".to_string()),
                        specification: Some("450mm sweep variant".to_string()),
                    }],
                    suggested_products: Vec::new(),
                    machine_installation: None,
                    notes: Some("Unloading at site in client scope".to_string()),
                    billing_details: "GST 18% extra as applicable".to_string(),
                    supply: "4-6 weeks from technically and commercially clear order".to_string(),
                    installation_and_commissioning:
                        "Installation in client scope under our free supervision".to_string(),
                    terms_and_conditions:
                        "Prices ex-works Noida. Payment: 50% advance, balance before dispatch. \
                         Offer validity 30 days."
                            .to_string(),
                    signature_image: None,
                    tax_enabled: Some(true),
                    tax_rate_percent: Some(Decimal::from(18)),
                    total_amount: None,
                },
                &principal,
            )
            .await?;

        Ok(SeedResult {
            already_seeded: false,
            clients_seeded: 1,
            products_seeded: DEMO_PRODUCT_IDS.len(),
            quotations_seeded: 1,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let client_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM client WHERE id = ?")
            .bind(DEMO_CLIENT_ID)
            .fetch_one(pool)
            .await?;

        let product_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product WHERE id IN (?, ?)")
                .bind(DEMO_PRODUCT_IDS[0])
                .bind(DEMO_PRODUCT_IDS[1])
                .fetch_one(pool)
                .await?;

        let quotation_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM quotation WHERE created_by = ?")
                .bind(DEMO_PRINCIPAL_ID)
                .fetch_one(pool)
                .await?;

        let line_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM quotation_line ql
             JOIN quotation q ON q.id = ql.quotation_id
             WHERE q.created_by = ?",
        )
        .bind(DEMO_PRINCIPAL_ID)
        .fetch_one(pool)
        .await?;

        let checks = vec![
            ("demo-client", client_count == 1),
            ("demo-products", product_count == DEMO_PRODUCT_IDS.len() as i64),
            ("demo-quotation", quotation_count == 1),
            ("demo-quotation-lines", line_count == 2),
        ];
        let all_present = checks.iter().all(|(_, passed)| *passed);

        Ok(VerificationResult { all_present, checks })
    }
}
