use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::Row;

use quotar_core::domain::product::{Product, ProductId};

use super::client::parse_timestamp;
use super::RepositoryError;
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, title, model, make, image, specification, price, notes,
                    terms_and_conditions, description, created_at, updated_at
             FROM product WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(product_from_row).transpose()
    }

    /// Insert a product record; fixtures and tests only, catalog CRUD is an
    /// external concern.
    pub async fn insert(&self, product: &Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product
                (id, title, model, make, image, specification, price, notes,
                 terms_and_conditions, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&product.id.0)
        .bind(&product.title)
        .bind(&product.model)
        .bind(&product.make)
        .bind(&product.image)
        .bind(&product.specification)
        .bind(product.price.map(|price| price.to_string()))
        .bind(&product.notes)
        .bind(&product.terms_and_conditions)
        .bind(&product.description)
        .bind(product.created_at.to_rfc3339())
        .bind(product.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn product_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let price = row
        .get::<Option<String>, _>("price")
        .map(|raw| {
            Decimal::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("product.price: {error}")))
        })
        .transpose()?;

    Ok(Product {
        id: ProductId(row.get("id")),
        title: row.get("title"),
        model: row.get("model"),
        make: row.get("make"),
        image: row.get("image"),
        specification: row.get("specification"),
        price,
        notes: row.get("notes"),
        terms_and_conditions: row.get("terms_and_conditions"),
        description: row.get("description"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "product.created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "product.updated_at")?,
    })
}
