use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row};

use quotar_core::domain::client::{Client, ClientId, CompanyStage};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, emails, phones, position, address, place, city, state, pin,
                    company_name, company_code, company_stage, created_by, created_at, updated_at
             FROM client WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(client_from_row).transpose()
    }

    /// Resolve company-level list filters to the matching client-id set.
    /// Name matches are case-insensitive substrings; code and stage are
    /// exact.
    pub async fn ids_matching_company(
        &self,
        company_name: Option<&str>,
        company_code: Option<&str>,
        company_stage: Option<CompanyStage>,
    ) -> Result<Vec<ClientId>, RepositoryError> {
        let mut query = QueryBuilder::new("SELECT id FROM client WHERE 1=1");

        if let Some(name) = company_name.map(str::trim).filter(|name| !name.is_empty()) {
            query.push(" AND LOWER(company_name) LIKE ");
            query.push_bind(format!("%{}%", name.to_ascii_lowercase()));
        }
        if let Some(code) = company_code.map(str::trim).filter(|code| !code.is_empty()) {
            query.push(" AND company_code = ");
            query.push_bind(code.to_string());
        }
        if let Some(stage) = company_stage {
            query.push(" AND company_stage = ");
            query.push_bind(stage.as_str());
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| ClientId(row.get::<String, _>("id"))).collect())
    }

    pub async fn count_created_by(&self, user_id: &str) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM client WHERE created_by = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Insert a client record. The catalog CRUD surface lives elsewhere;
    /// this exists for fixtures and tests.
    pub async fn insert(&self, client: &Client) -> Result<(), RepositoryError> {
        let emails = serde_json::to_string(&client.emails)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let phones = serde_json::to_string(&client.phones)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO client
                (id, name, emails, phones, position, address, place, city, state, pin,
                 company_name, company_code, company_stage, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&client.id.0)
        .bind(&client.name)
        .bind(emails)
        .bind(phones)
        .bind(&client.position)
        .bind(&client.address)
        .bind(&client.place)
        .bind(&client.city)
        .bind(&client.state)
        .bind(&client.pin)
        .bind(&client.company_name)
        .bind(&client.company_code)
        .bind(client.company_stage.as_str())
        .bind(&client.created_by)
        .bind(client.created_at.to_rfc3339())
        .bind(client.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn client_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Client, RepositoryError> {
    let emails: Vec<String> = serde_json::from_str(&row.get::<String, _>("emails"))
        .map_err(|error| RepositoryError::Decode(format!("client emails: {error}")))?;
    let phones: Vec<String> = serde_json::from_str(&row.get::<String, _>("phones"))
        .map_err(|error| RepositoryError::Decode(format!("client phones: {error}")))?;
    let company_stage = CompanyStage::parse(&row.get::<String, _>("company_stage"))
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Client {
        id: ClientId(row.get("id")),
        name: row.get("name"),
        emails,
        phones,
        position: row.get("position"),
        address: row.get("address"),
        place: row.get("place"),
        city: row.get("city"),
        state: row.get("state"),
        pin: row.get("pin"),
        company_name: row.get("company_name"),
        company_code: row.get("company_code"),
        company_stage,
        created_by: row.get("created_by"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "client.created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "client.updated_at")?,
    })
}

pub(crate) fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{field}: {error}")))
}
