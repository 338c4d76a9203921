// In crates/database/src/lib.rs

use async_trait::async_trait;
use core_types::{Portfolio, Position, PositionStatus, RiskAssessment};
use sqlx::types::Json;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub mod error;
pub mod memory;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use types::DatabaseSettings;

/// The upserts the trading and risk engines persist through.
///
/// Every method overwrites the record with the same id. Callers treat failures
/// as soft: state in memory stays authoritative.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()>;

    async fn save_position(&self, position: &Position) -> Result<()>;

    async fn save_assessment(&self, assessment: &RiskAssessment) -> Result<()>;
}

/// A wrapper around the `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct Db(PgPool);

/// Establishes a connection pool to the PostgreSQL database and runs migrations.
pub async fn connect(settings: &DatabaseSettings) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.url)
        .await?;

    // Run database migrations. This ensures the database schema is up-to-date.
    sqlx::migrate!("../../migrations").run(&pool).await?;

    tracing::info!(max_connections = settings.max_connections, "Connected to database.");
    Ok(Db(pool))
}

#[async_trait]
impl Store for Db {
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, user_id, name, total_value, available_balance, body, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                total_value = EXCLUDED.total_value,
                available_balance = EXCLUDED.available_balance,
                body = EXCLUDED.body,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&portfolio.id)
        .bind(&portfolio.user_id)
        .bind(&portfolio.name)
        .bind(portfolio.total_value)
        .bind(portfolio.available_balance)
        .bind(Json(portfolio))
        .bind(portfolio.updated_at)
        .execute(&self.0)
        .await
        .map_err(|source| Error::UpsertFailed { table: "portfolios", source })?;
        Ok(())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (id, portfolio_id, strategy, token, status, body, opened_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                body = EXCLUDED.body,
                closed_at = EXCLUDED.closed_at
            "#,
        )
        .bind(&position.id)
        .bind(&position.portfolio_id)
        .bind(&position.strategy)
        .bind(&position.token)
        .bind(status_label(position.status))
        .bind(Json(position))
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&self.0)
        .await
        .map_err(|source| Error::UpsertFailed { table: "positions", source })?;
        Ok(())
    }

    async fn save_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_assessments
                (id, transaction_hash, contract_address, chain_id, risk_score, safety_grade, body, assessed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&assessment.id)
        .bind(&assessment.transaction_hash)
        .bind(&assessment.contract_address)
        .bind(assessment.chain_id as i64)
        .bind(assessment.risk_score)
        .bind(assessment.safety_grade.to_string())
        .bind(Json(assessment))
        .bind(assessment.assessed_at)
        .bind(assessment.expires_at)
        .execute(&self.0)
        .await
        .map_err(|source| Error::UpsertFailed { table: "risk_assessments", source })?;
        Ok(())
    }
}

fn status_label(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Pending => "pending",
        PositionStatus::Open => "open",
        PositionStatus::Closed => "closed",
    }
}
