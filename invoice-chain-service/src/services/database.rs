//! PostgreSQL store for invoice-chain-service.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chain::{ChainError, GENESIS_HASH};
use crate::models::{ChainKey, Invoice, PaymentStatus};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{ChainFilter, ChainSlot, InvoiceStore, SealFn};

const INVOICE_COLUMNS: &str = r#"
    invoice_id, tenant_id, document_type, sequence_number, fiscal_year, series, counter,
    issue_date, client_id, client_name, client_tax_id, order_id, reference_invoice_id,
    taxable_base, tax_rate, tax_amount, total, previous_hash, current_hash, hash_version,
    payment_status, created_utc
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoice-chain-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

#[async_trait]
impl InvoiceStore for Database {
    /// Counter increment, tip lookup and insert share one transaction. The
    /// upsert locks the counter row, which serializes writers on the same chain
    /// until commit. A counter lagging behind the stored chain is caught up to
    /// the highest stored counter, so a retry after a collision gets a free slot.
    #[instrument(skip(self, seal), fields(chain = %key))]
    async fn create_invoice(
        &self,
        key: &ChainKey,
        seal: &SealFn<'_>,
    ) -> Result<Invoice, ChainError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let counter: i64 = sqlx::query_scalar(
            r#"
            WITH stored AS (
                SELECT COALESCE(MAX(counter), 0) AS highest
                FROM invoices
                WHERE tenant_id = $1 AND fiscal_year = $2 AND series = $3 AND document_type = $4
            )
            INSERT INTO invoice_counters (tenant_id, fiscal_year, series, document_type, last_value)
            SELECT $1, $2, $3, $4, stored.highest + 1 FROM stored
            ON CONFLICT (tenant_id, fiscal_year, series, document_type)
            DO UPDATE SET
                last_value = GREATEST(invoice_counters.last_value, EXCLUDED.last_value - 1) + 1,
                updated_utc = NOW()
            RETURNING last_value
            "#,
        )
        .bind(key.tenant_id)
        .bind(key.fiscal_year)
        .bind(&key.series)
        .bind(key.document_type.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to advance counter", e))?;

        let previous_hash: Option<String> = sqlx::query_scalar(
            r#"
            SELECT current_hash
            FROM invoices
            WHERE tenant_id = $1 AND fiscal_year = $2 AND series = $3 AND document_type = $4
              AND counter < $5
            ORDER BY counter DESC
            LIMIT 1
            "#,
        )
        .bind(key.tenant_id)
        .bind(key.fiscal_year)
        .bind(&key.series)
        .bind(key.document_type.as_str())
        .bind(counter)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to read chain tip", e))?;

        let draft = seal(ChainSlot {
            counter,
            previous_hash: previous_hash.unwrap_or_else(|| GENESIS_HASH.to_string()),
        });

        let insert = format!(
            r#"
            INSERT INTO invoices ({INVOICE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            RETURNING {INVOICE_COLUMNS}
            "#
        );

        let invoice = sqlx::query_as::<_, Invoice>(&insert)
            .bind(draft.invoice_id)
            .bind(draft.tenant_id)
            .bind(&draft.document_type)
            .bind(&draft.sequence_number)
            .bind(draft.fiscal_year)
            .bind(&draft.series)
            .bind(draft.counter)
            .bind(draft.issue_date)
            .bind(draft.client_id)
            .bind(&draft.client_name)
            .bind(&draft.client_tax_id)
            .bind(draft.order_id)
            .bind(draft.reference_invoice_id)
            .bind(draft.taxable_base)
            .bind(draft.tax_rate)
            .bind(draft.tax_amount)
            .bind(draft.total)
            .bind(&draft.previous_hash)
            .bind(&draft.current_hash)
            .bind(draft.hash_version)
            .bind(&draft.payment_status)
            .bind(draft.created_utc)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    warn!(sequence_number = %draft.sequence_number, "Sequence number already taken");
                    ChainError::DuplicateSequence {
                        sequence_number: draft.sequence_number.clone(),
                    }
                }
                _ => ChainError::Store(db_error("Failed to insert invoice", e)),
            })?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit invoice", e))?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, sequence_number = %invoice.sequence_number, "Invoice stored");

        Ok(invoice)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let query = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2"
        );
        let invoice = sqlx::query_as::<_, Invoice>(&query)
            .bind(tenant_id)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id, fiscal_year = fiscal_year))]
    async fn list_chain_invoices(
        &self,
        tenant_id: Uuid,
        fiscal_year: i32,
        filter: &ChainFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_chain_invoices"])
            .start_timer();

        let query = format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1 AND fiscal_year = $2
              AND ($3::TEXT IS NULL OR series = $3)
              AND ($4::TEXT IS NULL OR document_type = $4)
            ORDER BY document_type, series, counter
            "#
        );
        let invoices = sqlx::query_as::<_, Invoice>(&query)
            .bind(tenant_id)
            .bind(fiscal_year)
            .bind(filter.series.as_deref())
            .bind(filter.document_type.map(|t| t.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list invoices", e))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id, status = %status))]
    async fn update_payment_status(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_payment_status"])
            .start_timer();

        let query = format!(
            r#"
            UPDATE invoices SET payment_status = $3
            WHERE tenant_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let invoice = sqlx::query_as::<_, Invoice>(&query)
            .bind(tenant_id)
            .bind(invoice_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update payment status", e))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
