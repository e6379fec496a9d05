//! PostgreSQL storage for `job_configs` and `job_versions`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{ConfigFilter, JobConfigRecord, JobVersion, Repository, SortOrder, VersionFilter};
use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, JobflowError, Result};
use crate::jobs::{JobPriority, ScheduleConfig};

/// Narrow an unsigned field to its column type, refusing values that don't fit.
fn to_column<T, C>(field: &'static str, value: Option<T>) -> Result<Option<C>>
where
    T: Copy + std::fmt::Display + TryInto<C>,
{
    value
        .map(|v| {
            v.try_into().map_err(|_| {
                JobflowError::new(
                    ErrorCode::InvalidConfiguration,
                    format!("{} = {} does not fit its database column", field, v),
                )
                .with_context("field", field)
            })
        })
        .transpose()
}

/// Widen a stored column back to its unsigned field; negative values are a
/// schema problem, not data to clamp.
fn from_column<C, T>(job: &str, field: &'static str, value: Option<C>) -> Result<Option<T>>
where
    C: Copy + std::fmt::Display + TryInto<T>,
{
    value
        .map(|v| {
            v.try_into().map_err(|_| {
                JobflowError::schema_mismatch(format!("job_configs.{} holds {}", field, v))
                    .with_context("job", job)
            })
        })
        .transpose()
}

/// Connection pool plus the two job tables.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new connection pool, running migrations if configured to.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        tracing::info!(
            max_connections = config.max_connections,
            "Job store connected"
        );
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Versions
// ═══════════════════════════════════════════════════════════════════════════════

/// `LIMIT NULL` returns every row.
fn versions_query(order: SortOrder) -> String {
    format!(
        r#"
        SELECT job_name, version, changes, config, created_at, updated_at
        FROM job_versions
        WHERE job_name = $1 AND ($2::TEXT IS NULL OR version = $2)
        ORDER BY created_at {}
        LIMIT $3
        "#,
        order.as_sql()
    )
}

fn configs_query(order: SortOrder) -> String {
    format!(
        r#"
        SELECT name, priority, metadata, retry_limit, schedule,
               circuit_breaker_threshold, circuit_breaker_timeout_ms, updated_at
        FROM job_configs
        WHERE ($1::TEXT IS NULL OR name = $1)
        ORDER BY updated_at {}
        LIMIT $2
        "#,
        order.as_sql()
    )
}

#[derive(Debug, sqlx::FromRow)]
struct JobVersionRow {
    job_name: String,
    version: String,
    changes: Vec<String>,
    config: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobVersionRow> for JobVersion {
    fn from(row: JobVersionRow) -> Self {
        Self {
            job_name: row.job_name,
            version: row.version,
            changes: row.changes,
            config: row.config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl Repository<JobVersion> for PostgresStore {
    async fn upsert(&self, record: JobVersion) -> Result<JobVersion> {
        let row = sqlx::query_as::<_, JobVersionRow>(
            r#"
            INSERT INTO job_versions (job_name, version, changes, config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_name, version) DO UPDATE SET
                changes = EXCLUDED.changes,
                config = EXCLUDED.config,
                updated_at = EXCLUDED.updated_at
            RETURNING job_name, version, changes, config, created_at, updated_at
            "#,
        )
        .bind(&record.job_name)
        .bind(&record.version)
        .bind(&record.changes)
        .bind(&record.config)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_one(&self, filter: &VersionFilter) -> Result<Option<JobVersion>> {
        let row = sqlx::query_as::<_, JobVersionRow>(&versions_query(SortOrder::Descending))
            .bind(&filter.job_name)
            .bind(filter.version.as_deref())
            .bind(Some(1i64))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(JobVersion::from))
    }

    async fn find_many(&self, filter: &VersionFilter, order: SortOrder) -> Result<Vec<JobVersion>> {
        let rows = sqlx::query_as::<_, JobVersionRow>(&versions_query(order))
            .bind(&filter.job_name)
            .bind(filter.version.as_deref())
            .bind(None::<i64>)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(JobVersion::from).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Live Job Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct JobConfigRow {
    name: String,
    priority: String,
    metadata: serde_json::Value,
    retry_limit: Option<i32>,
    schedule: Option<serde_json::Value>,
    circuit_breaker_threshold: Option<i32>,
    circuit_breaker_timeout_ms: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobConfigRow> for JobConfigRecord {
    type Error = JobflowError;

    fn try_from(row: JobConfigRow) -> Result<Self> {
        let priority = JobPriority::parse(&row.priority).ok_or_else(|| {
            JobflowError::schema_mismatch(format!(
                "Unknown priority '{}' in job_configs",
                row.priority
            ))
            .with_context("job", &row.name)
        })?;

        let schedule = row
            .schedule
            .filter(|value| !value.is_null())
            .map(serde_json::from_value::<ScheduleConfig>)
            .transpose()
            .map_err(|e| {
                JobflowError::schema_mismatch(format!("Stored schedule does not decode: {}", e))
                    .with_context("job", &row.name)
            })?;

        Ok(Self {
            retry_limit: from_column(&row.name, "retry_limit", row.retry_limit)?,
            circuit_breaker_threshold: from_column(
                &row.name,
                "circuit_breaker_threshold",
                row.circuit_breaker_threshold,
            )?,
            circuit_breaker_timeout_ms: from_column(
                &row.name,
                "circuit_breaker_timeout_ms",
                row.circuit_breaker_timeout_ms,
            )?,
            name: row.name,
            priority,
            metadata: row.metadata,
            schedule,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl Repository<JobConfigRecord> for PostgresStore {
    async fn upsert(&self, record: JobConfigRecord) -> Result<JobConfigRecord> {
        let schedule = record
            .schedule
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let retry_limit: Option<i32> = to_column("retry_limit", record.retry_limit)?;
        let threshold: Option<i32> =
            to_column("circuit_breaker_threshold", record.circuit_breaker_threshold)?;
        let timeout_ms: Option<i64> =
            to_column("circuit_breaker_timeout_ms", record.circuit_breaker_timeout_ms)?;

        let row = sqlx::query_as::<_, JobConfigRow>(
            r#"
            INSERT INTO job_configs (name, priority, metadata, retry_limit, schedule,
                                     circuit_breaker_threshold, circuit_breaker_timeout_ms, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO UPDATE SET
                priority = EXCLUDED.priority,
                metadata = EXCLUDED.metadata,
                retry_limit = EXCLUDED.retry_limit,
                schedule = EXCLUDED.schedule,
                circuit_breaker_threshold = EXCLUDED.circuit_breaker_threshold,
                circuit_breaker_timeout_ms = EXCLUDED.circuit_breaker_timeout_ms,
                updated_at = EXCLUDED.updated_at
            RETURNING name, priority, metadata, retry_limit, schedule,
                      circuit_breaker_threshold, circuit_breaker_timeout_ms, updated_at
            "#,
        )
        .bind(&record.name)
        .bind(record.priority.as_str())
        .bind(&record.metadata)
        .bind(retry_limit)
        .bind(schedule)
        .bind(threshold)
        .bind(timeout_ms)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_one(&self, filter: &ConfigFilter) -> Result<Option<JobConfigRecord>> {
        let row = sqlx::query_as::<_, JobConfigRow>(&configs_query(SortOrder::Descending))
            .bind(filter.name.as_deref())
            .bind(Some(1i64))
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobConfigRecord::try_from).transpose()
    }

    async fn find_many(
        &self,
        filter: &ConfigFilter,
        order: SortOrder,
    ) -> Result<Vec<JobConfigRecord>> {
        let rows = sqlx::query_as::<_, JobConfigRow>(&configs_query(order))
            .bind(filter.name.as_deref())
            .bind(None::<i64>)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(JobConfigRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row_lookups_are_limited() {
        assert!(versions_query(SortOrder::Descending).contains("LIMIT $3"));
        assert!(configs_query(SortOrder::Ascending).contains("ORDER BY updated_at ASC"));
        assert!(configs_query(SortOrder::Ascending).contains("LIMIT $2"));
    }

    #[test]
    fn test_out_of_range_values_are_not_wrapped() {
        let fits: Option<i32> = to_column("retry_limit", Some(5u32)).unwrap();
        assert_eq!(fits, Some(5));

        let err = to_column::<u32, i32>("retry_limit", Some(u32::MAX)).unwrap_err();
        assert!(err.is_config_error());
        let err = to_column::<u64, i64>("circuit_breaker_timeout_ms", Some(u64::MAX)).unwrap_err();
        assert!(err.is_config_error());

        let none: Option<i32> = to_column::<u32, i32>("retry_limit", None).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_negative_columns_are_schema_errors() {
        let row = JobConfigRow {
            name: "news_links".into(),
            priority: "normal".into(),
            metadata: serde_json::json!({}),
            retry_limit: Some(-1),
            schedule: None,
            circuit_breaker_threshold: None,
            circuit_breaker_timeout_ms: None,
            updated_at: Utc::now(),
        };
        let err = JobConfigRecord::try_from(row).unwrap_err();
        assert!(err.is_schema_error());
    }
}
