//! SQLite storage backend
//!
//! Stores metric samples and alert events in a local database file.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the collector's batch writes
//! - **Connection pooling**: Safe for concurrent callers
//! - **Migrations**: Schema versioned with `sqlx::migrate!`

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{AlertSink, HealthStatus, MetricsSink, SampleQuery};
use super::error::{StorageError, StorageResult};
use crate::{AlertEvent, DeviceId, MetricSample};

pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn sample_from_row(row: &SqliteRow) -> StorageResult<MetricSample> {
        let category: String = row.try_get("category")?;
        Ok(MetricSample {
            device_id: row.try_get("device_id")?,
            category: category.parse().map_err(StorageError::SerializationError)?,
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertEvent> {
        let operator: String = row.try_get("operator")?;
        Ok(AlertEvent {
            id: Some(row.try_get("id")?),
            rule_id: row.try_get("rule_id")?,
            device_id: row.try_get("device_id")?,
            metric: row.try_get("metric")?,
            value: row.try_get("value")?,
            threshold: row.try_get("threshold")?,
            operator: operator.parse().map_err(StorageError::SerializationError)?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            acknowledged: row.try_get("acknowledged")?,
        })
    }
}

#[async_trait]
impl MetricsSink for SqliteBackend {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn append_samples(&self, device_id: DeviceId, samples: Vec<MetricSample>) -> StorageResult<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for sample in &samples {
            sqlx::query(
                r#"
                INSERT INTO metrics (device_id, category, name, value, timestamp)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(device_id)
            .bind(sample.category.to_string())
            .bind(&sample.name)
            .bind(sample.value)
            .bind(Self::timestamp_to_millis(&sample.timestamp))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("stored {} samples for device {device_id}", samples.len());
        Ok(samples.len())
    }

    #[instrument(skip(self), fields(device_id = query.device_id))]
    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<MetricSample>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT device_id, category, name, value, timestamp FROM metrics WHERE device_id = ",
        );
        builder.push_bind(query.device_id);

        if let Some(category) = query.category {
            builder.push(" AND category = ").push_bind(category.to_string());
        }
        if let Some(name) = &query.name {
            builder.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(from) = &query.from {
            builder.push(" AND timestamp >= ").push_bind(Self::timestamp_to_millis(from));
        }
        if let Some(to) = &query.to {
            builder.push(" AND timestamp <= ").push_bind(Self::timestamp_to_millis(to));
        }

        builder.push(" ORDER BY timestamp DESC, id DESC");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let samples = rows
            .iter()
            .map(Self::sample_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("query returned {} samples", samples.len());
        Ok(samples)
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff_millis = Self::timestamp_to_millis(&cutoff);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
            .bind(cutoff_millis)
            .execute(&mut *tx)
            .await?;
        let alerts = sqlx::query("DELETE FROM alerts WHERE timestamp < ?")
            .bind(cutoff_millis)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected() as usize;
        info!(
            "deleted {} samples and {} alerts older than {}",
            deleted,
            alerts.rows_affected(),
            cutoff
        );

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (samples,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.pool)
            .await?;
        let (alerts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        let (oldest, newest): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM metrics")
                .fetch_one(&self.pool)
                .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                Self::millis_to_timestamp(old).format("%Y-%m-%d"),
                Self::millis_to_timestamp(new).format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} samples, {} alerts, {:.2} MB on disk, time range: {}",
            samples,
            alerts,
            file_size as f64 / 1_000_000.0,
            time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl AlertSink for SqliteBackend {
    #[instrument(skip(self, event), fields(rule_id = event.rule_id, device_id = event.device_id))]
    async fn record_alert(&self, mut event: AlertEvent) -> StorageResult<AlertEvent> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (rule_id, device_id, metric, value, threshold, operator, timestamp, acknowledged)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.rule_id)
        .bind(event.device_id)
        .bind(&event.metric)
        .bind(event.value)
        .bind(event.threshold)
        .bind(event.operator.to_string())
        .bind(Self::timestamp_to_millis(&event.timestamp))
        .bind(event.acknowledged)
        .execute(&self.pool)
        .await?;

        event.id = Some(result.last_insert_rowid());
        Ok(event)
    }

    #[instrument(skip(self))]
    async fn recent_alerts(&self, device_id: Option<DeviceId>, limit: usize) -> StorageResult<Vec<AlertEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, rule_id, device_id, metric, value, threshold, operator, timestamp, acknowledged
            FROM alerts
            WHERE ? IS NULL OR device_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }
}
