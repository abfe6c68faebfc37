use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{RangeFilter, Reading, StampedReading, TemperatureAggregate};
use crate::store::ReadingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 5;

const SELECT_READINGS: &str =
    "SELECT id, adc_value, voltage, temperature_c, ts AS timestamp FROM readings";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// PostgreSQL-backed [`ReadingStore`].
#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert_one(&self, reading: StampedReading) -> Result<Uuid> {
        let pool = &self.pool;
        let reading = &reading;
        with_retry("insert_one", || async move {
            let id: Uuid = sqlx::query_scalar(
                "INSERT INTO readings (adc_value, voltage, temperature_c, ts)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id",
            )
            .bind(reading.adc_value)
            .bind(reading.voltage)
            .bind(reading.temperature_c)
            .bind(reading.timestamp)
            .fetch_one(pool)
            .await?;
            Ok(id)
        })
        .await
    }

    async fn insert_many(&self, readings: &[StampedReading]) -> Result<u64> {
        if readings.is_empty() {
            return Ok(0);
        }

        let adc_values: Vec<i16> = readings.iter().map(|r| r.adc_value).collect();
        let voltages: Vec<f64> = readings.iter().map(|r| r.voltage).collect();
        let temperatures: Vec<f64> = readings.iter().map(|r| r.temperature_c).collect();
        let timestamps: Vec<DateTime<Utc>> = readings.iter().map(|r| r.timestamp).collect();

        // One statement, so the batch commits or fails as a whole.
        let query = r#"
            INSERT INTO readings (adc_value, voltage, temperature_c, ts)
            SELECT * FROM UNNEST($1::int2[], $2::float8[], $3::float8[], $4::timestamptz[])
            "#;

        let pool = &self.pool;
        let columns = (&adc_values, &voltages, &temperatures, &timestamps);
        with_retry("insert_many", || async move {
            let (adc_values, voltages, temperatures, timestamps) = columns;
            let result = sqlx::query(query)
                .bind(adc_values)
                .bind(voltages)
                .bind(temperatures)
                .bind(timestamps)
                .execute(pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn find(&self, filter: &RangeFilter, skip: u64, limit: u64) -> Result<Vec<Reading>> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_READINGS);
        push_range(&mut qb, filter);
        qb.push(" ORDER BY ts DESC, seq DESC LIMIT ")
            .push_bind(to_i64(limit))
            .push(" OFFSET ")
            .push_bind(to_i64(skip));

        let readings = qb
            .build_query_as::<Reading>()
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(readings)
    }

    async fn count(&self, filter: &RangeFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM readings");
        push_range(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn latest(&self) -> Result<Option<Reading>> {
        let query = format!("{} ORDER BY ts DESC, seq DESC LIMIT 1", SELECT_READINGS);
        sqlx::query_as::<_, Reading>(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reading>> {
        let query = format!("{} WHERE id = $1", SELECT_READINGS);
        sqlx::query_as::<_, Reading>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    async fn aggregate(&self, filter: &RangeFilter) -> Result<TemperatureAggregate> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*), AVG(temperature_c), MIN(temperature_c), MAX(temperature_c) FROM readings",
        );
        push_range(&mut qb, filter);

        let (count, avg, min, max): (i64, Option<f64>, Option<f64>, Option<f64>) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        Ok(TemperatureAggregate {
            count: count.max(0) as u64,
            avg,
            min,
            max,
        })
    }

    async fn delete_many(&self, filter: &RangeFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM readings");
        push_range(&mut qb, filter);

        let result = qb.build().execute(&self.pool).await.map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, filter: &RangeFilter) {
    let mut keyword = " WHERE ";
    if let Some(start) = filter.start {
        qb.push(keyword).push("ts >= ").push_bind(start);
        keyword = " AND ";
    }
    if let Some(end) = filter.end {
        qb.push(keyword).push("ts <= ").push_bind(end);
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Retries failures that happened before the statement reached the server,
/// with exponential backoff. Anything else may already have committed, so it
/// is returned as-is rather than risking a second insert.
async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(Error::Database(db_err)) => {
                DB_FAILURES_TOTAL.inc();
                if attempts >= MAX_ATTEMPTS || !is_retry_safe(&db_err) {
                    error!(
                        "Database {} failed permanently after {} attempts: {}",
                        op, attempts, db_err
                    );
                    return Err(classify(db_err));
                }

                let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                warn!(
                    "Database {} failed (attempt {}/{}), retrying in {}ms: {}",
                    op, attempts, MAX_ATTEMPTS, wait_ms, db_err
                );
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(e) => {
                error!("Database {} failed with non-database error: {}", op, e);
                return Err(e);
            }
        }
    }
}

/// Maps connection-class failures to [`Error::StoreUnavailable`].
fn classify(err: sqlx::Error) -> Error {
    if is_transient_error(&err) {
        Error::StoreUnavailable(err.to_string())
    } else {
        Error::Database(err)
    }
}

/// No connection was handed out, or the server refused the session before
/// any statement ran.
fn is_retry_safe(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code == "57P03" || // cannot_connect_now
            code == "53300" // too_many_connections
        }),
        _ => false,
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
