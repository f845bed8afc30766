use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use seekr_core::{JobRecord, TriageStatus};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use crate::{
    format_timestamp, parse_timestamp, parse_triage, JobQuery, JobStats, JobStore, NewJob, SortKey,
    StoreError, TriageFilter,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = "id, url, title, company, location, region, salary, date_listed, \
     job_type, description, first_seen, last_seen, is_active, triage_status";

/// `JobStore` over a SQLite `jobs` table.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Opens (creating if missing) the database at `database_url`, e.g.
    /// `sqlite://jobs.db` or `sqlite::memory:`.
    ///
    /// The pool holds a single connection: writes are sequential anyway, and
    /// an in-memory database only exists per connection.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Writes a complete record, id and timestamps included. Used to seed or
    /// copy stores; the online path goes through [`JobStore::insert`].
    pub async fn insert_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, url, title, company, location, region, salary, date_listed,
                              job_type, description, first_seen, last_seen, is_active, triage_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.company)
        .bind(&record.location)
        .bind(&record.region)
        .bind(&record.salary)
        .bind(&record.date_listed)
        .bind(&record.job_type)
        .bind(&record.description)
        .bind(format_timestamp(record.first_seen))
        .bind(format_timestamp(record.last_seen))
        .bind(record.is_active)
        .bind(record.triage_status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await;
        map_unique_violation(result, &record.url)?;
        Ok(())
    }

    /// `first_seen` may hold RFC 3339 or the legacy `YYYY-MM-DD HH:MM:SS`
    /// form, so time filters and ordering go through `julianday`.
    pub async fn query(&self, query: &JobQuery) -> Result<Vec<JobRecord>, StoreError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1"));

        if let Some(term) = query.search.as_deref().filter(|t| !t.trim().is_empty()) {
            let pattern = format!("%{}%", term.trim());
            builder
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR company LIKE ")
                .push_bind(pattern.clone())
                .push(" OR description LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(region) = &query.region {
            builder.push(" AND region = ").push_bind(region.clone());
        }
        if let Some(job_type) = &query.job_type {
            builder
                .push(" AND job_type LIKE ")
                .push_bind(format!("%{job_type}%"));
        }
        match query.triage {
            TriageFilter::All => {}
            TriageFilter::Unreviewed => {
                builder.push(" AND (triage_status IS NULL OR triage_status = '')");
            }
            TriageFilter::Status(status) => {
                builder.push(" AND triage_status = ").push_bind(status.as_str());
            }
        }
        if let Some(since) = query.first_seen_since {
            builder
                .push(" AND julianday(first_seen) >= julianday(")
                .push_bind(format_timestamp(since))
                .push(")");
        }

        builder.push(match query.sort {
            SortKey::FirstSeen => " ORDER BY julianday(first_seen) DESC, id DESC",
            SortKey::DateListed => " ORDER BY date_listed DESC, id DESC",
        });
        builder
            .push(" LIMIT ")
            .push_bind(query.limit.map(i64::from).unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        builder
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(job_from_row)
            .collect()
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<JobStats, StoreError> {
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        let week_ago = now - Duration::days(7);

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(julianday(first_seen) >= julianday(?)), 0) AS new_today,
                   COALESCE(SUM(julianday(first_seen) >= julianday(?)), 0) AS new_this_week,
                   COALESCE(SUM(triage_status = 'yes'), 0) AS triage_yes,
                   COALESCE(SUM(triage_status = 'no'), 0) AS triage_no,
                   COALESCE(SUM(triage_status = 'gsv'), 0) AS triage_gsv,
                   COALESCE(SUM(triage_status IS NULL OR triage_status = ''), 0) AS unreviewed
              FROM jobs
            "#,
        )
        .bind(format_timestamp(today))
        .bind(format_timestamp(week_ago))
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            total: count_column(&row, "total")?,
            new_today: count_column(&row, "new_today")?,
            new_this_week: count_column(&row, "new_this_week")?,
            triage_yes: count_column(&row, "triage_yes")?,
            triage_no: count_column(&row, "triage_no")?,
            triage_gsv: count_column(&row, "triage_gsv")?,
            unreviewed: count_column(&row, "unreviewed")?,
            top_companies: self.top_values("company", 10).await?,
            top_locations: self.top_values("location", 10).await?,
        })
    }

    async fn top_values(&self, column: &'static str, limit: i64) -> Result<Vec<(String, u64)>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {column} AS value, COUNT(*) AS n FROM jobs \
             WHERE {column} IS NOT NULL AND {column} != '' \
             GROUP BY {column} ORDER BY n DESC, {column} LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<(String, u64), StoreError> {
                Ok((row.try_get("value")?, count_column(row, "n")?))
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE url = ? LIMIT 1"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_by_listing(
        &self,
        title: &str,
        company: &str,
        location: &str,
    ) -> Result<Vec<JobRecord>, StoreError> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE title = ? AND company = ? AND location = ? ORDER BY id"
        ))
        .bind(title)
        .bind(company)
        .bind(location)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_from_row)
        .collect()
    }

    async fn insert(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let seen_at = format_timestamp(job.seen_at);
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (url, title, company, location, region, salary, date_listed,
                              job_type, description, first_seen, last_seen, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&job.url)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.region)
        .bind(&job.salary)
        .bind(&job.date_listed)
        .bind(&job.job_type)
        .bind(&job.description)
        .bind(&seen_at)
        .bind(&seen_at)
        .execute(&self.pool)
        .await;
        let id = map_unique_violation(result, &job.url)?.last_insert_rowid();
        debug!(id, region = %job.region, "inserted job");
        Ok(job.into_record(id))
    }

    async fn mark_seen(&self, id: i64, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET last_seen = ?, is_active = 1 WHERE id = ?")
            .bind(format_timestamp(seen_at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn backfill_description(
        &self,
        id: i64,
        description: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET description = ?, last_seen = ?, is_active = 1 WHERE id = ?",
        )
        .bind(description)
        .bind(format_timestamp(seen_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn set_region(&self, id: i64, region: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET region = ? WHERE id = ?")
            .bind(region)
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn set_triage(&self, id: i64, status: Option<TriageStatus>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET triage_status = ? WHERE id = ?")
            .bind(status.map(|s| s.as_str()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
        sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(job_from_row)
            .collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }
}

fn job_from_row(row: &SqliteRow) -> Result<JobRecord, StoreError> {
    let first_seen: String = row.try_get("first_seen")?;
    let last_seen: String = row.try_get("last_seen")?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        region: row.try_get::<Option<String>, _>("region")?.unwrap_or_default(),
        salary: row.try_get("salary")?,
        date_listed: row.try_get("date_listed")?,
        job_type: row.try_get("job_type")?,
        description: row.try_get("description")?,
        first_seen: parse_timestamp("first_seen", &first_seen)?,
        last_seen: parse_timestamp("last_seen", &last_seen)?,
        is_active: row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(true),
        triage_status: parse_triage(row.try_get("triage_status")?)?,
    })
}

fn count_column(row: &SqliteRow, column: &str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get(column)?;
    Ok(value.max(0) as u64)
}

fn require_row(rows_affected: u64, id: i64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

fn map_unique_violation<T>(result: Result<T, sqlx::Error>, url: &str) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            Err(StoreError::DuplicateUrl(url.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}
