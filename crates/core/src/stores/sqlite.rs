use crate::models::{IngestionJob, JobStatus, Profile};
use crate::traits::{JobStore, ProfileStore};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS profiles (
        document_id TEXT PRIMARY KEY NOT NULL,
        name TEXT,
        email TEXT,
        mobile_number TEXT,
        years_experience REAL,
        skills TEXT NOT NULL DEFAULT '[]',
        prev_roles TEXT NOT NULL DEFAULT '[]',
        location TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_profiles_created_at ON profiles (created_at)",
    "CREATE TABLE IF NOT EXISTS ingestion_jobs (
        id TEXT PRIMARY KEY NOT NULL,
        total_files INTEGER,
        processed_files INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

const PROFILE_COLUMNS: &str = "document_id, name, email, mobile_number, years_experience, \
                               skills, prev_roles, location, created_at";

/// Profiles and ingestion jobs in one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    document_id: String,
    name: Option<String>,
    email: Option<String>,
    mobile_number: Option<String>,
    years_experience: Option<f64>,
    skills: Json<Vec<String>>,
    prev_roles: Json<Vec<String>>,
    location: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            document_id: row.document_id,
            name: row.name,
            email: row.email,
            mobile_number: row.mobile_number,
            years_experience: row.years_experience,
            skills: row.skills.0,
            prev_roles: row.prev_roles.0,
            location: row.location,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    total_files: Option<i64>,
    processed_files: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for IngestionJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            StoreError::InvalidRow(format!("job {} has unknown status {}", row.id, row.status))
        })?;
        let total_files = row
            .total_files
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::InvalidRow(format!("job {} total_files out of range", row.id)))?;
        let processed_files = u32::try_from(row.processed_files).map_err(|_| {
            StoreError::InvalidRow(format!("job {} processed_files out of range", row.id))
        })?;

        Ok(IngestionJob {
            id: row.id,
            total_files,
            processed_files,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and bootstraps the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    async fn require_job(&self, job_id: &str) -> Result<(), StoreError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ingestion_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        exists
            .map(|_| ())
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn profile(&self, document_id: &str) -> Result<Option<Profile>, StoreError> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE document_id = ?"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (document_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                mobile_number = excluded.mobile_number,
                years_experience = excluded.years_experience,
                skills = excluded.skills,
                prev_roles = excluded.prev_roles,
                location = excluded.location,
                created_at = excluded.created_at"
        ))
        .bind(&profile.document_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.mobile_number)
        .bind(profile.years_experience)
        .bind(Json(&profile.skills))
        .bind(Json(&profile.prev_roles))
        .bind(&profile.location)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn profiles_by_ids(&self, document_ids: &[String]) -> Result<Vec<Profile>, StoreError> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE document_id IN ("
        ));
        let mut separated = builder.separated(", ");
        for document_id in document_ids {
            separated.push_bind(document_id);
        }
        separated.push_unseparated(")");

        let rows: Vec<ProfileRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn profile_ids_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar("SELECT document_id FROM profiles WHERE created_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn delete_profiles_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM profiles WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_profiles(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, job_id: &str) -> Result<IngestionJob, StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO ingestion_jobs (id, total_files, processed_files, status, created_at, updated_at)
             VALUES (?, NULL, 0, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(JobStatus::Starting.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.job(job_id).await
    }

    async fn mark_processing(&self, job_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Processing.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Starting.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
        }
        Ok(())
    }

    async fn set_total_files(&self, job_id: &str, total_files: u32) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET total_files = ?, updated_at = ?
             WHERE id = ? AND total_files IS NULL",
        )
        .bind(i64::from(total_files))
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
        }
        Ok(())
    }

    async fn record_processed(&self, job_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET processed_files = processed_files + 1, updated_at = ?
             WHERE id = ? AND (total_files IS NULL OR processed_files < total_files)",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
        }
        Ok(())
    }

    async fn finish_job(&self, job_id: &str, status: JobStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET status = ?, updated_at = ?
             WHERE id = ? AND status IN (?, ?)",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::Starting.as_str())
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn job(&self, job_id: &str) -> Result<IngestionJob, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT id, total_files, processed_files, status, created_at, updated_at
             FROM ingestion_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?
            .try_into()
    }
}
