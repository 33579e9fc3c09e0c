use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ActorId, EntityId, RecordQuery, RecordUpdate, Result, StoreError, StoredRecord, Version,
    record::validate_for_create, store::RecordStore,
};

const RECORD_COLUMNS: &str =
    "id, entity_type, version, owner_id, lock_ref, status, state, created_at, updated_at";

/// PostgreSQL-backed record store.
///
/// Compare-and-swap is a single conditional `UPDATE ... WHERE id = $1 AND
/// version = $2`, so concurrent writers in different processes serialize on
/// the row.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` with a small pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_record(row: PgRow) -> Result<StoredRecord> {
        Ok(StoredRecord {
            id: EntityId::from_uuid(row.try_get::<Uuid, _>("id")?),
            entity_type: row.try_get("entity_type")?,
            version: Version::new(row.try_get("version")?),
            owner: ActorId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
            lock: row
                .try_get::<Option<Uuid>, _>("lock_ref")?
                .map(EntityId::from_uuid),
            status: row.try_get("status")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create(&self, record: StoredRecord) -> Result<StoredRecord> {
        validate_for_create(&record)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO records (id, entity_type, version, owner_id, lock_ref, status, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.entity_type)
        .bind(record.version.as_i64())
        .bind(record.owner.as_uuid())
        .bind(record.lock.map(|l| l.as_uuid()))
        .bind(&record.status)
        .bind(&record.state)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.id));
        }
        Ok(record)
    }

    async fn get(&self, id: EntityId) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn compare_and_swap(
        &self,
        id: EntityId,
        expected: Version,
        update: RecordUpdate,
    ) -> Result<StoredRecord> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE records
            SET version = version + 1, lock_ref = $3, status = $4, state = $5, updated_at = $6
            WHERE id = $1 AND version = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expected.as_i64())
        .bind(update.lock.map(|l| l.as_uuid()))
        .bind(&update.status)
        .bind(&update.state)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_record(row);
        }

        // Nothing matched: either the record is gone or someone else moved it.
        match self.current_version(id).await? {
            Some(actual) => {
                tracing::debug!(%id, %expected, %actual, "compare-and-swap lost the race");
                Err(StoreError::ConcurrencyConflict {
                    id,
                    expected,
                    actual,
                })
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn query(&self, query: RecordQuery) -> Result<Vec<StoredRecord>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.entity_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND entity_type = ${param_count}"));
        }
        if query.owner.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND owner_id = ${param_count}"));
        }
        match query.locked {
            Some(true) => sql.push_str(" AND lock_ref IS NOT NULL"),
            Some(false) => sql.push_str(" AND lock_ref IS NULL"),
            None => {}
        }
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(entity_type) = query.entity_type {
            sqlx_query = sqlx_query.bind(entity_type);
        }
        if let Some(owner) = query.owner {
            sqlx_query = sqlx_query.bind(owner.as_uuid());
        }
        if let Some(statuses) = query.statuses {
            sqlx_query = sqlx_query.bind(statuses);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn current_version(&self, id: EntityId) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM records WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        Ok(version.map(Version::new))
    }
}
