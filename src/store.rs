//! Record store for booking records.
//!
//! [`RecordStore`] is the only shared mutable resource between the scraping
//! and posting units. Every method is a single self-contained statement; the
//! natural key `(firstName, lastName, dateOfBooking)` is enforced by callers
//! checking [`RecordStore::exists_by_name_and_date`] before inserting.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, ScrapeError};
use crate::models::{ParsedRecord, ProcessingStatus, StoredRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert a record and return its id.
    async fn insert(&self, record: &ParsedRecord) -> Result<i64>;

    async fn exists_by_name_and_date(
        &self,
        first_name: &str,
        last_name: &str,
        date: NaiveDate,
    ) -> Result<bool>;

    /// Records booked on `date` that have not been posted yet.
    async fn list_pending_for_date(&self, date: NaiveDate) -> Result<Vec<StoredRecord>>;

    async fn mark_posted(&self, id: i64) -> Result<()>;
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS mugshots (
    id BIGSERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ DEFAULT now(),
    "firstName" TEXT DEFAULT '',
    "lastName" TEXT DEFAULT '',
    "dateOfBooking" DATE,
    "stateOfBooking" TEXT,
    "countyOfBooking" TEXT,
    "offenseDescription" TEXT,
    "additionalDetails" TEXT,
    "imagePath" TEXT,
    fb_status TEXT
)
"#;

const CREATE_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS mugshots_natural_key
    ON mugshots ("firstName", "lastName", "dateOfBooking")
"#;

/// PostgreSQL-backed [`RecordStore`].
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    ///
    /// A store with up to ten pooled connections, or
    /// [`ScrapeError::Config`] when the database is unreachable.
    #[instrument(level = "info", skip_all)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ScrapeError::Config(format!("cannot connect to database: {e}")))?;
        info!("Connected to record store");
        Ok(Self::new(pool))
    }
}

fn stored_record(row: &PgRow) -> Result<StoredRecord> {
    let status: Option<String> = row.try_get("fb_status")?;
    let status = match status.as_deref() {
        Some(s) => s.parse()?,
        None => ProcessingStatus::Pending,
    };
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;
    let text = |col: &str| -> Result<String> {
        Ok(row.try_get::<Option<String>, _>(col)?.unwrap_or_default())
    };

    Ok(StoredRecord {
        id: row.try_get("id")?,
        created_at,
        record: ParsedRecord {
            first_name: text("firstName")?,
            last_name: text("lastName")?,
            date_of_booking: row.try_get("dateOfBooking")?,
            offense_description: text("offenseDescription")?,
            additional_details: text("additionalDetails")?,
            image_url: text("imagePath")?,
            state_of_booking: text("stateOfBooking")?,
            county_of_booking: text("countyOfBooking")?,
            status,
        },
    })
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(level = "info", skip_all)]
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_KEY_INDEX).execute(&self.pool).await?;
        info!("Mugshots table created or already exists");
        Ok(())
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(
            first = %record.first_name,
            last = %record.last_name,
            date = %record.date_of_booking
        )
    )]
    async fn insert(&self, record: &ParsedRecord) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO mugshots (
                "firstName", "lastName", "dateOfBooking", "stateOfBooking",
                "countyOfBooking", "offenseDescription", "additionalDetails",
                "imagePath", fb_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(record.date_of_booking)
        .bind(&record.state_of_booking)
        .bind(&record.county_of_booking)
        .bind(&record.offense_description)
        .bind(&record.additional_details)
        .bind(&record.image_url)
        .bind(record.status.as_str())
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => {
                let id: i64 = row.try_get("id")?;
                info!(id, "Inserted mugshot record");
                Ok(id)
            }
            Err(e) => {
                error!(error = %e, "Failed to insert mugshot record");
                Err(e.into())
            }
        }
    }

    async fn exists_by_name_and_date(
        &self,
        first_name: &str,
        last_name: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS found FROM mugshots
            WHERE "firstName" = $1 AND "lastName" = $2 AND "dateOfBooking" = $3
            LIMIT 1
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_pending_for_date(&self, date: NaiveDate) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, "firstName", "lastName", "dateOfBooking",
                   "stateOfBooking", "countyOfBooking", "offenseDescription",
                   "additionalDetails", "imagePath", fb_status
            FROM mugshots
            WHERE "dateOfBooking" = $1 AND fb_status = 'pending'
            ORDER BY id
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_record).collect()
    }

    #[instrument(level = "info", skip(self))]
    async fn mark_posted(&self, id: i64) -> Result<()> {
        let res = sqlx::query("UPDATE mugshots SET fb_status = $1 WHERE id = $2")
            .bind(ProcessingStatus::Posted.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            warn!(id, "Mugshot not found when marking posted");
        } else {
            info!(id, "Marked mugshot as posted");
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory [`RecordStore`] for tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        pub rows: Mutex<Vec<StoredRecord>>,
    }

    impl MemoryStore {
        pub fn with(records: Vec<ParsedRecord>) -> Self {
            let store = Self::default();
            {
                let mut rows = store.rows.lock().unwrap();
                for (i, record) in records.into_iter().enumerate() {
                    rows.push(StoredRecord { id: i as i64 + 1, created_at: None, record });
                }
            }
            store
        }

        pub fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }

        async fn insert(&self, record: &ParsedRecord) -> Result<i64> {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() as i64 + 1;
            rows.push(StoredRecord { id, created_at: Some(Utc::now()), record: record.clone() });
            Ok(id)
        }

        async fn exists_by_name_and_date(
            &self,
            first_name: &str,
            last_name: &str,
            date: NaiveDate,
        ) -> Result<bool> {
            Ok(self.rows.lock().unwrap().iter().any(|r| {
                r.record.first_name == first_name
                    && r.record.last_name == last_name
                    && r.record.date_of_booking == date
            }))
        }

        async fn list_pending_for_date(&self, date: NaiveDate) -> Result<Vec<StoredRecord>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| {
                    r.record.date_of_booking == date
                        && r.record.status == ProcessingStatus::Pending
                })
                .cloned()
                .collect())
        }

        async fn mark_posted(&self, id: i64) -> Result<()> {
            if let Some(r) = self.rows.lock().unwrap().iter_mut().find(|r| r.id == id) {
                r.record.status = ProcessingStatus::Posted;
            }
            Ok(())
        }
    }

    pub fn record(first: &str, last: &str, date: NaiveDate) -> ParsedRecord {
        ParsedRecord {
            first_name: first.to_string(),
            last_name: last.to_string(),
            date_of_booking: date,
            offense_description: "- THEFT".to_string(),
            additional_details: "Age: 30".to_string(),
            image_url: format!("https://blobs.example/{first}_{last}.jpg"),
            state_of_booking: "KY".to_string(),
            county_of_booking: "Jefferson".to_string(),
            status: ProcessingStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryStore, record};
    use super::*;

    #[tokio::test]
    async fn test_memory_store_pending_and_posted() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 24).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let store = MemoryStore::with(vec![
            record("John", "Edwards", today),
            record("Mary", "OBrien", yesterday),
        ]);

        let pending = store.list_pending_for_date(today).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.first_name, "John");

        store.mark_posted(pending[0].id).await.unwrap();
        assert!(store.list_pending_for_date(today).await.unwrap().is_empty());
        assert!(store.exists_by_name_and_date("John", "Edwards", today).await.unwrap());
        assert!(!store.exists_by_name_and_date("John", "Edwards", yesterday).await.unwrap());
    }
}
