use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::models::FoodRecord;

/// Persistence boundary for food records.
///
/// `update` overwrites the editable fields (name, ingredients, calories,
/// notes) of the record with the same id and leaves `captured_at` and the
/// image alone. `update` and `delete` report whether a record matched.
pub trait FoodRecordStore: Send + Sync {
    fn create(&self, record: &FoodRecord) -> Result<()>;
    fn update(&self, record: &FoodRecord) -> Result<bool>;
    fn delete(&self, id: Uuid) -> Result<bool>;
    /// All records in insertion order.
    fn all(&self) -> Result<Vec<FoodRecord>>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodRecord> {
        let id: String = row.get(0)?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
        let ingredients: String = row.get(2)?;
        let ingredients: Vec<String> = serde_json::from_str(&ingredients)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        let calories: i64 = row.get(3)?;
        let calories = u32::try_from(calories)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e)))?;
        let captured_at: String = row.get(5)?;
        let captured_at = DateTime::parse_from_rfc3339(&captured_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(FoodRecord {
            id,
            name: row.get(1)?,
            ingredients,
            calories,
            image_bytes: row.get(4)?,
            captured_at,
            notes: row.get(6)?,
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS food_records (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                ingredients TEXT NOT NULL DEFAULT '[]',
                calories INTEGER NOT NULL CHECK (calories >= 0),
                image BLOB,
                captured_at TEXT NOT NULL,
                notes TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_food_records_captured_at ON food_records(captured_at);

            PRAGMA user_version = 1;",
        )?;
    }

    Ok(())
}

impl FoodRecordStore for SqliteStore {
    fn create(&self, record: &FoodRecord) -> Result<()> {
        let now = Local::now().to_rfc3339();
        let ingredients = serde_json::to_string(&record.ingredients)?;
        self.conn()
            .execute(
                "INSERT INTO food_records (id, name, ingredients, calories, image, captured_at, notes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.name,
                    ingredients,
                    record.calories,
                    record.image_bytes,
                    record.captured_at.to_rfc3339(),
                    record.notes,
                    now,
                ],
            )
            .with_context(|| format!("Failed to save food record {}", record.id))?;
        Ok(())
    }

    fn update(&self, record: &FoodRecord) -> Result<bool> {
        let now = Local::now().to_rfc3339();
        let ingredients = serde_json::to_string(&record.ingredients)?;
        let rows = self
            .conn()
            .execute(
                "UPDATE food_records
                 SET name = ?1, ingredients = ?2, calories = ?3, notes = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    record.name,
                    ingredients,
                    record.calories,
                    record.notes,
                    now,
                    record.id.to_string(),
                ],
            )
            .with_context(|| format!("Failed to update food record {}", record.id))?;
        Ok(rows > 0)
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM food_records WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    fn all(&self) -> Result<Vec<FoodRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, ingredients, calories, image, captured_at, notes
             FROM food_records
             ORDER BY rowid",
        )?;
        let records = stmt
            .query_map([], Self::record_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load food records")?;
        Ok(records)
    }
}

/// Volatile store, handy for tests and for running without a database file.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<FoodRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<FoodRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FoodRecordStore for MemoryStore {
    fn create(&self, record: &FoodRecord) -> Result<()> {
        let mut records = self.records();
        if records.iter().any(|r| r.id == record.id) {
            bail!("Food record {} already exists", record.id);
        }
        records.push(record.clone());
        Ok(())
    }

    fn update(&self, record: &FoodRecord) -> Result<bool> {
        let mut records = self.records();
        let Some(stored) = records.iter_mut().find(|r| r.id == record.id) else {
            return Ok(false);
        };
        stored.name.clone_from(&record.name);
        stored.ingredients.clone_from(&record.ingredients);
        stored.calories = record.calories;
        stored.notes.clone_from(&record.notes);
        Ok(true)
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    fn all(&self) -> Result<Vec<FoodRecord>> {
        Ok(self.records().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use chrono::{Duration, TimeZone};

    fn sample_record(name: &str, calories: u32) -> FoodRecord {
        FoodRecord::from_analysis(
            AnalysisResult {
                name: name.to_string(),
                ingredients: vec!["bread".to_string(), "butter".to_string(), "bread".to_string()],
                calories,
            },
            vec![0xFF, 0xD8, 0xFF],
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 45).unwrap() + Duration::microseconds(123_456),
        )
    }

    fn exercise_crud(store: &dyn FoodRecordStore) {
        let toast = sample_record("Toast", 250);
        let soup = sample_record("Soup", 180);
        store.create(&toast).unwrap();
        store.create(&soup).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], toast);
        assert_eq!(all[1], soup);
        assert_eq!(all[0].ingredients, vec!["bread", "butter", "bread"]);

        let mut edited = toast.clone();
        edited.name = "Buttered toast".to_string();
        edited.calories = 320;
        edited.ingredients = vec!["butter".to_string(), "bread".to_string()];
        edited.notes = Some("extra butter".to_string());
        edited.captured_at = Utc::now();
        edited.image_bytes = None;
        assert!(store.update(&edited).unwrap());

        let stored = store.all().unwrap().into_iter().find(|r| r.id == toast.id).unwrap();
        assert_eq!(stored.name, "Buttered toast");
        assert_eq!(stored.calories, 320);
        assert_eq!(stored.ingredients, vec!["butter", "bread"]);
        assert_eq!(stored.notes.as_deref(), Some("extra butter"));
        assert_eq!(stored.captured_at, toast.captured_at);
        assert_eq!(stored.image_bytes, toast.image_bytes);

        assert!(store.delete(toast.id).unwrap());
        assert!(!store.delete(toast.id).unwrap());
        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, soup.id);
    }

    #[test]
    fn test_sqlite_crud() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise_crud(&store);
    }

    #[test]
    fn test_memory_crud() {
        let store = MemoryStore::new();
        exercise_crud(&store);
    }

    #[test]
    fn test_update_missing_record() {
        let record = sample_record("Ghost", 1);
        let sqlite = SqliteStore::open_in_memory().unwrap();
        let memory = MemoryStore::new();
        assert!(!sqlite.update(&record).unwrap());
        assert!(!memory.update(&record).unwrap());
        assert!(sqlite.all().unwrap().is_empty());
        assert!(memory.all().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let record = sample_record("Toast", 250);
        let sqlite = SqliteStore::open_in_memory().unwrap();
        sqlite.create(&record).unwrap();
        assert!(sqlite.create(&record).is_err());

        let memory = MemoryStore::new();
        memory.create(&record).unwrap();
        assert!(memory.create(&record).is_err());
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calsnap.db");
        let mut record = sample_record("Porridge", 300);
        record.image_bytes = None;
        record.notes = Some("with honey".to_string());

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create(&record).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let all = store.all().unwrap();
        assert_eq!(all, vec![record]);
    }

    #[test]
    fn test_sqlite_migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calsnap.db");
        SqliteStore::open(&path).unwrap();
        SqliteStore::open(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
