use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::task;

use crate::filters::PanelColumn;
use crate::predicate::{PanelQuery, SqlParam};

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on older builds.
const ID_CHUNK_SIZE: usize = 500;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage call '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] task::JoinError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// One row of the `panel` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    pub panel_id: String,
    pub age_group: Option<String>,
    pub gender: Option<String>,
    pub residence: Option<String>,
    pub occupation: Option<String>,
    pub marital_status: Option<String>,
    pub phone_brand: Option<String>,
    pub car_brand: Option<String>,
}

impl PanelRecord {
    pub fn value(&self, column: PanelColumn) -> Option<&str> {
        let value = match column {
            PanelColumn::AgeGroup => &self.age_group,
            PanelColumn::Gender => &self.gender,
            PanelColumn::Residence => &self.residence,
            PanelColumn::Occupation => &self.occupation,
            PanelColumn::MaritalStatus => &self.marital_status,
            PanelColumn::PhoneBrand => &self.phone_brand,
            PanelColumn::CarBrand => &self.car_brand,
        };
        value.as_deref()
    }
}

/// Generic row of the `members` table.
pub type MemberRow = serde_json::Map<String, serde_json::Value>;

/// Read access to panel data used by the search pipeline.
#[async_trait]
pub trait PanelStore: Send + Sync {
    /// Identifiers matching `query`, in storage order, bounded by its cap.
    async fn search_panels(&self, query: &PanelQuery) -> StorageResult<Vec<String>>;

    /// Categorical attributes for each known identifier.
    async fn fetch_attributes(&self, panel_ids: &[String]) -> StorageResult<Vec<PanelRecord>>;

    /// Every row of the membership table.
    async fn list_members(&self) -> StorageResult<Vec<MemberRow>>;
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParam::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            SqlParam::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
        })
    }
}

/// SQLite-backed store. Every call opens its own connection on the blocking
/// pool and drops it before returning.
pub struct SqlitePanelStore {
    db_path: PathBuf,
    timeout: Duration,
}

impl SqlitePanelStore {
    pub async fn new(db_path: &Path, timeout: Duration) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
            timeout,
        };

        store
            .run("init", |conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS panel (
                        panel_id TEXT PRIMARY KEY,
                        age_group TEXT,
                        gender TEXT,
                        residence TEXT,
                        occupation TEXT,
                        marital_status TEXT,
                        phone_brand TEXT,
                        car_brand TEXT
                    )",
                    [],
                )?;
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS members (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        name TEXT NOT NULL,
                        email TEXT NOT NULL UNIQUE,
                        joined_at TEXT
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn insert_panel(&self, record: &PanelRecord) -> StorageResult<()> {
        let record = record.clone();
        self.run("insert_panel", move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO panel
                 (panel_id, age_group, gender, residence, occupation, marital_status, phone_brand, car_brand)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.panel_id,
                    record.age_group,
                    record.gender,
                    record.residence,
                    record.occupation,
                    record.marital_status,
                    record.phone_brand,
                    record.car_brand
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_member(
        &self,
        name: &str,
        email: &str,
        joined_at: Option<&str>,
    ) -> StorageResult<()> {
        let name = name.to_string();
        let email = email.to_string();
        let joined_at = joined_at.map(str::to_string);
        self.run("insert_member", move |conn| {
            conn.execute(
                "INSERT INTO members (name, email, joined_at) VALUES (?1, ?2, ?3)",
                params![name, email, joined_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        let busy_timeout = self.timeout;
        let handle = task::spawn_blocking(move || -> StorageResult<T> {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(busy_timeout)?;
            Ok(f(&conn)?)
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                tracing::warn!("Storage call '{}' exceeded {:?}", op, self.timeout);
                Err(StorageError::Timeout {
                    op,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl PanelStore for SqlitePanelStore {
    async fn search_panels(&self, query: &PanelQuery) -> StorageResult<Vec<String>> {
        let sql = query.sql();
        let params = query.params.clone();

        self.run("search_panels", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }

    async fn fetch_attributes(&self, panel_ids: &[String]) -> StorageResult<Vec<PanelRecord>> {
        if panel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let panel_ids = panel_ids.to_vec();

        self.run("fetch_attributes", move |conn| {
            let mut records = Vec::with_capacity(panel_ids.len());
            for chunk in panel_ids.chunks(ID_CHUNK_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT panel_id, age_group, gender, residence, occupation,
                            marital_status, phone_brand, car_brand
                     FROM panel WHERE panel_id IN ({})",
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                    Ok(PanelRecord {
                        panel_id: row.get(0)?,
                        age_group: row.get(1)?,
                        gender: row.get(2)?,
                        residence: row.get(3)?,
                        occupation: row.get(4)?,
                        marital_status: row.get(5)?,
                        phone_brand: row.get(6)?,
                        car_brand: row.get(7)?,
                    })
                })?;
                for row in rows {
                    records.push(row?);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn list_members(&self) -> StorageResult<Vec<MemberRow>> {
        self.run("list_members", |conn| {
            let mut stmt = conn.prepare("SELECT * FROM members")?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

            let rows = stmt.query_map([], |row| {
                let mut member = MemberRow::new();
                for (idx, name) in names.iter().enumerate() {
                    member.insert(name.clone(), json_value(row.get_ref(idx)?));
                }
                Ok(member)
            })?;

            let mut members = Vec::new();
            for row in rows {
                members.push(row?);
            }
            Ok(members)
        })
        .await
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(b.len()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::filters::FilterMap;
    use crate::predicate::build_panel_query;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) fn panel(id: &str, age: &str, gender: &str, residence: &str) -> PanelRecord {
        PanelRecord {
            panel_id: id.to_string(),
            age_group: Some(age.to_string()),
            gender: Some(gender.to_string()),
            residence: Some(residence.to_string()),
            occupation: Some("professional".to_string()),
            marital_status: None,
            phone_brand: Some("Samsung".to_string()),
            car_brand: Some(String::new()),
        }
    }

    /// Four panels in a fresh database; the directory goes away with the
    /// returned `TempDir`.
    pub(crate) async fn seeded_store() -> (TempDir, SqlitePanelStore) {
        let dir = TempDir::new().unwrap();
        let store = SqlitePanelStore::new(&dir.path().join("panel.db"), Duration::from_secs(5))
            .await
            .unwrap();
        for record in [
            panel("p1", "30s", "female", "Seoul"),
            panel("p2", "30s", "female", "Busan"),
            panel("p3", "20s", "male", "Seoul"),
            panel("p4", "40s", "female", "Seoul"),
        ] {
            store.insert_panel(&record).await.unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn search_binds_filters() {
        let (dir, store) = seeded_store().await;
        assert!(store.db_path().starts_with(dir.path()));
        let filters: FilterMap =
            serde_json::from_value(json!({"gender": "female", "residence": "Seoul"})).unwrap();

        let mut ids = store.search_panels(&build_panel_query(&filters, 10)).await.unwrap();
        ids.sort();

        assert_eq!(ids, vec!["p1", "p4"]);
    }

    #[tokio::test]
    async fn search_respects_cap_and_lists() {
        let (_dir, store) = seeded_store().await;
        let filters: FilterMap =
            serde_json::from_value(json!({"age_group": ["20s", "30s"]})).unwrap();

        let ids = store.search_panels(&build_panel_query(&filters, 2)).await.unwrap();
        assert_eq!(ids.len(), 2);

        let all = store.search_panels(&build_panel_query(&FilterMap::new(), 100)).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn fetch_attributes_skips_unknown_ids() {
        let (_dir, store) = seeded_store().await;
        let ids = vec!["p1".to_string(), "missing".to_string(), "p3".to_string()];

        let mut records = store.fetch_attributes(&ids).await.unwrap();
        records.sort_by(|a, b| a.panel_id.cmp(&b.panel_id));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value(PanelColumn::Residence), Some("Seoul"));
        assert_eq!(records[1].value(PanelColumn::Gender), Some("male"));
        assert_eq!(records[1].value(PanelColumn::MaritalStatus), None);
    }

    #[tokio::test]
    async fn members_come_back_as_json_objects() {
        let (_dir, store) = seeded_store().await;
        store.insert_member("Kim", "kim@example.com", Some("2024-03-01")).await.unwrap();
        store.insert_member("Lee", "lee@example.com", None).await.unwrap();

        let members = store.list_members().await.unwrap();

        assert_eq!(members.len(), 2);
        assert_eq!(members[0].get("name"), Some(&json!("Kim")));
        assert_eq!(members[0].get("id"), Some(&json!(1)));
        assert_eq!(members[1].get("joined_at"), Some(&serde_json::Value::Null));
    }
}
