//! SQLite store with pooled connections and migrations

use super::sql::{escape_like, Conditions};
use super::{
    AggregateFilter, BackendSetting, DocumentPage, FacetCount, FacetField, ListSort,
    SearchFilters, SenderCount, SortField, Store, StoreError, StoredDocument,
};
use crate::retrieval::ScopeFilter;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

const DOCUMENT_COLUMNS: &str =
    "id, source_id, subject, sender, sender_name, date, folder, has_attachments, attachment_count, body";

/// Row counts for the `stats` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub sources: u64,
    pub emails: u64,
    pub emails_with_attachments: u64,
    pub backend_settings: u64,
}

/// [`Store`] over a SQLite file
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(db_path).with_init(|conn| conn.execute_batch(PRAGMAS));
        let pool = Pool::builder().max_size(16).build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    /// Single-connection in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        let manager =
            SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(PRAGMAS));
        let pool = Pool::builder().max_size(1).build(manager)?;

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                info!("Applying migration {}", version);

                conn.execute_batch(migration)
                    .map_err(|e| StoreError::Migration {
                        version,
                        message: e.to_string(),
                    })?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Run `f` on a pooled connection off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn upsert_source(&self, id: &str, name: &str, imported_at: i64) -> Result<(), StoreError> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sources (id, name, imported_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, imported_at = excluded.imported_at",
            params![id, name, imported_at],
        )?;
        Ok(())
    }

    /// Insert or replace emails in one transaction
    pub fn upsert_documents(&self, documents: &[StoredDocument]) -> Result<usize, StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO emails
                 (id, source_id, subject, sender, sender_name, date, folder, has_attachments, attachment_count, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for doc in documents {
                stmt.execute(params![
                    doc.id,
                    doc.source_id,
                    doc.subject,
                    doc.sender,
                    doc.sender_name,
                    doc.date,
                    doc.folder,
                    doc.has_attachments,
                    doc.attachment_count,
                    doc.body,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Stored {} emails", documents.len());
        Ok(documents.len())
    }

    /// Store a backend setting; a default clears other defaults in its scope
    pub fn upsert_backend_setting(
        &self,
        setting: &BackendSetting,
        is_default: bool,
    ) -> Result<(), StoreError> {
        let scope = setting.scope.clone().unwrap_or_default();
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        if is_default {
            tx.execute(
                "UPDATE backend_settings SET is_default = 0 WHERE scope = ?1",
                params![scope],
            )?;
        }
        tx.execute(
            "INSERT INTO backend_settings (scope, provider, model, api_key, base_url, is_default, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s', 'now'))
             ON CONFLICT(scope, provider) DO UPDATE SET
                model = excluded.model,
                api_key = excluded.api_key,
                base_url = excluded.base_url,
                is_default = excluded.is_default,
                updated_at = excluded.updated_at",
            params![
                scope,
                setting.provider,
                setting.model,
                setting.api_key,
                setting.base_url,
                is_default
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        Ok(StoreStats {
            sources: count("SELECT COUNT(*) FROM sources")?,
            emails: count("SELECT COUNT(*) FROM emails")?,
            emails_with_attachments: count(
                "SELECT COUNT(*) FROM emails WHERE has_attachments = 1",
            )?,
            backend_settings: count("SELECT COUNT(*) FROM backend_settings")?,
        })
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<StoredDocument> {
    Ok(StoredDocument {
        id: row.get(0)?,
        source_id: row.get(1)?,
        subject: row.get(2)?,
        sender: row.get(3)?,
        sender_name: row.get(4)?,
        date: row.get(5)?,
        folder: row.get(6)?,
        has_attachments: row.get(7)?,
        attachment_count: row.get(8)?,
        body: row.get(9)?,
    })
}

fn count_where(conn: &Connection, conditions: &Conditions) -> Result<u64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM emails{}", conditions.where_sql());
    let n: i64 = conn.query_row(&sql, params_from_iter(conditions.params.iter()), |row| {
        row.get(0)
    })?;
    Ok(n as u64)
}

fn setting_for_scope(conn: &Connection, scope: &str) -> Result<Option<BackendSetting>, StoreError> {
    let setting = conn
        .query_row(
            "SELECT provider, model, api_key, base_url FROM backend_settings
             WHERE scope = ?1 AND is_default = 1
             ORDER BY updated_at DESC LIMIT 1",
            params![scope],
            |row| {
                Ok(BackendSetting {
                    scope: (!scope.is_empty()).then(|| scope.to_string()),
                    provider: row.get(0)?,
                    model: row.get(1)?,
                    api_key: row.get(2)?,
                    base_url: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(setting)
}

#[async_trait]
impl Store for SqliteStore {
    async fn count_documents(&self, filter: &AggregateFilter) -> Result<u64, StoreError> {
        let conditions = Conditions::aggregate(filter)?;
        self.with_conn(move |conn| count_where(conn, &conditions))
            .await
    }

    async fn count_sources(&self, scope: Option<&ScopeFilter>) -> Result<u64, StoreError> {
        let mut conditions = Conditions::new();
        if let Some(scope) = scope {
            conditions.clause(scope.clause())?;
        }
        let scoped = scope.is_some();

        self.with_conn(move |conn| {
            let sql = if scoped {
                format!(
                    "SELECT COUNT(*) FROM sources WHERE id IN (SELECT DISTINCT source_id FROM emails{})",
                    conditions.where_sql()
                )
            } else {
                "SELECT COUNT(*) FROM sources".to_string()
            };
            let n: i64 = conn.query_row(&sql, params_from_iter(conditions.params.iter()), |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        })
        .await
    }

    async fn top_senders(
        &self,
        filter: &AggregateFilter,
        limit: usize,
    ) -> Result<Vec<SenderCount>, StoreError> {
        let mut conditions = Conditions::aggregate(filter)?;
        conditions.push("sender IS NOT NULL", []);

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT sender, COUNT(*) AS n FROM emails{} GROUP BY sender ORDER BY n DESC, sender ASC LIMIT {}",
                conditions.where_sql(),
                limit
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params.iter()), |row| {
                Ok(SenderCount {
                    sender: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conditions = Conditions::new();
        conditions.in_list("id", ids);

        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM emails{}", DOCUMENT_COLUMNS, conditions.where_sql());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(conditions.params.iter()),
                document_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn list_documents(
        &self,
        filters: &SearchFilters,
        offset: usize,
        limit: usize,
        sort: ListSort,
    ) -> Result<DocumentPage, StoreError> {
        let conditions = Conditions::search(filters);
        // SQLite integers are i64
        let offset = offset.min(i64::MAX as usize);
        let limit = limit.min(i64::MAX as usize);

        self.with_conn(move |conn| {
            let total = count_where(conn, &conditions)?;

            let column = match sort.field {
                SortField::Date => "date",
                SortField::Subject => "subject",
                SortField::Sender => "sender",
            };
            let order = if sort.descending {
                "DESC NULLS LAST"
            } else {
                "ASC NULLS FIRST"
            };
            let sql = format!(
                "SELECT {} FROM emails{} ORDER BY {} {}, id ASC LIMIT {} OFFSET {}",
                DOCUMENT_COLUMNS,
                conditions.where_sql(),
                column,
                order,
                limit,
                offset
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(conditions.params.iter()),
                document_from_row,
            )?;
            let documents = rows.collect::<Result<Vec<_>, _>>()?;

            Ok(DocumentPage { documents, total })
        })
        .await
    }

    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let pattern = format!("%{}%", escape_like(prefix));

        self.with_conn(move |conn| {
            let mut suggestions: Vec<String> = Vec::new();

            for column in ["subject", "sender_name"] {
                let remaining = limit.saturating_sub(suggestions.len());
                if remaining == 0 {
                    break;
                }
                let sql = format!(
                    "SELECT DISTINCT {col} FROM emails
                     WHERE {col} IS NOT NULL AND {col} != '' AND {col} LIKE ?1 ESCAPE '\\'
                     ORDER BY {col} LIMIT {limit}",
                    col = column,
                    limit = remaining
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
                for value in rows {
                    let value = value?;
                    if !suggestions.contains(&value) {
                        suggestions.push(value);
                    }
                }
            }

            suggestions.truncate(limit);
            Ok(suggestions)
        })
        .await
    }

    async fn facet_counts(
        &self,
        field: FacetField,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<FacetCount>, StoreError> {
        let column = match field {
            FacetField::Sender => "sender",
            FacetField::Folder => "folder",
        };
        let mut conditions = Conditions::search(filters);
        conditions.push(format!("{} IS NOT NULL", column), []);

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {col}, COUNT(*) AS n FROM emails{} GROUP BY {col} ORDER BY n DESC, {col} ASC LIMIT {}",
                conditions.where_sql(),
                limit,
                col = column
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(conditions.params.iter()), |row| {
                Ok(FacetCount {
                    value: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn backend_settings(
        &self,
        scope: Option<&str>,
    ) -> Result<Option<BackendSetting>, StoreError> {
        let scope = scope.map(str::to_string);

        self.with_conn(move |conn| {
            if let Some(scope) = scope.as_deref().filter(|s| !s.is_empty()) {
                if let Some(setting) = setting_for_scope(conn, scope)? {
                    return Ok(Some(setting));
                }
            }
            setting_for_scope(conn, "")
        })
        .await
    }
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE sources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        imported_at INTEGER NOT NULL
    );

    CREATE TABLE emails (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        subject TEXT,
        sender TEXT,
        sender_name TEXT,
        date INTEGER,
        folder TEXT,
        has_attachments BOOLEAN NOT NULL DEFAULT 0,
        attachment_count INTEGER NOT NULL DEFAULT 0,
        body TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_emails_source ON emails(source_id);
    CREATE INDEX idx_emails_sender ON emails(sender);
    CREATE INDEX idx_emails_date ON emails(date);
    CREATE INDEX idx_emails_folder ON emails(folder);

    -- scope '' is the system-wide row
    CREATE TABLE backend_settings (
        scope TEXT NOT NULL DEFAULT '',
        provider TEXT NOT NULL,
        model TEXT,
        api_key TEXT,
        base_url TEXT,
        is_default BOOLEAN NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (scope, provider)
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::WhereClause;
    use tempfile::TempDir;

    fn email(id: &str, source: &str, sender: &str, date: i64, folder: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            source_id: source.to_string(),
            subject: Some(format!("Subject {}", id)),
            sender: Some(sender.to_string()),
            sender_name: Some(sender.split('@').next().unwrap_or_default().to_string()),
            date: Some(date),
            folder: Some(folder.to_string()),
            has_attachments: id.ends_with('3'),
            attachment_count: u32::from(id.ends_with('3')),
            body: format!("Body of {}", id),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_source("pst-1", "archive.pst", 0).unwrap();
        store.upsert_source("pst-2", "old.pst", 0).unwrap();
        store
            .upsert_documents(&[
                email("e1", "pst-1", "alice@x.com", 100, "Inbox"),
                email("e2", "pst-1", "alice@x.com", 200, "Inbox/Projects"),
                email("e3", "pst-1", "bob@x.com", 300, "Sent"),
                email("e4", "pst-2", "carol@x.com", 400, "Inbox"),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_database_creation_and_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let store = SqliteStore::open(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
        drop(conn);

        // Reopening does not reapply migrations
        drop(store);
        SqliteStore::open(&db_path).unwrap();
    }

    #[tokio::test]
    async fn test_counts_with_filters_and_scope() {
        let store = seeded();

        assert_eq!(store.count_documents(&AggregateFilter::default()).await.unwrap(), 4);
        assert_eq!(store.count_sources(None).await.unwrap(), 2);

        let filter = AggregateFilter {
            senders: vec!["alice@x.com".to_string()],
            date_gte: Some(150),
            ..Default::default()
        };
        assert_eq!(store.count_documents(&filter).await.unwrap(), 1);

        let scope = ScopeFilter::sources(&["pst-2"]).unwrap();
        let scoped = AggregateFilter {
            scope: Some(scope.clone()),
            ..Default::default()
        };
        assert_eq!(store.count_documents(&scoped).await.unwrap(), 1);
        assert_eq!(store.count_sources(Some(&scope)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_scope_field() {
        let store = seeded();
        let scope = ScopeFilter::new(WhereClause::eq("tenant", "t1"));
        let err = store.count_sources(Some(&scope)).await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedFilter(_)));
    }

    #[tokio::test]
    async fn test_top_senders() {
        let store = seeded();
        let senders = store
            .top_senders(&AggregateFilter::default(), 20)
            .await
            .unwrap();

        assert_eq!(senders[0], SenderCount { sender: "alice@x.com".to_string(), count: 2 });
        assert_eq!(senders.len(), 3);
        // ties ordered by sender
        assert_eq!(senders[1].sender, "bob@x.com");
    }

    #[tokio::test]
    async fn test_fetch_and_list() {
        let store = seeded();

        let fetched = store
            .fetch_documents(&["e2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].folder.as_deref(), Some("Inbox/Projects"));

        let page = store
            .list_documents(&SearchFilters::default(), 0, 2, ListSort::default())
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        let ids: Vec<&str> = page.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e3"]);

        let inbox = SearchFilters {
            folders: vec!["Inbox".to_string()],
            ..Default::default()
        };
        let page = store
            .list_documents(
                &inbox,
                0,
                10,
                ListSort {
                    field: SortField::Date,
                    descending: false,
                },
            )
            .await
            .unwrap();
        let ids: Vec<&str> = page.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e4"]);

        let beyond = store
            .list_documents(&SearchFilters::default(), usize::MAX, usize::MAX, ListSort::default())
            .await
            .unwrap();
        assert_eq!(beyond.total, 4);
        assert!(beyond.documents.is_empty());
    }

    #[tokio::test]
    async fn test_suggest_and_facets() {
        let store = seeded();

        let suggestions = store.suggest("subject e", 3).await.unwrap();
        assert_eq!(suggestions, vec!["Subject e1", "Subject e2", "Subject e3"]);

        let names = store.suggest("caro", 5).await.unwrap();
        assert_eq!(names, vec!["carol"]);

        let folders = store
            .facet_counts(FacetField::Folder, &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(folders[0], FacetCount { value: "Inbox".to_string(), count: 2 });

        let attachments_only = SearchFilters {
            has_attachments: Some(true),
            ..Default::default()
        };
        let senders = store
            .facet_counts(FacetField::Sender, &attachments_only, 10)
            .await
            .unwrap();
        assert_eq!(senders, vec![FacetCount { value: "bob@x.com".to_string(), count: 1 }]);
    }

    #[tokio::test]
    async fn test_backend_settings_layering() {
        let store = seeded();
        assert!(store.backend_settings(None).await.unwrap().is_none());

        let system = BackendSetting {
            scope: None,
            provider: "groq".to_string(),
            model: Some("llama-3.3-70b-versatile".to_string()),
            api_key: Some("gsk-test".to_string()),
            base_url: None,
        };
        store.upsert_backend_setting(&system, true).unwrap();

        let scoped = BackendSetting {
            scope: Some("team-a".to_string()),
            provider: "anthropic".to_string(),
            model: None,
            api_key: Some("sk-ant".to_string()),
            base_url: None,
        };
        store.upsert_backend_setting(&scoped, true).unwrap();

        let team = store.backend_settings(Some("team-a")).await.unwrap().unwrap();
        assert_eq!(team.provider, "anthropic");
        assert_eq!(team.scope.as_deref(), Some("team-a"));

        let other = store.backend_settings(Some("team-b")).await.unwrap().unwrap();
        assert_eq!(other.provider, "groq");
        assert!(other.scope.is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.backend_settings, 2);
        assert_eq!(stats.emails, 4);
        assert_eq!(stats.emails_with_attachments, 1);
    }
}
