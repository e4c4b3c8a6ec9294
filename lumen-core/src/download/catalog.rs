use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
};

use super::DownloadEntry;
use crate::{
    error::{CacheError, Result},
    hash::KeyHash,
};

pub(crate) const SCHEMA_VERSION: i64 = 2;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS download (
        _id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash_code INTEGER NOT NULL,
        content_url TEXT NOT NULL,
        _size INTEGER NOT NULL,
        etag TEXT,
        last_access INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        _data TEXT NOT NULL
    )
"#;

const CREATE_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS download_hash_code ON download (hash_code)",
    "CREATE INDEX IF NOT EXISTS download_last_access ON download (last_access, _id)",
];

/// Row picked as an eviction candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogRow {
    pub id: i64,
    pub url: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_access: u64,
}

/// SQLite catalog of downloaded files.
#[derive(Debug, Clone)]
pub(crate) struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens or creates the catalog. Returns `true` in the second slot when
    /// the schema was (re)created, meaning every backing file is orphaned.
    pub async fn open(path: &Path) -> Result<(Self, bool)> {
        match Self::try_open(path).await {
            Ok(opened) => Ok(opened),
            Err(e) => {
                log::warn!(
                    "download catalog unreadable; recreating path={}, err={}",
                    path.display(),
                    e
                );
                remove_database_files(path).await?;
                let (catalog, _) = Self::try_open(path).await?;
                Ok((catalog, true))
            }
        }
    }

    async fn try_open(path: &Path) -> Result<(Self, bool)> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let found: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await?;

        let reset = found != SCHEMA_VERSION;
        if reset {
            if found != 0 {
                log::info!(
                    "download catalog version changed; expected={}, found={}",
                    SCHEMA_VERSION,
                    found
                );
            }
            sqlx::query("DROP TABLE IF EXISTS download")
                .execute(&pool)
                .await?;
        }

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        for stmt in CREATE_INDEXES {
            sqlx::query(stmt).execute(&pool).await?;
        }

        if reset {
            sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
                .execute(&pool)
                .await?;
        }

        let check: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&pool)
            .await?;
        if check != "ok" {
            pool.close().await;
            return Err(CacheError::CatalogCorrupt(check));
        }

        Ok((Self { pool }, reset))
    }

    pub async fn lookup(&self, hash: KeyHash, url: &str) -> Result<Option<DownloadEntry>> {
        let row = sqlx::query(
            r#"
            SELECT _id, content_url, _data, _size, etag, last_access, last_updated
            FROM download
            WHERE hash_code = ?1 AND content_url = ?2
            ORDER BY last_updated DESC
            LIMIT 1
            "#,
        )
        .bind(hash.as_i64())
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| entry_from_row(&r)).transpose()
    }

    pub async fn touch(&self, id: i64, now_ms: u64) -> Result<()> {
        sqlx::query("UPDATE download SET last_access = ?1 WHERE _id = ?2")
            .bind(to_db(now_ms))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert(
        &self,
        hash: KeyHash,
        url: &str,
        path: &Path,
        size: u64,
        etag: Option<&str>,
        now_ms: u64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO download (hash_code, content_url, _size, etag, last_access, last_updated, _data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
            "#,
        )
        .bind(hash.as_i64())
        .bind(url)
        .bind(to_db(size))
        .bind(etag)
        .bind(to_db(now_ms))
        .bind(path.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM download WHERE _id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn total_size(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(_size), 0) FROM download")
            .fetch_one(&self.pool)
            .await?;
        Ok(from_db(total))
    }

    /// Latest access or update stamp on record, used to seed the clock.
    pub async fn latest_stamp(&self) -> Result<u64> {
        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(MAX(last_access, last_updated)), 0) FROM download",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(from_db(latest))
    }

    /// Least recently accessed rows, oldest first.
    pub async fn oldest(&self, limit: usize) -> Result<Vec<CatalogRow>> {
        let rows = sqlx::query(
            r#"
            SELECT _id, content_url, _data, _size, last_access
            FROM download
            ORDER BY last_access ASC, _id ASC
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<CatalogRow> {
                Ok(CatalogRow {
                    id: r.try_get("_id")?,
                    url: r.try_get("content_url")?,
                    path: PathBuf::from(r.try_get::<String, _>("_data")?),
                    size: from_db(r.try_get("_size")?),
                    last_access: from_db(r.try_get("last_access")?),
                })
            })
            .collect()
    }

    pub async fn all_paths(&self) -> Result<Vec<PathBuf>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT _data FROM download")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    /// Flushes the write-ahead log into the database file, then closes the
    /// pool. Nothing is written to the catalog files once this returns.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
        {
            log::warn!("download catalog checkpoint failed; err={}", e);
        }
        self.pool.close().await;
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<DownloadEntry> {
    Ok(DownloadEntry {
        id: row.try_get("_id")?,
        url: row.try_get("content_url")?,
        path: PathBuf::from(row.try_get::<String, _>("_data")?),
        size: from_db(row.try_get("_size")?),
        etag: row.try_get("etag")?,
        last_access: from_db(row.try_get("last_access")?),
        last_updated: from_db(row.try_get("last_updated")?),
    })
}

fn to_db(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_db(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

async fn remove_database_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        match tokio::fs::remove_file(PathBuf::from(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
