//! Concrete backends for the wizard's store capabilities: a sqlite-backed
//! document store addressed by collection+id and a filesystem-backed blob
//! store addressed by relative path.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use url::Url;

use shared::domain::Document;

#[derive(Clone)]
pub struct DocumentStorage {
    pool: Pool<Sqlite>,
}

impl DocumentStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory database exists per connection, so it must stay on one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_documents_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_documents_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection  TEXT NOT NULL,
                doc_id      TEXT NOT NULL,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (collection, doc_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure documents table exists")?;
        Ok(())
    }

    /// Idempotent upsert: overwrites any existing document at the same
    /// collection+id.
    pub async fn put(&self, collection: &str, doc_id: &str, document: &Document) -> Result<()> {
        let body = serde_json::to_string(document).context("failed to encode document body")?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO documents (collection, doc_id, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(collection, doc_id)
             DO UPDATE SET body=excluded.body, updated_at=excluded.updated_at",
        )
        .bind(collection)
        .bind(doc_id)
        .bind(body)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `None` for a document that was never stored; errors are
    /// reserved for transport and decoding failures.
    pub async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND doc_id = ?")
            .bind(collection)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.get(0);
        let document = serde_json::from_str::<Document>(&body)
            .with_context(|| format!("stored document {collection}/{doc_id} is not valid JSON"))?;
        Ok(Some(document))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

/// Path-addressed byte storage under a root directory. Intermediate
/// directories are created implicitly on upload; URLs resolve to `file://`.
pub struct BlobStorage {
    root: PathBuf,
}

impl BlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob root '{}'", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            bail!("blob path must not be empty");
        }
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => bail!("blob path '{path}' must be relative and must not traverse upward"),
            }
        }
        if path.ends_with('/') {
            bail!("blob path '{path}' must name a file");
        }
        Ok(self.root.join(relative))
    }

    pub async fn upload(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create blob directory for '{path}'"))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write blob '{path}'"))?;
        Ok(())
    }

    /// Returns `None` when nothing was uploaded at the path.
    pub async fn resolve_url(&self, path: &str) -> Result<Option<Url>> {
        let target = self.resolve_path(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to inspect blob '{path}'"))
            }
        }
        let absolute = tokio::fs::canonicalize(&target)
            .await
            .with_context(|| format!("failed to canonicalize blob '{path}'"))?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| anyhow::anyhow!("blob path '{path}' is not expressible as a URL"))?;
        Ok(Some(url))
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
