#![deny(warnings)]

//! Persistence layer: the last-used form values, kept in SQLite.
//!
//! Only the input strings are stored, under a single fixed key. Simulation
//! results are never persisted.

use form_input::FormValues;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Storage identifier of the saved form.
pub const FORM_STORAGE_KEY: &str = "reinvest.form";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS form_values (
    storage_key TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Returns the default SQLite URL used for local saves.
pub fn default_sqlite_url() -> &'static str {
    "sqlite://./saves/form.db"
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("saved form is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn ensure_parent_dir(url: &str) -> Result<(), StoreError> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|p| !p.starts_with(':'));
    if let Some(parent) = path.and_then(|p| Path::new(p).parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Open (creating if missing) the database at `url` and apply the schema.
pub async fn init_db(url: &str) -> Result<SqlitePool, StoreError> {
    ensure_parent_dir(url)?;
    let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // One connection keeps `sqlite::memory:` a single database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    sqlx::query(SCHEMA).execute(&pool).await?;
    info!(url, "form store ready");
    Ok(pool)
}

/// Saved form values under one storage key.
#[derive(Clone)]
pub struct FormStore {
    pool: SqlitePool,
    key: String,
}

impl FormStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self::with_pool(init_db(url).await?))
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            key: FORM_STORAGE_KEY.to_string(),
        }
    }

    /// Use a different storage identifier.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<Option<FormValues>, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM form_values WHERE storage_key = ?1")
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await?;
        debug!(key = %self.key, found = payload.is_some(), "form loaded");
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Replace the saved form.
    pub async fn save(&self, form: &FormValues) -> Result<(), StoreError> {
        let payload = serde_json::to_string(form)?;
        sqlx::query(
            "INSERT INTO form_values (storage_key, payload, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(storage_key) DO UPDATE
             SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(&self.key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        debug!(key = %self.key, "form saved");
        Ok(())
    }

    /// Forget the saved form. Returns whether one existed.
    pub async fn clear(&self) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM form_values WHERE storage_key = ?1")
            .bind(&self.key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(capital: &str) -> FormValues {
        FormValues {
            initial_capital: capital.to_string(),
            unit_cost: "R$ 10,00".into(),
            unit_revenue: "R$ 15,00".into(),
            target_net_profit: "R$ 2.000,00".into(),
            yield_variance: "10%".into(),
        }
    }

    #[test]
    fn url_is_sqlite() {
        assert!(default_sqlite_url().starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn empty_store_has_no_form() {
        let store = FormStore::open("sqlite::memory:").await.unwrap();
        assert_eq!(store.key(), FORM_STORAGE_KEY);
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.clear().await.unwrap());
    }

    #[tokio::test]
    async fn save_replaces_previous_form() {
        let store = FormStore::open("sqlite::memory:").await.unwrap();
        store.save(&form("R$ 1.000,00")).await.unwrap();
        store.save(&form("R$ 2.500,00")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(form("R$ 2.500,00")));
        assert!(store.clear().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let store = FormStore::open("sqlite::memory:").await.unwrap();
        let other = store.clone().with_key("scratch");
        other.save(&form("R$ 9,00")).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(other.load().await.unwrap(), Some(form("R$ 9,00")));
    }

    #[tokio::test]
    async fn form_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("reinvest-store-{}", std::process::id()));
        let url = format!("sqlite://{}", dir.join("nested/form.db").display());
        {
            let store = FormStore::open(&url).await.unwrap();
            store.save(&form("R$ 777,00")).await.unwrap();
        }
        let reopened = FormStore::open(&url).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(form("R$ 777,00")));
        let _ = std::fs::remove_dir_all(dir);
    }
}
