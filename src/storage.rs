use crate::models::{ChatHistory, HISTORY_SCHEMA_VERSION};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;
use thiserror::Error;

/// Storage key for the serialized conversation archive.
pub const HISTORY_KEY: &str = "chatHistory";
/// Storage key for the serialized user settings.
pub const SETTINGS_KEY: &str = "chatAppSettings";

// Define the database schema using CREATE TABLE IF NOT EXISTS statements
const MIGRATIONS_SQL: &str = "
-- Key-value store: each value is one independently-serialized JSON blob
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

/// Failures while reading or writing durable state. Persistence problems
/// are surfaced through this type rather than silently dropped, so a full
/// store or an undecodable blob is distinguishable from success.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored '{blob}' blob has schema version {found}, supported up to {supported}")]
    IncompatibleSchema {
        blob: &'static str,
        found: u32,
        supported: u32,
    },
}

#[derive(Debug)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Opens (creating if necessary) the database at `data_dir/polychat.sqlite`
    /// and runs migrations.
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("polychat.sqlite");

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        // Create the database file if it doesn't exist
        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url).await?;
        }

        let pool = SqlitePoolOptions::new().connect(&db_url).await?;
        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// An in-memory database, used by tests. A single connection keeps the
    /// database alive for the lifetime of the pool.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Applies the database schema migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
        log::debug!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL).execute(pool).await?;
        Ok(())
    }

    /// Reads one blob by key.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value")?)),
            None => Ok(None),
        }
    }

    /// Writes one blob wholesale, replacing any previous value.
    pub async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        log::debug!("Writing blob '{}' ({} bytes)", key, value.len());
        sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Loads the conversation archive. A missing blob yields an empty
    /// archive; a blob written by a newer schema is rejected.
    pub async fn load_history(&self) -> Result<ChatHistory, StorageError> {
        let Some(json) = self.get(HISTORY_KEY).await? else {
            log::info!("No stored chat history found, starting empty");
            return Ok(ChatHistory::default());
        };
        let history: ChatHistory = serde_json::from_str(&json)?;
        if history.version > HISTORY_SCHEMA_VERSION {
            return Err(StorageError::IncompatibleSchema {
                blob: HISTORY_KEY,
                found: history.version,
                supported: HISTORY_SCHEMA_VERSION,
            });
        }
        log::info!("Loaded {} archived conversations", history.conversations.len());
        Ok(history)
    }

    /// Serializes the entire archive and writes it in one piece. Partial
    /// persistence is never attempted: a failure here leaves the previous
    /// durable state untouched.
    pub async fn save_history(&self, history: &ChatHistory) -> Result<(), StorageError> {
        let json = serde_json::to_string(history)?;
        self.put(HISTORY_KEY, &json).await?;
        log::debug!(
            "Persisted {} conversations to '{}'",
            history.conversations.len(),
            HISTORY_KEY
        );
        Ok(())
    }
}
